use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("governance check failed: [{}]", .0.join(", "))]
    GovernanceRejected(Vec<String>),

    #[error("import session is locked: {0}")]
    SessionLocked(String),

    #[error("submission payload is empty: at least one category is required")]
    EmptySubmission,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Db(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpecError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        SpecError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_message_lists_reasons() {
        let err = SpecError::GovernanceRejected(vec![
            "overall score 40 is below 50".into(),
            "completeness 20 is below 100".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "governance check failed: [overall score 40 is below 50, completeness 20 is below 100]"
        );
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = SpecError::not_found("contract", "abc");
        assert_eq!(err.to_string(), "contract not found: abc");
    }
}
