//! Bearer JWT validation for the HTTP surface.
//!
//! Tokens are HS256 compact JWS. The signature, `exp`, and (when configured)
//! `iss` and `aud` are checked; the claims become a [`Principal`] stored in
//! the request extensions.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use axum::extract::{OriginalUri, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use specforge_core::config::ServerConfig;
use specforge_core::types::Role;

use crate::error::AppError;
use crate::state::AppState;

/// Paths reachable without a bearer token.
const PUBLIC_PATHS: &[&str] = &["/api/v1/auth/login", "/api/v1/auth/refresh", "/api/v1/ws"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub workspace: Option<Uuid>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    pub exp: i64,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub role: Role,
}

impl Principal {
    pub fn actor(&self) -> Option<Uuid> {
        Some(self.user_id)
    }

    pub fn require_write(&self) -> Result<(), AppError> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("role {} cannot modify resources", self.role)))
        }
    }

    pub fn require_approver(&self) -> Result<(), AppError> {
        if self.role.can_approve() {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("role {} cannot approve", self.role)))
        }
    }
}

fn validation(config: &ServerConfig) -> Validation {
    let mut v = Validation::new(Algorithm::HS256);
    v.leeway = 0;
    let mut required = vec!["exp"];
    if let Some(iss) = &config.jwt_issuer {
        v.set_issuer(&[iss]);
        required.push("iss");
    }
    match &config.jwt_audience {
        Some(aud) => {
            v.set_audience(&[aud]);
            required.push("aud");
        }
        None => v.validate_aud = false,
    }
    v.set_required_spec_claims(&required);
    v
}

fn rejection(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ExpiredSignature => "token expired",
        ErrorKind::InvalidSignature => "invalid token signature",
        ErrorKind::InvalidIssuer => "unexpected token issuer",
        ErrorKind::InvalidAudience => "unexpected token audience",
        ErrorKind::InvalidAlgorithm => "unexpected token algorithm",
        ErrorKind::MissingRequiredClaim(_) => "token is missing a required claim",
        _ => "malformed token",
    }
}

/// Verify a compact JWT and return its principal.
pub fn verify(config: &ServerConfig, token: &str) -> Result<Principal, AppError> {
    if config.jwt_secret.is_empty() {
        return Err(AppError::auth_failed("JWT authentication is not configured"));
    }
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let data = jsonwebtoken::decode::<Claims>(token, &key, &validation(config))
        .map_err(|e| AppError::auth_failed(rejection(e.kind())))?;
    let claims = data.claims;

    Ok(Principal {
        user_id: claims.sub,
        workspace_id: claims.workspace,
        role: claims.role,
    })
}

/// Sign `claims` as an HS256 JWT.
pub fn sign(secret: &str, claims: &Claims) -> Result<String, AppError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError(anyhow::anyhow!("failed to sign token: {e}")))
}

pub fn bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Axum middleware: validates the bearer token and injects a [`Principal`].
pub async fn auth_middleware(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    // Nested routers see a stripped path; match on the original one.
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    if PUBLIC_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }
    let Some(token) = bearer(&req) else {
        return AppError::auth_failed("missing bearer token").into_response();
    };
    match verify(&app.config, token) {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(path = %path, "rejected request: {}", e.0);
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            jwt_secret: "test-secret".into(),
            jwt_issuer: Some("specforge".into()),
            jwt_audience: Some("specforge-api".into()),
            ..Default::default()
        }
    }

    fn claims(role: Role, exp_offset: i64) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            workspace: None,
            role,
            iss: Some("specforge".into()),
            aud: Some(Audience::One("specforge-api".into())),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        }
    }

    #[test]
    fn valid_token_yields_principal() {
        let c = claims(Role::Engineer, 60);
        let token = sign("test-secret", &c).unwrap();
        let p = verify(&config(), &token).unwrap();
        assert_eq!(p.user_id, c.sub);
        assert_eq!(p.role, Role::Engineer);
    }

    #[test]
    fn audience_array_is_accepted() {
        let mut c = claims(Role::Owner, 60);
        c.aud = Some(Audience::Many(vec!["other".into(), "specforge-api".into()]));
        let token = sign("test-secret", &c).unwrap();
        assert!(verify(&config(), &token).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign("other-secret", &claims(Role::Owner, 60)).unwrap();
        let err = verify(&config(), &token).unwrap_err();
        assert_eq!(err.classify().1, "AUTH_FAILED");
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign("test-secret", &claims(Role::Owner, -5)).unwrap();
        assert!(verify(&config(), &token).is_err());
    }

    #[test]
    fn issuer_and_audience_are_enforced() {
        let mut c = claims(Role::Owner, 60);
        c.iss = Some("someone-else".into());
        assert!(verify(&config(), &sign("test-secret", &c).unwrap()).is_err());

        let mut c = claims(Role::Owner, 60);
        c.aud = None;
        assert!(verify(&config(), &sign("test-secret", &c).unwrap()).is_err());
    }

    #[test]
    fn missing_issuer_is_rejected() {
        let mut c = claims(Role::Owner, 60);
        c.iss = None;
        let err = verify(&config(), &sign("test-secret", &c).unwrap()).unwrap_err();
        assert_eq!(err.classify().1, "AUTH_FAILED");
    }

    #[test]
    fn audience_is_optional_when_unconfigured() {
        let cfg = ServerConfig {
            jwt_audience: None,
            ..config()
        };
        let mut c = claims(Role::Engineer, 60);
        c.aud = Some(Audience::One("anything".into()));
        assert!(verify(&cfg, &sign("test-secret", &c).unwrap()).is_ok());
        c.aud = None;
        assert!(verify(&cfg, &sign("test-secret", &c).unwrap()).is_ok());
    }

    #[test]
    fn non_hs256_header_is_rejected() {
        let c = claims(Role::Owner, 60);
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &c,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(verify(&config(), &token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify(&config(), "not.a.jwt").is_err());
        assert!(verify(&config(), "onlyonepart").is_err());
    }

    #[test]
    fn reviewer_cannot_write_but_can_approve() {
        let p = Principal {
            user_id: Uuid::new_v4(),
            workspace_id: None,
            role: Role::Reviewer,
        };
        assert!(p.require_write().is_err());
        assert!(p.require_approver().is_ok());
    }
}
