use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SpecError;

/// Declares a closed string enum with `as_str`, `Display` and `FromStr`.
/// The wire form of every variant is spelled out once, next to the variant.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = SpecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(SpecError::InvalidRequest(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Roadmap
// ---------------------------------------------------------------------------

wire_enum! {
    RoadmapKind {
        Epic => "EPIC",
        Feature => "FEATURE",
        Task => "TASK",
        Bugfix => "BUGFIX",
        Refactor => "REFACTOR",
    }
}

wire_enum! {
    RoadmapStatus {
        Draft => "DRAFT",
        InReview => "IN_REVIEW",
        Approved => "APPROVED",
        InProgress => "IN_PROGRESS",
        Complete => "COMPLETE",
    }
}

impl RoadmapStatus {
    /// Active states are guarded by a governance check on entry.
    pub fn is_active(self) -> bool {
        matches!(self, RoadmapStatus::InProgress | RoadmapStatus::Complete)
    }
}

wire_enum! {
    Priority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

wire_enum! {
    Risk {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
    }
}

wire_enum! {
    ContractType {
        Rest => "REST",
        Graphql => "GRAPHQL",
        Cli => "CLI",
        InternalFunction => "INTERNAL_FUNCTION",
        Event => "EVENT",
    }
}

wire_enum! {
    DependencyType {
        Direct => "DIRECT",
        Derived => "DERIVED",
        Contract => "CONTRACT",
    }
}

wire_enum! {
    ProposalStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

wire_enum! {
    Role {
        Owner => "OWNER",
        Admin => "ADMIN",
        Reviewer => "REVIEWER",
        Engineer => "ENGINEER",
        AiAgent => "AI_AGENT",
    }
}

impl Role {
    /// Roles allowed to mutate specification artifacts.
    pub fn can_write(self) -> bool {
        matches!(
            self,
            Role::Owner | Role::Admin | Role::Engineer | Role::AiAgent
        )
    }

    /// Roles allowed to approve proposals and manage tokens.
    pub fn can_approve(self) -> bool {
        matches!(self, Role::Owner | Role::Admin | Role::Reviewer)
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

wire_enum! {
    RefinementStatus {
        InProgress => "IN_PROGRESS",
        Validated => "VALIDATED",
        Failed => "FAILED",
        Approved => "APPROVED",
    }
}

impl RefinementStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RefinementStatus::InProgress)
    }
}

wire_enum! {
    ImportStatus {
        Partial => "partial",
        Complete => "complete",
        Superseded => "superseded",
    }
}

wire_enum! {
    SnapshotState {
        Initiated => "initiated",
        AwaitingPost => "awaiting_post",
        Analyzing => "analyzing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl SnapshotState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SnapshotState::Completed | SnapshotState::Failed)
    }

    /// The legal-transition table for reality snapshots.
    pub fn can_transition_to(self, next: SnapshotState) -> bool {
        matches!(
            (self, next),
            (SnapshotState::Initiated, SnapshotState::AwaitingPost)
                | (SnapshotState::AwaitingPost, SnapshotState::Analyzing)
                | (SnapshotState::Analyzing, SnapshotState::Completed)
                | (SnapshotState::Analyzing, SnapshotState::Failed)
        )
    }
}
