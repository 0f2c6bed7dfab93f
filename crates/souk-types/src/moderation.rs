//! Moderation state machine for ads.
//!
//! ```text
//!            approve            edit
//!  pending ----------> approved -----> pending
//!     |
//!     |  reject (reason required)       edit
//!     +----------------> rejected -----> pending
//! ```
//!
//! `approved` and `rejected` never move into each other directly; an ad has
//! to go back through `pending` first.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AdStatus, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(self, next: ModerationStatus) -> bool {
        use ModerationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Pending) | (Rejected, Pending)
        )
    }

    pub fn transition(self, next: ModerationStatus) -> Result<ModerationStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }
}

impl FromStr for ModerationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant { kind: "moderation status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move an ad from {} to {}", from.as_str(), to.as_str())]
pub struct TransitionError {
    pub from: ModerationStatus,
    pub to: ModerationStatus,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModerationError {
    #[error("a rejection needs a message for the author")]
    MissingReason,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What a moderator decided about a pending ad.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ModerationDecision {
    Approve {
        #[serde(default)]
        notes: Option<String>,
    },
    Reject {
        #[serde(default)]
        notes: Option<String>,
    },
}

/// Column values written by a single moderation update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationOutcome {
    pub moderation_status: ModerationStatus,
    pub status: AdStatus,
    pub notes: Option<String>,
}

impl ModerationDecision {
    /// Checks the decision against the ad's current state and returns the
    /// values to store.
    pub fn resolve(self, current: ModerationStatus) -> Result<ModerationOutcome, ModerationError> {
        let (target, status, notes) = match self {
            Self::Approve { notes } => (ModerationStatus::Approved, AdStatus::Active, clean(notes)),
            Self::Reject { notes } => {
                let notes = clean(notes).ok_or(ModerationError::MissingReason)?;
                (ModerationStatus::Rejected, AdStatus::Inactive, Some(notes))
            }
        };

        let moderation_status = current.transition(target)?;
        Ok(ModerationOutcome { moderation_status, status, notes })
    }
}

fn clean(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ModerationStatus::*;

    #[test]
    fn pending_ads_can_be_approved_or_rejected() {
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
    }

    #[test]
    fn decided_ads_only_return_to_pending() {
        assert!(Approved.can_transition_to(Pending));
        assert!(Rejected.can_transition_to(Pending));
        assert_eq!(
            Approved.transition(Rejected),
            Err(TransitionError { from: Approved, to: Rejected })
        );
        assert!(Rejected.transition(Approved).is_err());
        assert!(Pending.transition(Pending).is_err());
    }

    #[test]
    fn approval_activates_and_keeps_optional_note() {
        let out = ModerationDecision::Approve { notes: Some("  ".into()) }
            .resolve(Pending)
            .unwrap();
        assert_eq!(out.moderation_status, Approved);
        assert_eq!(out.status, AdStatus::Active);
        assert_eq!(out.notes, None);
    }

    #[test]
    fn rejection_requires_message() {
        let err = ModerationDecision::Reject { notes: Some(" \n".into()) }
            .resolve(Pending)
            .unwrap_err();
        assert_eq!(err, ModerationError::MissingReason);

        let out = ModerationDecision::Reject { notes: Some(" Photos floues ".into()) }
            .resolve(Pending)
            .unwrap();
        assert_eq!(out.status, AdStatus::Inactive);
        assert_eq!(out.notes.as_deref(), Some("Photos floues"));
    }

    #[test]
    fn rejecting_an_approved_ad_is_refused() {
        let err = ModerationDecision::Reject { notes: Some("spam".into()) }
            .resolve(Approved)
            .unwrap_err();
        assert!(matches!(err, ModerationError::Transition(_)));
    }

    #[test]
    fn decision_parses_from_tagged_json() {
        let d: ModerationDecision =
            serde_json::from_str(r#"{"decision":"reject","notes":"doublon"}"#).unwrap();
        assert!(matches!(d, ModerationDecision::Reject { notes: Some(ref n) } if n == "doublon"));
        let d: ModerationDecision = serde_json::from_str(r#"{"decision":"approve"}"#).unwrap();
        assert!(matches!(d, ModerationDecision::Approve { notes: None }));
    }
}
