use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::moderation::ModerationStatus;

/// A stored enum column held a value this build does not know about.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    /// Moderators and admins can work the moderation queue.
    pub fn can_moderate(self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner-controlled visibility switch. Ads are never deleted, only disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdStatus {
    Active,
    Inactive,
}

impl AdStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for AdStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(UnknownVariant { kind: "ad status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    /// Whole XAF. `None` means "price on request".
    pub price: Option<i64>,
    pub images: Vec<String>,
    pub status: AdStatus,
    pub moderation_status: ModerationStatus,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<Uuid>,
    pub moderation_notes: Option<String>,
    /// End of the VIP window.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ad {
    pub fn is_vip(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|until| until > now)
    }

    /// Visible to anonymous visitors.
    pub fn is_public(&self) -> bool {
        self.status == AdStatus::Active && self.moderation_status == ModerationStatus::Approved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub ad_id: Option<Uuid>,
    pub participants: [Uuid; 2],
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub attachments: Vec<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralCode {
    pub code: String,
    pub user_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPoints {
    pub level1_points: i64,
    pub level2_points: i64,
}

impl ReferralPoints {
    pub fn total(&self) -> i64 {
        self.level1_points + self.level2_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ad() -> Ad {
        let now = Utc::now();
        Ad {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Villa".into(),
            description: String::new(),
            category: "immobilier".into(),
            location: "Douala".into(),
            price: None,
            images: vec![],
            status: AdStatus::Active,
            moderation_status: ModerationStatus::Pending,
            moderated_at: None,
            moderated_by: None,
            moderation_notes: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn vip_window_is_exclusive_at_expiry() {
        let now = Utc::now();
        let mut a = ad();
        assert!(!a.is_vip(now));
        a.expires_at = Some(now);
        assert!(!a.is_vip(now));
        a.expires_at = Some(now + Duration::seconds(1));
        assert!(a.is_vip(now));
    }

    #[test]
    fn only_approved_active_ads_are_public() {
        let mut a = ad();
        assert!(!a.is_public());
        a.moderation_status = ModerationStatus::Approved;
        assert!(a.is_public());
        a.status = AdStatus::Inactive;
        assert!(!a.is_public());
    }

    #[test]
    fn other_participant_requires_membership() {
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Conversation {
            id: Uuid::new_v4(),
            ad_id: None,
            participants: [x, y],
            created_at: Utc::now(),
        };
        assert_eq!(conv.other_participant(x), Some(y));
        assert_eq!(conv.other_participant(y), Some(x));
        assert_eq!(conv.other_participant(Uuid::new_v4()), None);
    }

    #[test]
    fn plain_users_cannot_moderate() {
        assert!(!Role::User.can_moderate());
        assert!(Role::Moderator.can_moderate());
        assert!(Role::Admin.can_moderate());
        assert!("root".parse::<Role>().is_err());
    }
}
