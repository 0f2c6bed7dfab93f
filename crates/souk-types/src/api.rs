use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AdStatus, Profile, ReferralPoints, Role};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// `identifier` is either an e-mail address or a phone number.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub token: String,
    pub profile: Profile,
}

// -- Ads --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetAdStatusRequest {
    pub status: AdStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VipRequest {
    pub days: u32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// -- Referrals --

#[derive(Debug, Serialize)]
pub struct ReferralSummary {
    pub code: String,
    pub is_active: bool,
    pub points: ReferralPoints,
    pub total_points: i64,
    pub referred_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralValidation {
    pub code: String,
    pub valid: bool,
}

/// Attach a referrer after sign-up.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimReferralRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferralCodeToggle {
    pub is_active: bool,
}

// -- Messaging --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub ad_id: Uuid,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub ad_id: Option<Uuid>,
    pub ad_title: Option<String>,
    pub other_user_id: Uuid,
    pub other_user_name: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: i64,
}

/// Paging for a conversation, newest first. Pass the `created_at` and `id`
/// of the last message received as `before` and `before_id`.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<u32>,
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total: i64,
}

// -- Media --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub size: u64,
}
