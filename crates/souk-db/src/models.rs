//! Database row types. These map directly to SQLite rows and are converted
//! into `souk-types` models at the edge, keeping the DB layer independent.

use anyhow::{Context, Result};
use uuid::Uuid;

use souk_types::models::{Ad, Conversation, Message, Profile, ReferralCode};

use crate::from_db_time;

pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

impl ProfileRow {
    pub fn to_profile(&self) -> Result<Profile> {
        Ok(Profile {
            id: parse_id(&self.id)?,
            email: self.email.clone(),
            phone: self.phone.clone(),
            full_name: self.full_name.clone(),
            role: self.role.parse()?,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

/// Values for a profile insert.
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub full_name: &'a str,
    pub password_hash: &'a str,
}

pub struct AdRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub price: Option<i64>,
    pub images: String,
    pub status: String,
    pub moderation_status: String,
    pub moderated_at: Option<String>,
    pub moderated_by: Option<String>,
    pub moderation_notes: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AdRow {
    pub fn into_ad(self) -> Result<Ad> {
        Ok(Ad {
            id: parse_id(&self.id)?,
            user_id: parse_id(&self.user_id)?,
            images: serde_json::from_str(&self.images)
                .with_context(|| format!("Corrupt images on ad '{}'", self.id))?,
            status: self.status.parse()?,
            moderation_status: self.moderation_status.parse()?,
            moderated_at: self.moderated_at.as_deref().map(from_db_time).transpose()?,
            moderated_by: self.moderated_by.as_deref().map(parse_id).transpose()?,
            expires_at: self.expires_at.as_deref().map(from_db_time).transpose()?,
            created_at: from_db_time(&self.created_at)?,
            updated_at: from_db_time(&self.updated_at)?,
            title: self.title,
            description: self.description,
            category: self.category,
            location: self.location,
            price: self.price,
            moderation_notes: self.moderation_notes,
        })
    }
}

/// Listing content written on create and on owner edits.
pub struct AdContent<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub location: &'a str,
    pub price: Option<i64>,
    pub images: &'a [String],
}

pub struct ConversationRow {
    pub id: String,
    pub ad_id: Option<String>,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: String,
}

impl ConversationRow {
    pub fn to_conversation(&self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id)?,
            ad_id: self.ad_id.as_deref().map(parse_id).transpose()?,
            participants: [parse_id(&self.participant_a)?, parse_id(&self.participant_b)?],
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

/// One line of a user's inbox.
pub struct ConversationSummaryRow {
    pub id: String,
    pub ad_id: Option<String>,
    pub ad_title: Option<String>,
    pub other_user_id: String,
    pub other_user_name: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread: i64,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub attachments: String,
    pub is_read: bool,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            conversation_id: parse_id(&self.conversation_id)?,
            sender_id: parse_id(&self.sender_id)?,
            recipient_id: parse_id(&self.recipient_id)?,
            attachments: serde_json::from_str(&self.attachments)
                .with_context(|| format!("Corrupt attachments on message '{}'", self.id))?,
            is_read: self.is_read,
            created_at: from_db_time(&self.created_at)?,
            content: self.content,
        })
    }
}

pub struct ReferralCodeRow {
    pub code: String,
    pub user_id: String,
    pub is_active: bool,
    pub created_at: String,
}

impl ReferralCodeRow {
    pub fn to_referral_code(&self) -> Result<ReferralCode> {
        Ok(ReferralCode {
            code: self.code.clone(),
            user_id: parse_id(&self.user_id)?,
            is_active: self.is_active,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Corrupt id '{}'", raw))
}
