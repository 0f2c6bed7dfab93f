pub mod api;
pub mod events;
pub mod models;
pub mod moderation;
pub mod phone;
pub mod referral;
pub mod search;
