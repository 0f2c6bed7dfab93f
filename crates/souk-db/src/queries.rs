use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use souk_types::models::{AdStatus, ReferralPoints, Role};
use souk_types::moderation::{ModerationOutcome, ModerationStatus};
use souk_types::referral::{self, LEVEL1_POINTS, LEVEL2_POINTS};
use souk_types::search::match_key;

use crate::models::{
    AdContent, AdRow, ConversationRow, ConversationSummaryRow, MessageRow, NewProfile, ProfileRow,
    ReferralCodeRow,
};
use crate::{Database, to_db_time};

const PROFILE_COLUMNS: &str = "id, email, phone, full_name, password, role, created_at";

const AD_COLUMNS: &str = "id, user_id, title, description, category, location, price, images, \
     status, moderation_status, moderated_at, moderated_by, moderation_notes, expires_at, \
     created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, recipient_id, content, attachments, is_read, created_at";

impl Database {
    // -- Profiles --

    /// Creates a profile with its own referral code, and records who referred
    /// it when `referrer` is `Some((referrer_id, code))`. Returns the new
    /// profile's referral code.
    pub fn create_profile(
        &self,
        profile: &NewProfile<'_>,
        referrer: Option<(&str, &str)>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let created_at = to_db_time(now);

            tx.execute(
                "INSERT INTO profiles (id, email, phone, full_name, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'user', ?6)",
                params![
                    profile.id,
                    profile.email,
                    profile.phone,
                    profile.full_name,
                    profile.password_hash,
                    created_at
                ],
            )?;

            let code = unused_referral_code(&tx)?;
            tx.execute(
                "INSERT INTO referral_codes (code, user_id, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
                params![code, profile.id, created_at],
            )?;

            if let Some((referrer_id, referrer_code)) = referrer {
                insert_referral(&tx, profile.id, referrer_id, referrer_code, &created_at)?;
            }

            tx.commit()?;
            Ok(code)
        })
    }

    pub fn get_profile_by_id(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "id", id))
    }

    pub fn get_profile_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "email", email))
    }

    /// Phone-to-email resolution for phone sign-in. `phone` must already be
    /// normalized.
    pub fn email_for_phone(&self, phone: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT email FROM profiles WHERE phone = ?1", [phone], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    pub fn get_display_name(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT full_name FROM profiles WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    /// Returns how many profiles changed role.
    pub fn promote_by_email(&self, emails: &[String], role: Role) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let mut changed = 0;
            for email in emails {
                changed += conn.execute(
                    "UPDATE profiles SET role = ?1 WHERE email = ?2 AND role != ?1",
                    params![role.as_str(), email],
                )?;
            }
            Ok(changed)
        })
    }

    // -- Ads --

    pub fn insert_ad(
        &self,
        id: &str,
        user_id: &str,
        content: &AdContent<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let images = serde_json::to_string(content.images)?;
        let ts = to_db_time(now);
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO ads (id, user_id, title, description, category, location, price, images,
                                  status, moderation_status, created_at, updated_at,
                                  category_key, location_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', 'pending', ?9, ?9, ?10, ?11)",
                params![
                    id,
                    user_id,
                    content.title,
                    content.description,
                    content.category,
                    content.location,
                    content.price,
                    images,
                    ts,
                    match_key(content.category),
                    match_key(content.location)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_ad(&self, id: &str) -> Result<Option<AdRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {AD_COLUMNS} FROM ads WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], ad_from_row).optional()?)
        })
    }

    /// Approved, active ads, newest first. Equality filters are pushed down
    /// here against the stored match keys; free-text and price filtering
    /// happen in memory on the page.
    pub fn list_public_ads(
        &self,
        category: Option<&str>,
        location: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AdRow>> {
        let category = category.map(match_key);
        let location = location.map(match_key);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {AD_COLUMNS} FROM ads
                 WHERE moderation_status = 'approved' AND status = 'active'
                   AND (?1 IS NULL OR category_key = ?1)
                   AND (?2 IS NULL OR location_key = ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![category, location, limit, offset], ad_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_ads_by_owner(&self, user_id: &str) -> Result<Vec<AdRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {AD_COLUMNS} FROM ads WHERE user_id = ?1 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], ad_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Owner edit. The ad goes back to the moderation queue and the previous
    /// decision (notes, moderator, time) is cleared.
    pub fn update_ad_content(
        &self,
        id: &str,
        content: &AdContent<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let images = serde_json::to_string(content.images)?;
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE ads SET title = ?2, description = ?3, category = ?4, location = ?5,
                                price = ?6, images = ?7, moderation_status = 'pending',
                                moderation_notes = NULL, moderated_at = NULL, moderated_by = NULL,
                                category_key = ?9, location_key = ?10, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id,
                    content.title,
                    content.description,
                    content.category,
                    content.location,
                    content.price,
                    images,
                    to_db_time(now),
                    match_key(content.category),
                    match_key(content.location)
                ],
            )?;
            Ok(n == 1)
        })
    }

    pub fn set_ad_status(&self, id: &str, status: AdStatus, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE ads SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), to_db_time(now)],
            )?;
            Ok(n == 1)
        })
    }

    pub fn set_vip_until(&self, id: &str, until: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE ads SET expires_at = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, to_db_time(until), to_db_time(now)],
            )?;
            Ok(n == 1)
        })
    }

    // -- Moderation --

    /// Pending ads, oldest first.
    pub fn moderation_queue(&self, limit: u32) -> Result<Vec<AdRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {AD_COLUMNS} FROM ads
                 WHERE moderation_status = 'pending'
                 ORDER BY updated_at ASC
                 LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], ad_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies a moderation decision only if the ad is still in `expected`
    /// state. Returns false when another moderator got there first.
    pub fn moderate_ad(
        &self,
        id: &str,
        expected: ModerationStatus,
        outcome: &ModerationOutcome,
        moderator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let ts = to_db_time(now);
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE ads SET moderation_status = ?3, status = ?4, moderated_at = ?5,
                                moderated_by = ?6, moderation_notes = ?7, updated_at = ?5
                 WHERE id = ?1 AND moderation_status = ?2",
                params![
                    id,
                    expected.as_str(),
                    outcome.moderation_status.as_str(),
                    outcome.status.as_str(),
                    ts,
                    moderator_id,
                    outcome.notes
                ],
            )?;
            Ok(n == 1)
        })
    }

    // -- Sweeps --

    /// Clears VIP windows that ended before `now`.
    pub fn clear_lapsed_vip(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE ads SET expires_at = NULL WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [to_db_time(now)],
            )?)
        })
    }

    /// Soft-disables approved, active listings not touched since `cutoff`.
    /// Pending ads are left for the moderation queue.
    pub fn deactivate_stale_ads(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE ads SET status = 'inactive', updated_at = ?2
                 WHERE status = 'active' AND moderation_status = 'approved' AND updated_at < ?1",
                params![to_db_time(cutoff), to_db_time(now)],
            )?)
        })
    }

    // -- Conversations --

    /// Returns the conversation between two users about an ad, creating it on
    /// first contact.
    pub fn find_or_create_conversation(
        &self,
        ad_id: &str,
        user_a: &str,
        user_b: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationRow> {
        // Stored ordered so (a, b) and (b, a) hit the same UNIQUE key
        let (a, b) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
        let new_id = Uuid::new_v4().to_string();

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, ad_id, participant_a, participant_b, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id, ad_id, a, b, to_db_time(now)],
            )?;
            let row = conn.query_row(
                "SELECT id, ad_id, participant_a, participant_b, created_at FROM conversations
                 WHERE ad_id = ?1 AND participant_a = ?2 AND participant_b = ?3",
                params![ad_id, a, b],
                conversation_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, ad_id, participant_a, participant_b, created_at
                     FROM conversations WHERE id = ?1",
                    [id],
                    conversation_from_row,
                )
                .optional()?)
        })
    }

    /// Inbox for `user_id`, most recent activity first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.ad_id, a.title,
                        p.id, p.full_name,
                        (SELECT m.content FROM messages m WHERE m.conversation_id = c.id
                         ORDER BY m.created_at DESC LIMIT 1),
                        (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id),
                        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id
                         AND m.recipient_id = ?1 AND m.is_read = 0)
                 FROM conversations c
                 JOIN profiles p
                   ON p.id = CASE WHEN c.participant_a = ?1 THEN c.participant_b ELSE c.participant_a END
                 LEFT JOIN ads a ON a.id = c.ad_id
                 WHERE c.participant_a = ?1 OR c.participant_b = ?1
                 ORDER BY COALESCE(
                     (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id),
                     c.created_at
                 ) DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationSummaryRow {
                        id: row.get(0)?,
                        ad_id: row.get(1)?,
                        ad_title: row.get(2)?,
                        other_user_id: row.get(3)?,
                        other_user_name: row.get(4)?,
                        last_message: row.get(5)?,
                        last_message_at: row.get(6)?,
                        unread: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        attachments: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let attachments = serde_json::to_string(attachments)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content,
                                       attachments, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    id,
                    conversation_id,
                    sender_id,
                    recipient_id,
                    content,
                    attachments,
                    to_db_time(now)
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first, ties on `created_at` broken by id. The cursor is the
    /// `(created_at, id)` of the oldest message of the previous page; without
    /// an id, everything strictly older than `created_at` is returned.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<(&str, Option<&str>)>,
    ) -> Result<Vec<MessageRow>> {
        let before_at = before.map(|(at, _)| at);
        // '' sorts below every id, so a bare timestamp is a strict bound
        let before_id = before.map(|(_, id)| id.unwrap_or(""));
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                   AND (?2 IS NULL OR (created_at, id) < (?2, ?3))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![conversation_id, before_at, before_id, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        recipient_id: row.get(3)?,
                        content: row.get(4)?,
                        attachments: row.get(5)?,
                        is_read: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks everything `reader_id` received in the conversation as read.
    pub fn mark_conversation_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                params![conversation_id, reader_id],
            )?)
        })
    }

    pub fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    // -- Referrals --

    /// Owner of an active referral code. `code` must already be normalized.
    pub fn active_referrer(&self, code: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id FROM referral_codes WHERE code = ?1 AND is_active = 1",
                    [code],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn referral_code_for_user(&self, user_id: &str) -> Result<Option<ReferralCodeRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT code, user_id, is_active, created_at FROM referral_codes WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(ReferralCodeRow {
                            code: row.get(0)?,
                            user_id: row.get(1)?,
                            is_active: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn set_referral_code_active(&self, user_id: &str, active: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE referral_codes SET is_active = ?2 WHERE user_id = ?1",
                params![user_id, active],
            )?;
            Ok(n == 1)
        })
    }

    pub fn referral_points(&self, user_id: &str) -> Result<ReferralPoints> {
        self.with_conn(|conn| {
            let points = conn
                .query_row(
                    "SELECT level1_points, level2_points FROM referral_points WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(ReferralPoints {
                            level1_points: row.get(0)?,
                            level2_points: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(points.unwrap_or_default())
        })
    }

    pub fn referred_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Who referred `user_id`, if anyone.
    pub fn referrer_of(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT referrer_id FROM referrals WHERE referred_id = ?1",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Records a referral for an existing profile and credits points.
    pub fn record_referral(
        &self,
        referred_id: &str,
        referrer_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_referral(&tx, referred_id, referrer_id, code, &to_db_time(now))?;
            tx.commit()?;
            Ok(())
        })
    }
}

/// Inserts the referral event and credits level-1 and level-2 points. The
/// `referred_id` primary key rejects a second referral for the same user, so
/// points are never credited twice. Caller owns the transaction.
fn insert_referral(
    conn: &Connection,
    referred_id: &str,
    referrer_id: &str,
    code: &str,
    ts: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO referrals (referred_id, referrer_id, code, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![referred_id, referrer_id, code, ts],
    )?;

    credit_points(conn, referrer_id, LEVEL1_POINTS, 0, ts)?;

    let grand_referrer: Option<String> = conn
        .query_row(
            "SELECT referrer_id FROM referrals WHERE referred_id = ?1",
            [referrer_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(grand) = grand_referrer {
        credit_points(conn, &grand, 0, LEVEL2_POINTS, ts)?;
    }

    Ok(())
}

fn credit_points(conn: &Connection, user_id: &str, level1: i64, level2: i64, ts: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO referral_points (user_id, level1_points, level2_points, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
             level1_points = level1_points + excluded.level1_points,
             level2_points = level2_points + excluded.level2_points,
             updated_at = excluded.updated_at",
        params![user_id, level1, level2, ts],
    )?;
    Ok(())
}

fn unused_referral_code(conn: &Connection) -> Result<String> {
    let mut rng = rand::rng();
    loop {
        let code = referral::generate_code(&mut rng);
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM referral_codes WHERE code = ?1)",
            [&code],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(code);
        }
    }
}

fn query_profile(conn: &Connection, column: &str, value: &str) -> Result<Option<ProfileRow>> {
    // `column` is one of a fixed set of names chosen by this module
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                email: row.get(1)?,
                phone: row.get(2)?,
                full_name: row.get(3)?,
                password: row.get(4)?,
                role: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn ad_from_row(row: &Row<'_>) -> rusqlite::Result<AdRow> {
    Ok(AdRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        location: row.get(5)?,
        price: row.get(6)?,
        images: row.get(7)?,
        status: row.get(8)?,
        moderation_status: row.get(9)?,
        moderated_at: row.get(10)?,
        moderated_by: row.get(11)?,
        moderation_notes: row.get(12)?,
        expires_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        ad_id: row.get(1)?,
        participant_a: row.get(2)?,
        participant_b: row.get(3)?,
        created_at: row.get(4)?,
    })
}
