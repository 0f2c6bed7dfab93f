use anyhow::Result;
use rusqlite::{Connection, params};
use tracing::info;

use souk_types::search::match_key;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (profiles, ads, messaging)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                phone       TEXT UNIQUE,
                full_name   TEXT NOT NULL,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE ads (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES profiles(id),
                title               TEXT NOT NULL,
                description         TEXT NOT NULL,
                category            TEXT NOT NULL,
                location            TEXT NOT NULL,
                price               INTEGER,
                images              TEXT NOT NULL DEFAULT '[]',
                status              TEXT NOT NULL DEFAULT 'active'
                                    CHECK (status IN ('active', 'inactive')),
                moderation_status   TEXT NOT NULL DEFAULT 'pending'
                                    CHECK (moderation_status IN ('pending', 'approved', 'rejected')),
                moderated_at        TEXT,
                moderated_by        TEXT REFERENCES profiles(id),
                moderation_notes    TEXT,
                expires_at          TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_ads_visible ON ads(moderation_status, status, created_at);
            CREATE INDEX idx_ads_owner ON ads(user_id, created_at);

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                ad_id           TEXT REFERENCES ads(id),
                participant_a   TEXT NOT NULL REFERENCES profiles(id),
                participant_b   TEXT NOT NULL REFERENCES profiles(id),
                created_at      TEXT NOT NULL,
                UNIQUE(ad_id, participant_a, participant_b)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES profiles(id),
                recipient_id    TEXT NOT NULL REFERENCES profiles(id),
                content         TEXT NOT NULL,
                attachments     TEXT NOT NULL DEFAULT '[]',
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_unread ON messages(recipient_id, is_read);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (referrals)");
        conn.execute_batch(
            "
            CREATE TABLE referral_codes (
                code        TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL UNIQUE REFERENCES profiles(id),
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE referrals (
                referred_id TEXT PRIMARY KEY REFERENCES profiles(id),
                referrer_id TEXT NOT NULL REFERENCES profiles(id),
                code        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                CHECK (referred_id != referrer_id)
            );

            CREATE INDEX idx_referrals_referrer ON referrals(referrer_id);

            CREATE TABLE referral_points (
                user_id         TEXT PRIMARY KEY REFERENCES profiles(id),
                level1_points   INTEGER NOT NULL DEFAULT 0,
                level2_points   INTEGER NOT NULL DEFAULT 0,
                updated_at      TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (ad filter keys)");
        conn.execute_batch(
            "
            ALTER TABLE ads ADD COLUMN category_key TEXT NOT NULL DEFAULT '';
            ALTER TABLE ads ADD COLUMN location_key TEXT NOT NULL DEFAULT '';
            CREATE INDEX idx_ads_category_key ON ads(category_key);
            CREATE INDEX idx_ads_location_key ON ads(location_key);
            ",
        )?;

        // SQLite's lower() only folds ASCII, so existing keys are filled here
        let tx = conn.unchecked_transaction()?;
        {
            let mut select = tx.prepare("SELECT id, category, location FROM ads")?;
            let rows = select
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (id, category, location) in rows {
                tx.execute(
                    "UPDATE ads SET category_key = ?2, location_key = ?3 WHERE id = ?1",
                    params![id, match_key(&category), match_key(&location)],
                )?;
            }
        }
        tx.execute("INSERT INTO schema_version (version) VALUES (3)", [])?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
