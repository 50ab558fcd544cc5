use crate::Database;
use crate::models::{BanRow, MessageRow, timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Messages --

    /// Insert a chat message. Returns false when the id was already stored.
    pub fn insert_message(&self, row: &MessageRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chat_messages
                    (id, channel_id, user_id, username, display_name, avatar_url, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.channel_id,
                    row.user_id,
                    row.username,
                    row.display_name,
                    row.avatar_url,
                    row.content,
                    row.created_at,
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Latest `limit` messages of a channel, oldest first.
    pub fn recent_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut rows = query_recent_messages(conn, channel_id, limit)?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Bans --

    /// Ban a user from a channel, replacing any earlier ban.
    /// `expires_at = None` bans permanently.
    pub fn ban_user(
        &self,
        channel_id: &str,
        user_id: &str,
        reason: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let expires_at = expires_at.as_ref().map(timestamp);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO chat_bans (channel_id, user_id, reason, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![channel_id, user_id, reason, expires_at, timestamp(&Utc::now())],
            )?;
            Ok(())
        })
    }

    /// The ban in force at `now`, if any.
    pub fn active_ban(&self, channel_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<BanRow>> {
        let now = timestamp(&now);
        self.with_conn(|conn| {
            let ban = conn
                .query_row(
                    "SELECT channel_id, user_id, reason, expires_at, created_at
                     FROM chat_bans
                     WHERE channel_id = ?1 AND user_id = ?2
                       AND (expires_at IS NULL OR expires_at > ?3)",
                    [channel_id, user_id, now.as_str()],
                    |row| {
                        Ok(BanRow {
                            channel_id: row.get(0)?,
                            user_id: row.get(1)?,
                            reason: row.get(2)?,
                            expires_at: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(ban)
        })
    }

    pub fn is_banned(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.active_ban(channel_id, user_id, Utc::now())?.is_some())
    }

    /// Drop bans that have run out. Returns how many were removed.
    pub fn purge_expired_bans(&self) -> Result<usize> {
        let now = timestamp(&Utc::now());
        self.with_conn(|conn| {
            let purged = conn.execute(
                "DELETE FROM chat_bans WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [now],
            )?;
            Ok(purged)
        })
    }
}

fn query_recent_messages(conn: &Connection, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, channel_id, user_id, username, display_name, avatar_url, content, created_at
         FROM chat_messages
         WHERE channel_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![channel_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                user_id: row.get(2)?,
                username: row.get(3)?,
                display_name: row.get(4)?,
                avatar_url: row.get(5)?,
                content: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
