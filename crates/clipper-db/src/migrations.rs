use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_messages (
            id              TEXT PRIMARY KEY,
            channel_id      TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            username        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            avatar_url      TEXT,
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_channel
            ON chat_messages(channel_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_bans (
            channel_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            reason      TEXT,
            expires_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (channel_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
