use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::Config;

// unique: users.username
// unique: memberships (room_id, user_id)
// unique: messages.id, ordered by messages.seq
// unique: reactions (message_id, user_id, emoji)
// unique: direct_pairs.pair_key, the sorted "lo:hi" user pair
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        avatar TEXT,
        is_online INTEGER NOT NULL DEFAULT 0,
        last_seen INTEGER,
        presence_epoch INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        is_private INTEGER NOT NULL DEFAULT 0,
        is_direct INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_by TEXT NOT NULL REFERENCES users(id),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS memberships (
        room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id),
        role TEXT NOT NULL DEFAULT 'member',
        joined_at INTEGER NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        room_id TEXT NOT NULL REFERENCES rooms(id),
        sender_id TEXT NOT NULL REFERENCES users(id),
        content TEXT NOT NULL,
        message_type TEXT NOT NULL,
        attachment TEXT,
        reply_to TEXT REFERENCES messages(id),
        edited INTEGER NOT NULL DEFAULT 0,
        edited_at INTEGER,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, seq)",
    r#"
    CREATE TABLE IF NOT EXISTS reactions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id TEXT NOT NULL REFERENCES messages(id),
        user_id TEXT NOT NULL REFERENCES users(id),
        emoji TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (message_id, user_id, emoji)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS direct_pairs (
        pair_key TEXT PRIMARY KEY,
        room_id TEXT NOT NULL REFERENCES rooms(id)
    )
    "#,
];

pub async fn connect(config: &Config) -> anyhow::Result<SqlitePool> {
    info!("connecting to {}", config.database_url);

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("bad DATABASE_URL {}", config.database_url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;

    run_migrations(&db_pool)
        .await
        .context("failed to run migrations")?;

    Ok(db_pool)
}

/// Applies the schema. Every statement is idempotent.
pub async fn run_migrations(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

/// A private in-memory database with the schema applied.
///
/// Single connection, since every `:memory:` connection is its own database.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&db_pool).await?;
    Ok(db_pool)
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

pub(crate) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(ms: i64) -> Result<OffsetDateTime, sqlx::Error> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

/// Wall clock truncated to the millisecond precision the schema stores.
pub(crate) fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    from_millis(to_millis(now)).unwrap_or(now)
}
