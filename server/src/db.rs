use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::{path::Path, time::Duration};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Per-connection settings. SQLite keeps these per connection, so every pooled
/// connection needs them, not just the one that ran the schema.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    conn.busy_timeout(Duration::from_secs(5))
}

/// Initialize the SQLite database and run migrations.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a connection pool over the database file, creating the schema first.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    // run the schema on a dedicated connection so pooled ones never race on DDL
    init_db(path)?;
    let manager = SqliteConnectionManager::file(path).with_init(|c| configure(c));
    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE COLLATE NOCASE,
  password_hash TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS config (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  jwt_secret BLOB NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tweets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  text TEXT NOT NULL CHECK (length(text) <= 140),
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tweets_user ON tweets(user_id);

CREATE TABLE IF NOT EXISTS comments (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  tweet_id INTEGER NOT NULL REFERENCES tweets(id) ON DELETE CASCADE,
  user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  text TEXT NOT NULL CHECK (length(text) <= 255),
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_tweet ON comments(tweet_id);

CREATE TABLE IF NOT EXISTS tweet_statuses (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  slug TEXT NOT NULL UNIQUE,
  status_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comment_statuses (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  slug TEXT NOT NULL UNIQUE,
  status_name TEXT NOT NULL
);

INSERT OR IGNORE INTO tweet_statuses (slug, status_name) VALUES ('like', 'Like'), ('dislike', 'Dislike');
INSERT OR IGNORE INTO comment_statuses (slug, status_name) VALUES ('like', 'Like'), ('dislike', 'Dislike');

CREATE TABLE IF NOT EXISTS tweet_reactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  tweet_id INTEGER NOT NULL REFERENCES tweets(id) ON DELETE CASCADE,
  user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  status_id INTEGER NOT NULL REFERENCES tweet_statuses(id) ON DELETE CASCADE,
  UNIQUE (user_id, tweet_id)
);
CREATE INDEX IF NOT EXISTS idx_tweet_reactions_tweet ON tweet_reactions(tweet_id);

CREATE TABLE IF NOT EXISTS comment_reactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  comment_id INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
  user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  status_id INTEGER NOT NULL REFERENCES comment_statuses(id) ON DELETE CASCADE,
  UNIQUE (user_id, comment_id)
);
CREATE INDEX IF NOT EXISTS idx_comment_reactions_comment ON comment_reactions(comment_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_seeds_catalogs() {
        let conn = init_db(":memory:").unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let tweet: i64 = conn
            .query_row("SELECT COUNT(*) FROM tweet_statuses", [], |row| row.get(0))
            .unwrap();
        let comment: i64 = conn
            .query_row("SELECT COUNT(*) FROM comment_statuses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tweet, 2);
        assert_eq!(comment, 2);
    }

    #[test]
    fn foreign_keys_enforced() {
        let conn = init_db(":memory:").unwrap();
        let res = conn.execute(
            "INSERT INTO tweets (user_id, text, created_at, updated_at) VALUES (42, 'x', 0, 0)",
            [],
        );
        assert!(res.is_err());
    }

    #[test]
    fn pool_connections_share_file() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = open_pool(tmp.path().join("nested").join("t.db")).unwrap();
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO users (username, password_hash, created_at) VALUES ('a', 'h', 0)",
                [],
            )
            .unwrap();
        let count: i64 = pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let fk: i64 = pool
            .get()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
