use crate::{
    auth,
    error::{Error, Result},
    model::User,
};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

const MIN_PASSWORD_LEN: usize = 8;

fn valid_username(name: &str) -> bool {
    (3..=32).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Register a new user. Usernames are unique ignoring case.
pub fn create_user(conn: &Connection, username: &str, password: &str) -> Result<User> {
    if !valid_username(username) {
        return Err(Error::Invalid("invalid_username"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Invalid("weak_password"));
    }
    let hash = auth::hash_password(password)?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let res = conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, hash, now],
    );
    match res {
        Ok(_) => Ok(User {
            id: conn.last_insert_rowid(),
            username: username.into(),
            created_at: now,
        }),
        Err(e) => {
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) {
                Err(Error::Conflict("duplicate_user"))
            } else {
                Err(e.into())
            }
        }
    }
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        "SELECT id, username, created_at FROM users WHERE id = ?1",
        [id],
        row_to_user,
    )
    .optional()?
    .ok_or(Error::NotFound("user_not_found"))
}

/// Check credentials; every mismatch looks the same to the caller.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<User> {
    let found = conn
        .query_row(
            "SELECT id, username, created_at, password_hash FROM users WHERE username = ?1",
            [username],
            |row| Ok((row_to_user(row)?, row.get::<_, String>(3)?)),
        )
        .optional()?;
    match found {
        Some((user, hash)) if auth::verify_password(password, &hash) => Ok(user),
        _ => Err(Error::Unauthorized),
    }
}
