use crate::error::{Error, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| Error::Internal(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued JWTs. `sub` is the user id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Issue a JWT for a user valid for the provided duration.
pub fn issue_jwt(secret: &[u8], user_id: i64, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        return Err(Error::Unauthorized);
    }
    Ok(data.claims)
}

/// Load the token signing secret, generating and persisting one on first use.
pub fn load_or_create_secret(conn: &Connection) -> Result<Vec<u8>> {
    let existing: Option<Vec<u8>> = conn
        .query_row("SELECT jwt_secret FROM config WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    if let Some(secret) = existing {
        return Ok(secret);
    }
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    conn.execute(
        "INSERT OR IGNORE INTO config (id, jwt_secret, created_at) VALUES (1, ?1, ?2)",
        params![secret, OffsetDateTime::now_utc().unix_timestamp()],
    )?;
    // another connection may have won the insert
    let secret = conn.query_row("SELECT jwt_secret FROM config WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok(secret)
}

/// Simple in-memory login rate limiter.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns true if the attempt is allowed, false if rate limited.
    ///
    /// Attempts older than the window are dropped for every key, and keys left
    /// without attempts are removed, so unknown usernames do not accumulate.
    pub async fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        guard.retain(|_, hits| {
            hits.retain(|t| now.duration_since(*t) < self.window);
            !hits.is_empty()
        });
        let entry = guard.entry(key.to_lowercase()).or_default();
        if entry.len() >= self.max {
            return false;
        }
        entry.push(now);
        true
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.inner.lock().await.len()
    }
}
