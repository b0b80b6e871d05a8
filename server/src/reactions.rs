//! Like/dislike reconciliation.
//!
//! Each (user, target) pair holds at most one reaction row; the storage layer
//! enforces this with a UNIQUE constraint. Reacting again never adds a row, it
//! overwrites the status of the existing one.

use crate::{
    error::{Error, Result},
    statuses::{self, Catalog, Status},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a reaction is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Tweet(i64),
    Comment(i64),
}

impl Target {
    pub fn id(self) -> i64 {
        match self {
            Target::Tweet(id) | Target::Comment(id) => id,
        }
    }

    pub fn catalog(self) -> Catalog {
        match self {
            Target::Tweet(_) => Catalog::Tweet,
            Target::Comment(_) => Catalog::Comment,
        }
    }

    /// Lowercase noun used in messages and logs.
    pub fn kind(self) -> &'static str {
        match self {
            Target::Tweet(_) => "tweet",
            Target::Comment(_) => "comment",
        }
    }

    fn table(self) -> &'static str {
        match self {
            Target::Tweet(_) => "tweets",
            Target::Comment(_) => "comments",
        }
    }

    fn reaction_table(self) -> &'static str {
        match self {
            Target::Tweet(_) => "tweet_reactions",
            Target::Comment(_) => "comment_reactions",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Target::Tweet(_) => "tweet_id",
            Target::Comment(_) => "comment_id",
        }
    }

    fn not_found(self) -> Error {
        match self {
            Target::Tweet(_) => Error::NotFound("tweet_not_found"),
            Target::Comment(_) => Error::NotFound("comment_not_found"),
        }
    }
}

/// Result of a successful `react` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// First reaction of this user on this target.
    Created,
    /// The existing reaction now carries the requested status.
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub target: Target,
    pub user_id: i64,
    pub status: Status,
}

fn ensure_target(conn: &Connection, target: Target) -> Result<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", target.table());
    let found: Option<i64> = conn
        .query_row(&sql, [target.id()], |row| row.get(0))
        .optional()?;
    found.map(|_| ()).ok_or_else(|| target.not_found())
}

/// Record `user_id`'s reaction to `target` with the status named by `slug`.
///
/// Fails with `NotFound` when the target or the slug (looked up in the
/// target's own catalog) does not exist; nothing is written in that case.
pub fn react(conn: &Connection, user_id: i64, target: Target, slug: &str) -> Result<Outcome> {
    ensure_target(conn, target)?;
    let status = statuses::get_status(conn, target.catalog(), slug)?;
    let outcome = record(conn, user_id, target, status.id)?;
    tracing::info!(
        user_id,
        target = target.kind(),
        target_id = target.id(),
        status = %status.slug,
        ?outcome,
        "reaction recorded"
    );
    Ok(outcome)
}

/// Write the reaction row for an already validated status.
///
/// An overwrite that touches no row means the reaction vanished since the
/// lookup, so it is created instead. A constraint failure on that insert with
/// the target gone reports the target as missing.
pub(crate) fn record(conn: &Connection, user_id: i64, target: Target, status_id: i64) -> Result<Outcome> {
    if let Some(id) = find_reaction_id(conn, user_id, target)? {
        if overwrite_status(conn, id, target, status_id)? > 0 {
            return Ok(Outcome::Updated);
        }
    }
    match create_or_overwrite(conn, user_id, target, status_id) {
        Err(err) if err.is_constraint_violation() => {
            ensure_target(conn, target)?;
            Err(err)
        }
        other => other,
    }
}

fn find_reaction_id(conn: &Connection, user_id: i64, target: Target) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE user_id = ?1 AND {} = ?2",
        target.reaction_table(),
        target.column()
    );
    let id = conn
        .query_row(&sql, params![user_id, target.id()], |row| row.get(0))
        .optional()?;
    Ok(id)
}

fn overwrite_status(conn: &Connection, reaction_id: i64, target: Target, status_id: i64) -> Result<usize> {
    let sql = format!(
        "UPDATE {} SET status_id = ?2 WHERE id = ?1",
        target.reaction_table()
    );
    Ok(conn.execute(&sql, params![reaction_id, status_id])?)
}

/// Insert a reaction row. If the uniqueness constraint rejects it, a concurrent
/// request created the row first and it is overwritten instead.
pub(crate) fn create_or_overwrite(
    conn: &Connection,
    user_id: i64,
    target: Target,
    status_id: i64,
) -> Result<Outcome> {
    let sql = format!(
        "INSERT INTO {} ({}, user_id, status_id) VALUES (?1, ?2, ?3)",
        target.reaction_table(),
        target.column()
    );
    match conn.execute(&sql, params![target.id(), user_id, status_id]) {
        Ok(_) => Ok(Outcome::Created),
        Err(e) => {
            let err = Error::from(e);
            if !err.is_constraint_violation() {
                return Err(err);
            }
            // a foreign key failure also lands here; only a row that really
            // exists turns the conflict into an update
            if let Some(id) = find_reaction_id(conn, user_id, target)? {
                if overwrite_status(conn, id, target, status_id)? > 0 {
                    return Ok(Outcome::Updated);
                }
            }
            Err(err)
        }
    }
}

/// Current reaction of a user on a target, if any.
pub fn get_reaction(conn: &Connection, user_id: i64, target: Target) -> Result<Option<Reaction>> {
    let sql = format!(
        "SELECT s.id, s.slug, s.status_name FROM {} r JOIN {} s ON s.id = r.status_id WHERE r.user_id = ?1 AND r.{} = ?2",
        target.reaction_table(),
        target.catalog().table(),
        target.column()
    );
    let status = conn
        .query_row(&sql, params![user_id, target.id()], |row| {
            Ok(Status {
                id: row.get(0)?,
                slug: row.get(1)?,
                display_name: row.get(2)?,
            })
        })
        .optional()?;
    Ok(status.map(|status| Reaction {
        target,
        user_id,
        status,
    }))
}

/// Number of reactions per status display name. Statuses nobody picked are
/// left out.
pub fn status_counts(conn: &Connection, target: Target) -> Result<BTreeMap<String, i64>> {
    ensure_target(conn, target)?;
    let sql = format!(
        "SELECT s.status_name, COUNT(*) FROM {} r JOIN {} s ON s.id = r.status_id WHERE r.{} = ?1 GROUP BY s.id",
        target.reaction_table(),
        target.catalog().table(),
        target.column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([target.id()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (name, count) = row?;
        *counts.entry(name).or_insert(0) += count;
    }
    Ok(counts)
}
