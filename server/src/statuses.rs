pub use crate::model::Status;
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};

/// Which status catalog to consult. Tweets and comments keep separate catalogs,
/// so a slug valid for one may be unknown to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Tweet,
    Comment,
}

impl Catalog {
    pub(crate) fn table(self) -> &'static str {
        match self {
            Catalog::Tweet => "tweet_statuses",
            Catalog::Comment => "comment_statuses",
        }
    }
}

fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<Status> {
    Ok(Status {
        id: row.get(0)?,
        slug: row.get(1)?,
        display_name: row.get(2)?,
    })
}

/// Look up a status by slug.
pub fn get_status(conn: &Connection, catalog: Catalog, slug: &str) -> Result<Status> {
    let sql = format!(
        "SELECT id, slug, status_name FROM {} WHERE slug = ?1",
        catalog.table()
    );
    conn.query_row(&sql, [slug], row_to_status)
        .optional()?
        .ok_or(Error::NotFound("status_not_found"))
}

pub fn list_statuses(conn: &Connection, catalog: Catalog) -> Result<Vec<Status>> {
    let sql = format!(
        "SELECT id, slug, status_name FROM {} ORDER BY id",
        catalog.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let statuses = stmt
        .query_map([], row_to_status)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(statuses)
}
