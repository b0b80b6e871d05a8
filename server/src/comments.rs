use crate::{
    error::{Error, Result},
    model::{Comment, Page, PageRequest},
    tweets::{self, now, validate_text},
};
use rusqlite::{params, Connection, OptionalExtension};

pub const MAX_COMMENT_LEN: usize = 255;

const SELECT_COMMENT: &str = "SELECT c.id, c.tweet_id, c.user_id, u.username, c.text, c.created_at, c.updated_at FROM comments c JOIN users u ON u.id = c.user_id";

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        tweet_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Attach a comment to an existing tweet.
pub fn create_comment(conn: &Connection, tweet_id: i64, owner: i64, text: &str) -> Result<Comment> {
    tweets::get_tweet(conn, tweet_id)?;
    validate_text(text, MAX_COMMENT_LEN)?;
    let now = now();
    conn.execute(
        "INSERT INTO comments (tweet_id, user_id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![tweet_id, owner, text, now],
    )?;
    get_comment(conn, conn.last_insert_rowid())
}

pub fn get_comment(conn: &Connection, id: i64) -> Result<Comment> {
    conn.query_row(
        &format!("{SELECT_COMMENT} WHERE c.id = ?1"),
        [id],
        row_to_comment,
    )
    .optional()?
    .ok_or(Error::NotFound("comment_not_found"))
}

/// Comments of a tweet, oldest first. An unknown tweet simply has none.
pub fn list_comments(conn: &Connection, tweet_id: i64, page: PageRequest) -> Result<Page<Comment>> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE tweet_id = ?1",
        [tweet_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COMMENT} WHERE c.tweet_id = ?1 ORDER BY c.created_at, c.id LIMIT ?2 OFFSET ?3"
    ))?;
    let comments = stmt
        .query_map(params![tweet_id, page.limit(), page.offset()], row_to_comment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(page.wrap(count, comments))
}

fn owner_of(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row("SELECT user_id FROM comments WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(Error::NotFound("comment_not_found"))
}

pub fn update_comment(conn: &Connection, id: i64, actor: i64, text: &str) -> Result<Comment> {
    if owner_of(conn, id)? != actor {
        return Err(Error::Forbidden);
    }
    validate_text(text, MAX_COMMENT_LEN)?;
    conn.execute(
        "UPDATE comments SET text = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, text, now()],
    )?;
    get_comment(conn, id)
}

pub fn delete_comment(conn: &Connection, id: i64, actor: i64) -> Result<()> {
    if owner_of(conn, id)? != actor {
        return Err(Error::Forbidden);
    }
    conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, users};

    #[test]
    fn comment_lifecycle() {
        let conn = db::init_db(":memory:").unwrap();
        let alice = users::create_user(&conn, "alice", "password1").unwrap().id;
        let bob = users::create_user(&conn, "bob", "password1").unwrap().id;
        let tweet = tweets::create_tweet(&conn, alice, "root").unwrap();

        assert!(matches!(
            create_comment(&conn, tweet.id + 100, bob, "lost"),
            Err(Error::NotFound("tweet_not_found"))
        ));
        let long = "y".repeat(MAX_COMMENT_LEN + 1);
        assert!(matches!(
            create_comment(&conn, tweet.id, bob, &long),
            Err(Error::Invalid("text_too_long"))
        ));

        let c1 = create_comment(&conn, tweet.id, bob, "first").unwrap();
        let c2 = create_comment(&conn, tweet.id, alice, "second").unwrap();
        assert_eq!(c1.tweet_id, tweet.id);
        assert_eq!(c1.username, "bob");

        let page = list_comments(&conn, tweet.id, PageRequest::default()).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.results, vec![c1.clone(), c2]);
        assert!(list_comments(&conn, tweet.id + 100, PageRequest::default())
            .unwrap()
            .results
            .is_empty());

        assert!(matches!(update_comment(&conn, c1.id, alice, "x"), Err(Error::Forbidden)));
        assert_eq!(update_comment(&conn, c1.id, bob, "fixed").unwrap().text, "fixed");
        assert!(matches!(delete_comment(&conn, c1.id, alice), Err(Error::Forbidden)));
        delete_comment(&conn, c1.id, bob).unwrap();
        assert!(matches!(get_comment(&conn, c1.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn deleting_tweet_removes_comments() {
        let conn = db::init_db(":memory:").unwrap();
        let alice = users::create_user(&conn, "alice", "password1").unwrap().id;
        let tweet = tweets::create_tweet(&conn, alice, "root").unwrap();
        let c = create_comment(&conn, tweet.id, alice, "child").unwrap();
        tweets::delete_tweet(&conn, tweet.id, alice).unwrap();
        assert!(matches!(get_comment(&conn, c.id), Err(Error::NotFound(_))));
    }
}
