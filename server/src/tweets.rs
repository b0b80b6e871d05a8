use crate::{
    error::{Error, Result},
    model::{Page, PageRequest, Tweet},
};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

pub const MAX_TWEET_LEN: usize = 140;

/// Listing filters; both are optional and compose.
#[derive(Debug, Clone, Default)]
pub struct TweetFilter {
    /// Exact username of the owner.
    pub user: Option<String>,
    /// Case-insensitive substring of the text.
    pub search: Option<String>,
}

pub(crate) fn validate_text(text: &str, max: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::Invalid("empty_text"));
    }
    if text.chars().count() > max {
        return Err(Error::Invalid("text_too_long"));
    }
    Ok(())
}

pub(crate) fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

const SELECT_TWEET: &str = "SELECT t.id, t.user_id, u.username, t.text, t.created_at, t.updated_at FROM tweets t JOIN users u ON u.id = t.user_id";

fn row_to_tweet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn create_tweet(conn: &Connection, owner: i64, text: &str) -> Result<Tweet> {
    validate_text(text, MAX_TWEET_LEN)?;
    let now = now();
    conn.execute(
        "INSERT INTO tweets (user_id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![owner, text, now],
    )?;
    get_tweet(conn, conn.last_insert_rowid())
}

pub fn get_tweet(conn: &Connection, id: i64) -> Result<Tweet> {
    conn.query_row(&format!("{SELECT_TWEET} WHERE t.id = ?1"), [id], row_to_tweet)
        .optional()?
        .ok_or(Error::NotFound("tweet_not_found"))
}

/// List tweets newest first.
pub fn list_tweets(conn: &Connection, filter: &TweetFilter, page: PageRequest) -> Result<Page<Tweet>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(user) = filter.user.as_deref().filter(|u| !u.is_empty()) {
        args.push(user.to_string());
        clauses.push("u.username = ?{} COLLATE BINARY");
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        args.push(search.to_string());
        clauses.push("instr(lower(t.text), lower(?{})) > 0");
    }
    let mut where_sql = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        where_sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        where_sql.push_str(&clause.replace("{}", &(i + 1).to_string()));
    }

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tweets t JOIN users u ON u.id = t.user_id{where_sql}"),
        rusqlite::params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "{SELECT_TWEET}{where_sql} ORDER BY t.created_at DESC, t.id DESC LIMIT {} OFFSET {}",
        page.limit(),
        page.offset()
    );
    let mut stmt = conn.prepare(&sql)?;
    let tweets = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), row_to_tweet)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(page.wrap(count, tweets))
}

fn owner_of(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row("SELECT user_id FROM tweets WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(Error::NotFound("tweet_not_found"))
}

/// Replace the text of a tweet. Only its owner may do so.
pub fn update_tweet(conn: &Connection, id: i64, actor: i64, text: &str) -> Result<Tweet> {
    if owner_of(conn, id)? != actor {
        return Err(Error::Forbidden);
    }
    validate_text(text, MAX_TWEET_LEN)?;
    conn.execute(
        "UPDATE tweets SET text = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, text, now()],
    )?;
    get_tweet(conn, id)
}

/// Delete a tweet together with its comments and reactions.
pub fn delete_tweet(conn: &Connection, id: i64, actor: i64) -> Result<()> {
    if owner_of(conn, id)? != actor {
        return Err(Error::Forbidden);
    }
    conn.execute("DELETE FROM tweets WHERE id = ?1", [id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, users};

    fn setup() -> (Connection, i64, i64) {
        let conn = db::init_db(":memory:").unwrap();
        let alice = users::create_user(&conn, "alice", "password1").unwrap().id;
        let bob = users::create_user(&conn, "bob", "password1").unwrap().id;
        (conn, alice, bob)
    }

    #[test]
    fn create_and_validate() {
        let (conn, alice, _) = setup();
        assert!(matches!(
            create_tweet(&conn, alice, "   "),
            Err(Error::Invalid("empty_text"))
        ));
        let long = "x".repeat(MAX_TWEET_LEN + 1);
        assert!(matches!(
            create_tweet(&conn, alice, &long),
            Err(Error::Invalid("text_too_long"))
        ));
        // length is counted in characters, not bytes
        let wide = "é".repeat(MAX_TWEET_LEN);
        assert!(create_tweet(&conn, alice, &wide).is_ok());
        let t = create_tweet(&conn, alice, "hello").unwrap();
        assert_eq!(t.username, "alice");
        assert_eq!(t.created_at, t.updated_at);
        assert_eq!(get_tweet(&conn, t.id).unwrap(), t);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let (conn, alice, bob) = setup();
        create_tweet(&conn, alice, "Category 5 storm").unwrap();
        create_tweet(&conn, bob, "a CAT on the mat").unwrap();
        create_tweet(&conn, bob, "dogs only").unwrap();

        let page = list_tweets(
            &conn,
            &TweetFilter {
                search: Some("cat".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.count, 2);

        let page = list_tweets(
            &conn,
            &TweetFilter {
                user: Some("bob".into()),
                search: Some("cat".into()),
            },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].text, "a CAT on the mat");

        // owner filter is exact
        let page = list_tweets(
            &conn,
            &TweetFilter {
                user: Some("BOB".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.count, 0);
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let (conn, alice, _) = setup();
        create_tweet(&conn, alice, "100% sure").unwrap();
        create_tweet(&conn, alice, "plain").unwrap();
        let page = list_tweets(
            &conn,
            &TweetFilter {
                search: Some("%".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.count, 1);
    }

    #[test]
    fn pagination_newest_first() {
        let (conn, alice, _) = setup();
        for i in 0..5 {
            create_tweet(&conn, alice, &format!("t{i}")).unwrap();
        }
        let first = list_tweets(&conn, &TweetFilter::default(), PageRequest::new(Some(1), Some(2), 10)).unwrap();
        assert_eq!(first.count, 5);
        let texts: Vec<_> = first.results.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["t4", "t3"]);
        let last = list_tweets(&conn, &TweetFilter::default(), PageRequest::new(Some(3), Some(2), 10)).unwrap();
        assert_eq!(last.results.len(), 1);
        assert_eq!(last.results[0].text, "t0");
        let past = list_tweets(&conn, &TweetFilter::default(), PageRequest::new(Some(9), Some(2), 10)).unwrap();
        assert!(past.results.is_empty());
    }

    #[test]
    fn only_owner_mutates() {
        let (conn, alice, bob) = setup();
        let t = create_tweet(&conn, alice, "mine").unwrap();
        assert!(matches!(update_tweet(&conn, t.id, bob, "yours"), Err(Error::Forbidden)));
        assert!(matches!(delete_tweet(&conn, t.id, bob), Err(Error::Forbidden)));
        assert_eq!(get_tweet(&conn, t.id).unwrap().text, "mine");

        let edited = update_tweet(&conn, t.id, alice, "edited").unwrap();
        assert_eq!(edited.text, "edited");
        assert!(edited.updated_at >= t.updated_at);

        delete_tweet(&conn, t.id, alice).unwrap();
        assert!(matches!(get_tweet(&conn, t.id), Err(Error::NotFound(_))));
        assert!(matches!(delete_tweet(&conn, t.id, alice), Err(Error::NotFound(_))));
    }
}
