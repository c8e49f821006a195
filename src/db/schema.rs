use rusqlite::{params, Connection};

/// Bumped whenever `migrate` learns a new step.
const SCHEMA_VERSION: i64 = 2;

const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
"#;

const TOPIC_RATINGS_DDL: &str = r#"CREATE TABLE topic_ratings (
    paragraph_id   INTEGER NOT NULL REFERENCES paragraphs(id),
    topic_id       INTEGER NOT NULL REFERENCES topics(id),
    rating         BOOLEAN NOT NULL,
    PRIMARY KEY (paragraph_id, topic_id)
)"#;

/// Maps a stored rating (integer, or legacy "YES"/"NO" text) to 0/1.
const LEGACY_RATING: &str =
    "CASE WHEN typeof(rating) = 'text' THEN upper(trim(rating)) IN ('YES', 'TRUE', '1') ELSE rating <> 0 END";

const TABLES: &[(&str, &str)] = &[
    (
        "articles",
        r#"CREATE TABLE articles (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    url            TEXT UNIQUE NOT NULL,
    title          TEXT NOT NULL,
    raw_html       TEXT NOT NULL,
    processed_html TEXT NOT NULL,
    fetched_at     TEXT DEFAULT (datetime('now'))
)"#,
    ),
    (
        "paragraphs",
        r#"CREATE TABLE paragraphs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id     INTEGER NOT NULL REFERENCES articles(id),
    ordinal        INTEGER,
    paragraph_text TEXT NOT NULL
)"#,
    ),
    (
        "topics",
        r#"CREATE TABLE topics (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id     INTEGER NOT NULL REFERENCES articles(id),
    ordinal        INTEGER,
    topic_text     TEXT NOT NULL
)"#,
    ),
    ("topic_ratings", TOPIC_RATINGS_DDL),
    (
        "summaries",
        r#"CREATE TABLE summaries (
    article_id     INTEGER PRIMARY KEY REFERENCES articles(id),
    summary_text   TEXT NOT NULL
)"#,
    ),
    (
        "summary_ratings",
        r#"CREATE TABLE summary_ratings (
    paragraph_id   INTEGER NOT NULL REFERENCES paragraphs(id),
    article_id     INTEGER NOT NULL REFERENCES articles(id),
    rating         FLOAT NOT NULL,
    PRIMARY KEY (paragraph_id, article_id)
)"#,
    ),
];

const INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_paragraphs_article_ordinal ON paragraphs(article_id, ordinal);
CREATE UNIQUE INDEX IF NOT EXISTS idx_topics_article_ordinal ON topics(article_id, ordinal);
CREATE INDEX IF NOT EXISTS idx_topic_ratings_topic_id ON topic_ratings(topic_id);
CREATE INDEX IF NOT EXISTS idx_summary_ratings_article_id ON summary_ratings(article_id);
"#;

/// Creates whatever tables are missing and brings older stores up to date.
/// Safe to run on every start.
pub fn ensure_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(PRAGMAS)?;

    let tx = conn.transaction()?;
    for (name, ddl) in TABLES {
        if !table_exists(&tx, name)? {
            tracing::info!(table = *name, "Creating table");
            tx.execute_batch(ddl)?;
        }
    }
    migrate(&tx)?;
    tx.execute_batch(INDEXES)?;
    tx.commit()?;
    Ok(())
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    if !column_exists(conn, "articles", "fetched_at")? {
        conn.execute_batch("ALTER TABLE articles ADD COLUMN fetched_at TEXT")?;
    }

    for table in ["paragraphs", "topics"] {
        if !column_exists(conn, table, "ordinal")? {
            tracing::info!(table, "Adding ordinal column");
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN ordinal INTEGER"))?;
        }
        // Rows written before ordinals existed are numbered in insertion order.
        conn.execute_batch(&format!(
            "UPDATE {table} SET ordinal = (
                 SELECT COUNT(*) FROM {table} AS earlier
                 WHERE earlier.article_id = {table}.article_id AND earlier.id < {table}.id
             )
             WHERE ordinal IS NULL"
        ))?;
    }

    // A TEXT-affine rating column would turn 1/0 back into '1'/'0', so it has
    // to be rebuilt rather than updated in place.
    let rating_type = column_type(conn, "topic_ratings", "rating")?.unwrap_or_default();
    if !rating_type.eq_ignore_ascii_case("BOOLEAN") {
        tracing::info!(declared = %rating_type, "Rebuilding topic_ratings with boolean ratings");
        conn.execute_batch(&format!(
            "{}
             INSERT INTO topic_ratings_new (paragraph_id, topic_id, rating)
                 SELECT paragraph_id, topic_id, {LEGACY_RATING}
                 FROM topic_ratings WHERE paragraph_id IS NOT NULL;
             DROP TABLE topic_ratings;
             ALTER TABLE topic_ratings_new RENAME TO topic_ratings;",
            TOPIC_RATINGS_DDL.replace("CREATE TABLE topic_ratings", "CREATE TABLE topic_ratings_new") + ";"
        ))?;
    } else {
        let normalized = conn.execute(
            &format!("UPDATE topic_ratings SET rating = {LEGACY_RATING} WHERE typeof(rating) = 'text'"),
            [],
        )?;
        if normalized > 0 {
            tracing::info!(rows = normalized, "Normalized text topic ratings to booleans");
        }
    }

    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_type(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns
        .into_iter()
        .find(|(name, _)| name == column)
        .map(|(_, ty)| ty))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn creates_every_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        assert_eq!(
            table_names(&conn),
            vec![
                "articles",
                "paragraphs",
                "summaries",
                "summary_ratings",
                "topic_ratings",
                "topics"
            ]
        );
    }

    #[test]
    fn applies_connection_pragmas() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        let busy_timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
        assert_eq!(busy_timeout, 5000);
    }

    #[test]
    fn running_twice_is_harmless() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO articles (url, title, raw_html, processed_html) VALUES ('u', 't', 'r', 'p')",
            [],
        )
        .unwrap();
        ensure_schema(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upgrades_legacy_store() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                raw_html TEXT NOT NULL,
                processed_html TEXT NOT NULL
            );
            CREATE TABLE paragraphs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                paragraph_text TEXT NOT NULL
            );
            CREATE TABLE topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                topic_text TEXT NOT NULL
            );
            CREATE TABLE topic_ratings (
                paragraph_id INTEGER,
                topic_id INTEGER NOT NULL,
                rating TEXT NOT NULL,
                PRIMARY KEY (paragraph_id, topic_id)
            );
            INSERT INTO articles (url, title, raw_html, processed_html) VALUES ('u', 't', 'r', 'p');
            INSERT INTO paragraphs (article_id, paragraph_text) VALUES (1, 'a'), (1, 'b'), (1, 'a'), (1, 'b');
            INSERT INTO topics (article_id, topic_text) VALUES (1, 'x');
            INSERT INTO topic_ratings (paragraph_id, topic_id, rating) VALUES (1, 1, 'YES'), (2, 1, 'no');
            "#,
        )
        .unwrap();

        ensure_schema(&mut conn).unwrap();

        let ordinals: Vec<i64> = conn
            .prepare("SELECT ordinal FROM paragraphs ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);

        let ratings: Vec<i64> = conn
            .prepare("SELECT rating FROM topic_ratings ORDER BY paragraph_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ratings, vec![1, 0]);

        assert!(column_exists(&conn, "articles", "fetched_at").unwrap());
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
