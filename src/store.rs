//! libSQL-backed article store.
//!
//! One table, `articles`, keyed by source URL. Writes are single-statement
//! upserts, so each article is its own commit. Timeline, glossary and summary
//! bullets are stored as JSON text.
//!
//! The store also answers the read-side queries behind the `articles` and
//! `filter-options` commands.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use libsql::{Connection, Database, Row, Value, params};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{NewsError, Result};
use crate::models::{ArticleRecord, Category};

const TABLE: &str = "articles";

/// Every column with its declared type, in select order.
const COLUMNS: &[(&str, &str)] = &[
    ("url", "TEXT PRIMARY KEY NOT NULL"),
    ("original_title", "TEXT"),
    ("generated_title", "TEXT"),
    ("author", "TEXT"),
    ("source_name", "TEXT"),
    ("published_at", "TEXT"),
    ("published_at_normalized", "TEXT"),
    ("description", "TEXT"),
    ("content", "TEXT"),
    ("image_url", "TEXT"),
    ("category", "TEXT"),
    ("timeline_entries", "TEXT"),
    ("glossary_entries", "TEXT"),
    ("summary_bullets", "TEXT"),
    ("content_source_tag", "TEXT"),
    ("last_updated", "TEXT"),
];

fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sort order for [`ArticleQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    TitleAsc,
    TitleDesc,
}

impl SortOrder {
    fn order_by(&self) -> &'static str {
        match self {
            Self::Newest => "published_at_normalized IS NULL, published_at_normalized DESC",
            Self::Oldest => "published_at_normalized IS NULL, published_at_normalized ASC",
            Self::TitleAsc => "LOWER(generated_title) ASC",
            Self::TitleDesc => "LOWER(generated_title) DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "date-desc" => Ok(Self::Newest),
            "oldest" | "date-asc" => Ok(Self::Oldest),
            "title-asc" => Ok(Self::TitleAsc),
            "title-desc" => Ok(Self::TitleDesc),
            other => Err(format!(
                "unknown sort `{other}` (expected newest, oldest, title-asc or title-desc)"
            )),
        }
    }
}

/// Filters for [`ArticleStore::query`]. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub category: Option<Category>,
    /// Case-insensitive substring over titles, description, source and content.
    pub search: Option<String>,
    /// `YYYY-MM`.
    pub month: Option<String>,
    /// Day of month, 1-31.
    pub day: Option<u32>,
    pub sort: SortOrder,
    pub limit: Option<u32>,
}

/// Distinct values available for filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub categories: Vec<String>,
    /// `YYYY-MM`, newest first.
    pub months: Vec<String>,
    pub days_by_month: BTreeMap<String, Vec<u32>>,
    pub all_unique_days: Vec<u32>,
}

/// Storage handle wrapping a libSQL database.
pub struct ArticleStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl ArticleStore {
    /// Open or create a local database file and initialise the schema.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| NewsError::io(parent, e))?;
        }
        let db = libsql::Builder::new_local(path).build().await?;
        Self::from_database(db).await
    }

    /// Connect to a remote libSQL server.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await?;
        Self::from_database(db).await
    }

    /// Open whichever database `config` names: remote when `remote_url` is
    /// set (which then requires `auth_token`), otherwise the local file.
    pub async fn connect(config: &DatabaseConfig, auth_token: Option<&str>) -> Result<Self> {
        match config.remote_url.as_deref() {
            Some(url) => {
                let token = auth_token
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| NewsError::Credentials("TURSO_AUTH_TOKEN".into()))?;
                Self::open_remote(url, token).await
            }
            None => Self::open(&config.path).await,
        }
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        let store = Self { db, conn };
        store.init().await?;
        Ok(store)
    }

    /// Create the table if missing and add any column an older table lacks.
    /// Safe to run repeatedly.
    pub async fn init(&self) -> Result<()> {
        let defs = COLUMNS
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(",\n  ");
        self.conn
            .execute(&format!("CREATE TABLE IF NOT EXISTS {TABLE} (\n  {defs}\n)"), ())
            .await?;

        let existing = self.existing_columns().await?;
        for (name, ty) in COLUMNS.iter().filter(|(n, _)| !existing.contains(*n)) {
            self.conn
                .execute(&format!("ALTER TABLE {TABLE} ADD COLUMN {name} {ty}"), ())
                .await
                .map_err(|e| NewsError::storage(format!("adding column {name} failed: {e}")))?;
            info!(column = name, "Added missing column");
        }

        self.conn
            .execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{TABLE}_published \
                     ON {TABLE} (published_at_normalized)"
                ),
                (),
            )
            .await?;
        Ok(())
    }

    async fn existing_columns(&self) -> Result<BTreeSet<String>> {
        let mut rows = self
            .conn
            .query(&format!("PRAGMA table_info({TABLE})"), ())
            .await?;
        let mut names = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            names.insert(row.get::<String>(1)?);
        }
        Ok(names)
    }

    /// Insert `record`, or overwrite every field of the row with the same URL.
    ///
    /// One statement, so the write is atomic on its own.
    ///
    /// # Arguments
    ///
    /// * `record` - The fully assembled article; `url` is the key
    ///
    /// # Returns
    ///
    /// `Ok(())` once the row is written, or a storage error. Nothing is written
    /// on error.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = ArticleStore::open(Path::new("news_data.db")).await?;
    /// store.upsert(&record).await?;
    /// ```
    #[instrument(level = "debug", skip_all, fields(url = %record.url))]
    pub async fn upsert(&self, record: &ArticleRecord) -> Result<()> {
        let names = column_list();
        let placeholders = (1..=COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = COLUMNS
            .iter()
            .skip(1)
            .map(|(name, _)| format!("{name} = excluded.{name}"))
            .collect::<Vec<_>>()
            .join(",\n  ");
        let sql = format!(
            "INSERT INTO {TABLE} ({names}) VALUES ({placeholders})\n\
             ON CONFLICT(url) DO UPDATE SET\n  {updates}"
        );

        self.conn
            .execute(
                &sql,
                params![
                    record.url.as_str(),
                    record.original_title.as_deref(),
                    record.generated_title.as_str(),
                    record.author.as_deref(),
                    record.source_name.as_deref(),
                    record.published_at.as_deref(),
                    record.published_at_normalized.as_deref(),
                    record.description.as_deref(),
                    record.content.as_str(),
                    record.image_url.as_deref(),
                    record.category.label(),
                    serde_json::to_string(&record.timeline_entries)?,
                    serde_json::to_string(&record.glossary_entries)?,
                    serde_json::to_string(&record.summary_bullets)?,
                    record.content_source_tag.as_str(),
                    record.last_updated.as_str(),
                ],
            )
            .await?;
        debug!("Article upserted");
        Ok(())
    }

    /// Latest normalized published date across all rows, `None` when empty.
    pub async fn latest_processed_date(&self) -> Result<Option<NaiveDate>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT MAX(published_at_normalized) FROM {TABLE} \
                     WHERE published_at_normalized IS NOT NULL AND published_at_normalized != ''"
                ),
                (),
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(opt_text(&row, 0)?.as_deref().and_then(date_prefix))
    }

    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM {TABLE}"), ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    #[cfg(test)]
    pub(crate) async fn get(&self, url: &str) -> Result<Option<ArticleRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {} FROM {TABLE} WHERE url = ?1", column_list()),
                params![url],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Filtered, sorted article list. Every filter value is bound as a parameter.
    #[instrument(level = "debug", skip(self))]
    pub async fn query(&self, q: &ArticleQuery) -> Result<Vec<ArticleRecord>> {
        let mut sql = format!("SELECT {} FROM {TABLE} WHERE 1 = 1", column_list());
        let mut args: Vec<Value> = Vec::new();

        if let Some(category) = q.category {
            sql.push_str(" AND category = ?");
            args.push(Value::Text(category.label().to_string()));
        }
        if let Some(term) = q.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let fields = [
                "original_title",
                "generated_title",
                "description",
                "source_name",
                "content",
            ];
            let clause = fields
                .iter()
                .map(|f| format!("instr(LOWER(COALESCE({f}, '')), ?) > 0"))
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(" AND ({clause})"));
            let needle = term.to_lowercase();
            args.extend(fields.iter().map(|_| Value::Text(needle.clone())));
        }
        if let Some(month) = q.month.as_deref() {
            sql.push_str(" AND substr(published_at_normalized, 1, 7) = ?");
            args.push(Value::Text(month.to_string()));
        }
        if let Some(day) = q.day {
            sql.push_str(" AND CAST(substr(published_at_normalized, 9, 2) AS INTEGER) = ?");
            args.push(Value::Integer(i64::from(day)));
        }
        sql.push_str(&format!(" ORDER BY {}", q.sort.order_by()));
        if let Some(limit) = q.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(i64::from(limit)));
        }

        let mut rows = self.conn.query(&sql, args).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(record_from_row(&row)?);
        }
        debug!(count = out.len(), "Query returned");
        Ok(out)
    }

    /// Every stored article, newest first.
    pub async fn all_newest_first(&self) -> Result<Vec<ArticleRecord>> {
        self.query(&ArticleQuery::default()).await
    }

    /// Distinct categories and date buckets present in the store.
    pub async fn filter_options(&self) -> Result<FilterOptions> {
        let mut categories = BTreeSet::new();
        let mut rows = self
            .conn
            .query(
                &format!("SELECT DISTINCT category FROM {TABLE} WHERE category IS NOT NULL"),
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            if let Some(label) = opt_text(&row, 0)? {
                categories.insert(Category::from_label_or_other(&label).label().to_string());
            }
        }
        categories.insert(Category::Other.label().to_string());

        let mut by_month: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT DISTINCT published_at_normalized FROM {TABLE} \
                     WHERE published_at_normalized IS NOT NULL AND published_at_normalized != ''"
                ),
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let Some(date) = opt_text(&row, 0)?.as_deref().and_then(date_prefix) else {
                continue;
            };
            by_month
                .entry(date.format("%Y-%m").to_string())
                .or_default()
                .insert(chrono::Datelike::day(&date));
        }

        let all_unique_days: BTreeSet<u32> = by_month.values().flatten().copied().collect();
        Ok(FilterOptions {
            categories: categories.into_iter().collect(),
            months: by_month.keys().rev().cloned().collect(),
            days_by_month: by_month
                .into_iter()
                .map(|(month, days)| (month, days.into_iter().collect()))
                .collect(),
            all_unique_days: all_unique_days.into_iter().collect(),
        })
    }
}

fn date_prefix(s: &str) -> Option<NaiveDate> {
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(NewsError::storage(format!(
            "column {idx}: expected text, found {other:?}"
        ))),
    }
}

fn json_column<T: serde::de::DeserializeOwned + Default>(row: &Row, idx: i32) -> Result<T> {
    match opt_text(row, idx)? {
        Some(s) if !s.trim().is_empty() => Ok(serde_json::from_str(&s)?),
        _ => Ok(T::default()),
    }
}

fn record_from_row(row: &Row) -> Result<ArticleRecord> {
    Ok(ArticleRecord {
        url: opt_text(row, 0)?.unwrap_or_default(),
        original_title: opt_text(row, 1)?,
        generated_title: opt_text(row, 2)?.unwrap_or_default(),
        author: opt_text(row, 3)?,
        source_name: opt_text(row, 4)?,
        published_at: opt_text(row, 5)?,
        published_at_normalized: opt_text(row, 6)?,
        description: opt_text(row, 7)?,
        content: opt_text(row, 8)?.unwrap_or_default(),
        image_url: opt_text(row, 9)?,
        category: opt_text(row, 10)?
            .map(|c| Category::from_label_or_other(&c))
            .unwrap_or_default(),
        timeline_entries: json_column(row, 11)?,
        glossary_entries: json_column(row, 12)?,
        summary_bullets: json_column(row, 13)?,
        content_source_tag: opt_text(row, 14)?.unwrap_or_default(),
        last_updated: opt_text(row, 15)?.unwrap_or_default(),
    })
}
