//! SQLite-backed translation store.
//! WAL journal; blocking rusqlite calls run on the blocking pool so async
//! callers never stall a runtime worker.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{StoreError, StoreStats, TranslationRecord, TranslationStore};
use super::Language;

/// SQLite's default bound-parameter limit is 999; leave room for the language.
const MAX_TEXTS_PER_QUERY: usize = 500;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS translations (
        id TEXT PRIMARY KEY,
        source_text TEXT NOT NULL,
        target_lang TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        model TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        last_used INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(source_text, target_lang)
    );
    CREATE INDEX IF NOT EXISTS idx_translations_lang
        ON translations(target_lang);";

const SELECT_COLUMNS: &str =
    "id, source_text, target_lang, translated_text, model, usage_count, last_used, created_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the translation database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %db_path.display(), "translation store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TranslationRecord> {
    let id: String = row.get(0)?;
    let lang: String = row.get(2)?;
    let target_lang = lang
        .parse::<Language>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(TranslationRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        source_text: row.get(1)?,
        target_lang,
        translated_text: row.get(3)?,
        model: row.get(4)?,
        usage_count: row.get(5)?,
        last_used: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl TranslationStore for SqliteStore {
    async fn find_one(
        &self,
        source_text: &str,
        target: Language,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        let source_text = source_text.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM translations
                         WHERE source_text = ?1 AND target_lang = ?2"
                    ),
                    params![source_text, target.as_str()],
                    row_to_record,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn find_many(
        &self,
        source_texts: &[String],
        target: Language,
    ) -> Result<Vec<TranslationRecord>, StoreError> {
        if source_texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts = source_texts.to_vec();
        self.with_conn(move |conn| {
            let mut out = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(MAX_TEXTS_PER_QUERY) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM translations
                     WHERE target_lang = ? AND source_text IN ({placeholders})"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let args = std::iter::once(target.as_str()).chain(chunk.iter().map(String::as_str));
                let rows = stmt.query_map(params_from_iter(args), row_to_record)?;
                for row in rows {
                    out.push(row?);
                }
            }
            debug!(requested = texts.len(), found = out.len(), "store batch lookup");
            Ok(out)
        })
        .await
    }

    async fn insert_one(&self, record: TranslationRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO translations
                 (id, source_text, target_lang, translated_text, model,
                  usage_count, last_used, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.source_text,
                    record.target_lang.as_str(),
                    record.translated_text,
                    record.model,
                    record.usage_count,
                    record.last_used,
                    record.created_at,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateKey {
                    source_text: record.source_text,
                    target_lang: record.target_lang,
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn insert_many(&self, records: Vec<TranslationRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO translations
                     (id, source_text, target_lang, translated_text, model,
                      usage_count, last_used, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for record in &records {
                    inserted += stmt.execute(params![
                        record.id.to_string(),
                        record.source_text,
                        record.target_lang.as_str(),
                        record.translated_text,
                        record.model,
                        record.usage_count,
                        record.last_used,
                        record.created_at,
                    ])?;
                }
            }
            tx.commit()?;
            debug!(requested = records.len(), inserted, "store bulk insert");
            Ok(inserted)
        })
        .await
    }

    async fn increment_usage(&self, source_text: &str, target: Language) -> Result<(), StoreError> {
        let source_text = source_text.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE translations
                 SET usage_count = usage_count + 1, last_used = ?3
                 WHERE source_text = ?1 AND target_lang = ?2",
                params![source_text, target.as_str(), crate::now_unix()],
            )?;
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_lang, COUNT(*) FROM translations GROUP BY target_lang",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            let mut stats = StoreStats::default();
            for row in rows {
                let (lang, count) = row?;
                stats.total += count as u64;
                stats.by_language.insert(lang, count as u64);
            }
            Ok(stats)
        })
        .await
    }
}
