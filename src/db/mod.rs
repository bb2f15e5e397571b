use crate::errors::{AppError, AppResult};
use crate::models::{CreateEntryPayload, Entry, ListSettings, Record, RecordFilter, RecordKey, UpdateEntryPayload};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn insert_entry(&self, payload: CreateEntryPayload) -> AppResult<Entry> {
        let now = Utc::now();
        let key = payload.key.unwrap_or(RecordKey(now)).normalized()?;
        let title = normalize_title(&payload.title);

        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(1) FROM entries WHERE entry_key = ?1",
            [key.as_storage()],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(AppError::Invalid(format!("an entry already exists at {key}")));
        }

        conn.execute(
            "INSERT INTO entries (entry_key, title, body, thumbnail, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![key.as_storage(), title, payload.body, payload.thumbnail, now.to_rfc3339()],
        )?;

        Ok(Entry {
            key,
            title,
            body: payload.body,
            thumbnail: payload.thumbnail,
            updated_at: now,
        })
    }

    pub fn update_entry(&self, payload: UpdateEntryPayload) -> AppResult<Entry> {
        let now = Utc::now();
        let title = normalize_title(&payload.title);

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE entries SET title = ?1, body = ?2, thumbnail = ?3, updated_at = ?4 WHERE entry_key = ?5",
            params![title, payload.body, payload.thumbnail, now.to_rfc3339(), payload.key.as_storage()],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("no entry at {}", payload.key)));
        }

        Ok(Entry {
            key: payload.key,
            title,
            body: payload.body,
            thumbnail: payload.thumbnail,
            updated_at: now,
        })
    }

    pub fn get_entry(&self, key: &RecordKey) -> AppResult<Option<Entry>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT entry_key, title, body, thumbnail, updated_at FROM entries WHERE entry_key = ?1",
            [key.as_storage()],
            parse_entry_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn count_entries(&self, filter: &RecordFilter) -> AppResult<usize> {
        let (clause, params_vec) = filter_clause(filter);
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(1) FROM entries WHERE 1 = 1{clause}"),
            rusqlite::params_from_iter(params_vec.iter()),
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|error| AppError::Internal(error.to_string()))
    }

    pub fn list_entries(&self, limit: usize, offset: usize, filter: &RecordFilter) -> AppResult<Vec<Record>> {
        let (clause, params_vec) = filter_clause(filter);
        let limit = i64::try_from(limit).map_err(|error| AppError::Invalid(error.to_string()))?;
        let offset = i64::try_from(offset).map_err(|error| AppError::Invalid(error.to_string()))?;

        let conn = self.lock()?;
        let query = format!(
            "SELECT entry_key, title, thumbnail FROM entries WHERE 1 = 1{clause}
             ORDER BY entry_key DESC LIMIT ? OFFSET ?"
        );
        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&limit);
        dyn_params.push(&offset);

        let rows = statement.query_map(rusqlite::params_from_iter(dyn_params), parse_record_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn delete_entry(&self, key: &RecordKey) -> AppResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM entries WHERE entry_key = ?1", [key.as_storage()])?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("no entry at {key}")));
        }
        Ok(())
    }

    pub fn get_settings(&self) -> AppResult<ListSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'list'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => match serde_json::from_str::<ListSettings>(&raw) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    tracing::warn!(error = %error, "stored list settings are unreadable; using defaults");
                    Ok(ListSettings::default())
                }
            },
            None => Ok(ListSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ListSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: ListSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Invalid(format!("invalid settings: {error}")))?;
        settings.validate()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('list', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'list'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('list', ?1, ?2)",
                params![
                    serde_json::to_string(&ListSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

impl RecordStore for Database {
    fn count(&self, filter: &RecordFilter) -> AppResult<usize> {
        self.count_entries(filter)
    }

    fn load_page(&self, limit: usize, offset: usize, filter: &RecordFilter) -> AppResult<Vec<Record>> {
        self.list_entries(limit, offset, filter)
    }

    fn delete(&self, key: &RecordKey) -> AppResult<()> {
        self.delete_entry(key)
    }
}

fn filter_clause(filter: &RecordFilter) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut params_vec = Vec::new();

    if let Some(until) = filter.until {
        clause.push_str(" AND entry_key <= ?");
        params_vec.push(until.as_storage());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|term| !term.is_empty()) {
        clause.push_str(" AND (title LIKE ? ESCAPE '\\' OR body LIKE ? ESCAPE '\\')");
        let pattern = format!("%{}%", escape_like(search));
        params_vec.push(pattern.clone());
        params_vec.push(pattern);
    }

    (clause, params_vec)
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn normalize_title(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        key: parse_key(&row.get::<_, String>(0)?)?,
        title: row.get(1)?,
        thumbnail: row.get(2)?,
    })
}

fn parse_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        key: parse_key(&row.get::<_, String>(0)?)?,
        title: row.get(1)?,
        body: row.get(2)?,
        thumbnail: row.get(3)?,
        updated_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_key(raw: &str) -> rusqlite::Result<RecordKey> {
    parse_time(raw).map(RecordKey)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{CreateEntryPayload, Grouping, ListSettings, RecordFilter, RecordKey, UpdateEntryPayload};
    use crate::store::RecordStore;
    use chrono::{Duration, TimeZone, Utc};

    fn key(raw: &str) -> RecordKey {
        RecordKey::parse(raw).expect("key")
    }

    fn seed(db: &Database, raw: &str, title: &str, body: &str) {
        db.insert_entry(CreateEntryPayload {
            key: Some(key(raw)),
            title: title.to_string(),
            body: body.to_string(),
            thumbnail: None,
        })
        .expect("insert entry");
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn pages_are_newest_first_and_short_at_end() {
        let (_dir, db) = open();
        seed(&db, "2024-01-03T09:00:00Z", "third", "");
        seed(&db, "2024-01-01T09:00:00Z", "first", "");
        seed(&db, "2024-01-02T09:00:00Z", "second", "");

        let filter = RecordFilter::default();
        assert_eq!(db.count(&filter).expect("count"), 3);

        let first = db.load_page(2, 0, &filter).expect("page");
        let titles = first.iter().map(|record| record.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["third", "second"]);

        let rest = db.load_page(2, 2, &filter).expect("page");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].title, "first");
    }

    #[test]
    fn until_filter_is_inclusive() {
        let (_dir, db) = open();
        seed(&db, "2024-02-10T00:00:00Z", "later", "");
        seed(&db, "2024-02-01T00:00:00Z", "boundary", "");
        seed(&db, "2024-01-20T00:00:00Z", "earlier", "");

        let filter = RecordFilter::until(key("2024-02-01T00:00:00Z"));
        assert_eq!(db.count(&filter).expect("count"), 2);
        let page = db.load_page(10, 0, &filter).expect("page");
        assert_eq!(page[0].title, "boundary");
    }

    #[test]
    fn search_matches_title_or_body_and_escapes_wildcards() {
        let (_dir, db) = open();
        seed(&db, "2024-02-10T00:00:00Z", "Hiking trip", "mountains");
        seed(&db, "2024-02-09T00:00:00Z", "Groceries", "bought 100% juice");
        seed(&db, "2024-02-08T00:00:00Z", "Rainy day", "stayed in");

        assert_eq!(db.count(&RecordFilter::search("hiking")).expect("count"), 1);
        assert_eq!(db.count(&RecordFilter::search("MOUNTAIN")).expect("count"), 1);
        assert_eq!(db.count(&RecordFilter::search("100%")).expect("count"), 1);
        assert_eq!(db.count(&RecordFilter::search("%")).expect("count"), 1);
        assert_eq!(db.count(&RecordFilter::search("   ")).expect("count"), 3);
    }

    #[test]
    fn delete_reports_missing_keys() {
        let (_dir, db) = open();
        seed(&db, "2024-02-10T00:00:00Z", "entry", "");

        db.delete(&key("2024-02-10T00:00:00Z")).expect("delete");
        let error = db.delete(&key("2024-02-10T00:00:00Z")).expect_err("already gone");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn entries_round_trip_and_update() {
        let (_dir, db) = open();
        seed(&db, "2024-02-10T00:00:00Z", "  draft  ", "body");

        let loaded = db
            .get_entry(&key("2024-02-10T00:00:00Z"))
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.title, "draft");

        let updated = db
            .update_entry(UpdateEntryPayload {
                key: loaded.key,
                title: "final".to_string(),
                body: "edited".to_string(),
                thumbnail: Some("thumbs/1.png".to_string()),
            })
            .expect("update");
        assert_eq!(updated.title, "final");

        let reloaded = db.get_entry(&loaded.key).expect("get").expect("exists");
        assert_eq!(reloaded.body, "edited");
        assert_eq!(reloaded.thumbnail.as_deref(), Some("thumbs/1.png"));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let (_dir, db) = open();
        seed(&db, "2024-02-10T00:00:00Z", "one", "");
        let error = db
            .insert_entry(CreateEntryPayload {
                key: Some(key("2024-02-10T00:00:00Z")),
                title: "two".to_string(),
                ..CreateEntryPayload::default()
            })
            .expect_err("duplicate");
        assert!(matches!(error, AppError::Invalid(_)));
    }

    #[test]
    fn settings_default_and_merge() {
        let (_dir, db) = open();
        let defaults = db.get_settings().expect("settings");
        assert_eq!(defaults.page_size, 10);
        assert_eq!(defaults.grouping, Grouping::Month);

        let updated = db
            .update_settings(serde_json::json!({ "pageSize": 15 }))
            .expect("update");
        assert_eq!(updated.page_size, 15);
        assert_eq!(updated.grouping, Grouping::Month);

        let error = db
            .update_settings(serde_json::json!({ "pageSize": 0 }))
            .expect_err("zero page size");
        assert!(matches!(error, AppError::Invalid(_)));
        assert_eq!(db.get_settings().expect("settings").page_size, 15);
    }

    #[test]
    fn unreadable_settings_fall_back_to_defaults() {
        let (_dir, db) = open();
        db.update_settings(serde_json::json!({ "pageSize": 4 })).expect("update");
        db.lock()
            .expect("conn")
            .execute("UPDATE settings SET value_json = 'not json' WHERE key = 'list'", [])
            .expect("corrupt settings");

        assert_eq!(db.get_settings().expect("settings"), ListSettings::default());
    }

    #[test]
    fn generated_keys_match_their_stored_form() {
        let (_dir, db) = open();
        let entry = db
            .insert_entry(CreateEntryPayload {
                title: "now".to_string(),
                ..CreateEntryPayload::default()
            })
            .expect("insert entry");

        let page = db.load_page(10, 0, &RecordFilter::default()).expect("page");
        assert_eq!(page[0].key, entry.key);
        assert!(db.get_entry(&entry.key).expect("get").is_some());
        db.delete(&entry.key).expect("delete by returned key");
    }

    #[test]
    fn sub_microsecond_keys_are_truncated_on_insert() {
        let (_dir, db) = open();
        let precise = Utc.with_ymd_and_hms(2024, 2, 10, 8, 0, 0).single().expect("time")
            + Duration::nanoseconds(123_456_789);
        let entry = db
            .insert_entry(CreateEntryPayload {
                key: Some(RecordKey(precise)),
                title: "precise".to_string(),
                ..CreateEntryPayload::default()
            })
            .expect("insert entry");

        assert_eq!(entry.key, key("2024-02-10T08:00:00.123456Z"));
        let page = db.load_page(10, 0, &RecordFilter::default()).expect("page");
        assert_eq!(page[0].key, entry.key);
    }

    #[test]
    fn keys_beyond_year_9999_are_rejected() {
        let (_dir, db) = open();
        let far = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).single().expect("time");
        let error = db
            .insert_entry(CreateEntryPayload {
                key: Some(RecordKey(far)),
                title: "far".to_string(),
                ..CreateEntryPayload::default()
            })
            .expect_err("out of range");
        assert!(matches!(error, AppError::Invalid(_)));
        assert_eq!(db.count(&RecordFilter::default()).expect("count"), 0);
    }
}
