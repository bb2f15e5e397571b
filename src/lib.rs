mod coordinator;
mod db;
mod errors;
mod grouping;
mod models;
mod scheduler;
mod session;
mod store;

pub use crate::coordinator::ListLoadCoordinator;
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult, ErrorKind};
pub use crate::grouping::group_records;
pub use crate::models::{
    Bucket, CreateEntryPayload, Entry, GroupKey, GroupedList, Grouping, ListError, ListEvent, ListSettings,
    ListSnapshot, Marker, Operation, Record, RecordFilter, RecordKey, Row, UpdateEntryPayload,
};
pub use crate::store::RecordStore;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATA_DIR_ENV: &str = "JOURNAL_DATA_DIR";
const DATABASE_FILE: &str = "journal.sqlite";

/// Journal backend: entry storage plus the grouped list the UI renders.
#[derive(Clone)]
pub struct JournalApp {
    db: Arc<Database>,
    loader: ListLoadCoordinator,
}

impl JournalApp {
    /// Opens (or creates) the journal under `data_dir`. Must be called from
    /// within a tokio runtime.
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let db = Arc::new(Database::new(&data_dir.join(DATABASE_FILE))?);
        let settings = db.get_settings()?;
        let store: Arc<dyn RecordStore> = db.clone();
        let loader = ListLoadCoordinator::new(store, settings)?;
        tracing::info!(
            path = %db.path().display(),
            page_size = settings.page_size,
            grouping = settings.grouping.as_str(),
            "journal opened"
        );
        Ok(Self { db, loader })
    }

    pub fn loader(&self) -> &ListLoadCoordinator {
        &self.loader
    }

    pub fn get_entry(&self, key: &RecordKey) -> AppResult<Option<Entry>> {
        self.db.get_entry(key)
    }

    /// Stores a new entry and refreshes the visible window.
    pub async fn create_entry(&self, payload: CreateEntryPayload) -> AppResult<Entry> {
        let db = self.db.clone();
        let entry = scheduler::run_blocking(move || db.insert_entry(payload)).await?;
        self.loader.refresh();
        Ok(entry)
    }

    pub async fn update_entry(&self, payload: UpdateEntryPayload) -> AppResult<Entry> {
        let db = self.db.clone();
        let entry = scheduler::run_blocking(move || db.update_entry(payload)).await?;
        self.loader.refresh();
        Ok(entry)
    }

    pub fn delete_entry(&self, key: RecordKey) {
        self.loader.delete(key);
    }

    /// Starts a word search; results replace the list like any full reload.
    pub fn search(&self, term: &str) {
        self.loader.load_new(RecordFilter::search(term.trim()));
    }

    pub fn settings(&self) -> AppResult<ListSettings> {
        self.db.get_settings()
    }

    /// Persists a partial settings update. Takes effect on the next open.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ListSettings> {
        self.db.update_settings(update)
    }
}

/// Headless driver: opens the journal, loads the first page and prints the
/// rows the presentation layer would render.
pub fn run() -> anyhow::Result<()> {
    let data_dir = default_data_dir().context("resolving data directory")?;
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    init_tracing(&data_dir).map_err(anyhow::Error::msg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let app = JournalApp::open(&data_dir)?;
        let loader = app.loader();
        loader.load_new(RecordFilter::default());
        loader.flush().await?;

        let snapshot = loader.snapshot();
        for row in snapshot.list.rows() {
            match row {
                Row::Bucket(bucket) => {
                    println!("{}", bucket.group_key);
                    for record in &bucket.records {
                        println!("  {}  {}", record.key.date(), record.title);
                    }
                }
                Row::Loading => println!("loading"),
                Row::Empty => println!("No entries yet."),
                Row::Exhausted => println!("(end of journal)"),
            }
        }
        Ok::<(), AppError>(())
    })?;

    Ok(())
}

fn default_data_dir() -> AppResult<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home).join(".journal-list"));
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return Ok(PathBuf::from(home).join(".journal-list"));
        }
    }

    Err(AppError::Invalid(format!(
        "Unable to determine a data directory; set {DATA_DIR_ENV}"
    )))
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "journal.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
