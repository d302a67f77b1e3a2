use super::{KeyValueStore, MemoryStore, StoredValue};
use crate::error::StoreError;
use anyhow::{Context, Result};
use sqlx::{ConnectOptions, Pool, Row, Sqlite, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};

const KIND_TEXT: &str = "text";
const KIND_SET: &str = "set";

enum WriteOp {
    Put { key: String, kind: &'static str, value: String },
    Remove { key: String },
    Flush(oneshot::Sender<()>),
}

/// SQLite-backed [`KeyValueStore`].
///
/// All rows are loaded into an in-memory mirror on open. Reads are served
/// from the mirror; writes update the mirror immediately and are committed
/// in order by a background task.
pub struct SqliteStore {
    mirror: MemoryStore,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite:{}", db_path.as_ref().to_string_lossy());

        let connection_options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connection_options)
            .await
            .context("Failed to connect to SQLite")?;

        initialize_schema(&pool).await?;
        let values = load_values(&pool).await?;
        tracing::debug!(keys = values.len(), "Loaded key-value store");

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(pool, rx));

        Ok(Self {
            mirror: MemoryStore::from_values(values),
            writes,
        })
    }

    /// Waits until every write issued so far has been committed.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.writes
            .send(WriteOp::Flush(tx))
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    fn enqueue(&self, op: WriteOp) -> Result<(), StoreError> {
        self.writes.send(op).map_err(|_| StoreError::Closed)
    }
}

async fn initialize_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            kind TEXT NOT NULL, -- text, set
            value TEXT NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn load_values(pool: &Pool<Sqlite>) -> Result<HashMap<String, StoredValue>> {
    let rows = sqlx::query("SELECT key, kind, value FROM kv")
        .fetch_all(pool)
        .await?;

    let mut values = HashMap::with_capacity(rows.len());
    for row in rows {
        let key: String = row.get(0);
        let kind: String = row.get(1);
        let value: String = row.get(2);
        match kind.as_str() {
            KIND_TEXT => {
                values.insert(key, StoredValue::Text(value));
            }
            KIND_SET => match serde_json::from_str::<BTreeSet<String>>(&value) {
                Ok(set) => {
                    values.insert(key, StoredValue::Set(set));
                }
                Err(e) => tracing::warn!("Skipping unreadable set under {}: {}", key, e),
            },
            other => tracing::warn!("Skipping row {} of unknown kind {}", key, other),
        }
    }
    Ok(values)
}

async fn run_writer(pool: Pool<Sqlite>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        let result = match op {
            WriteOp::Put { key, kind, value } => sqlx::query(
                "INSERT INTO kv (key, kind, value) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value,
                 updated_at = CURRENT_TIMESTAMP",
            )
            .bind(key)
            .bind(kind)
            .bind(value)
            .execute(&pool)
            .await
            .map(|_| ()),
            WriteOp::Remove { key } => sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(key)
                .execute(&pool)
                .await
                .map(|_| ()),
            WriteOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("Store write failed: {}", e);
        }
    }
    pool.close().await;
}

impl KeyValueStore for SqliteStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.mirror.get_string(key)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mirror.put_string(key, value)?;
        self.enqueue(WriteOp::Put {
            key: key.to_string(),
            kind: KIND_TEXT,
            value: value.to_string(),
        })
    }

    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError> {
        self.mirror.get_string_set(key)
    }

    fn put_string_set(&self, key: &str, value: BTreeSet<String>) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value).map_err(|source| StoreError::Encoding {
            key: key.to_string(),
            source,
        })?;
        self.mirror.put_string_set(key, value)?;
        self.enqueue(WriteOp::Put {
            key: key.to_string(),
            kind: KIND_SET,
            value: encoded,
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mirror.remove(key)?;
        self.enqueue(WriteOp::Remove {
            key: key.to_string(),
        })
    }
}
