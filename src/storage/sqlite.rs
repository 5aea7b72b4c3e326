use crate::document::Node;
use crate::model::{BrandIdentity, ReferenceTable, StorageError};
use crate::storage::{Catalog, DocumentStream};
use chrono::Utc;
use futures::StreamExt;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Documents buffered between the cursor thread and the consumer.
const STREAM_BUFFER: usize = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed vehicle catalog.
///
/// Every operation opens its own connection, so concurrent scans never
/// contend for a shared handle.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    path: PathBuf,
}

impl SqliteStorage {
    /// Opens (or creates) the database and runs migrations.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage = Self {
            path: db_path.as_ref().to_path_buf(),
        };
        let conn = storage.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reference_tables (
                code INTEGER PRIMARY KEY,
                label TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                month_year_id INTEGER NOT NULL,
                brand_code INTEGER,
                brand_name TEXT,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_vehicles_period_brand
                ON vehicles (month_year_id, brand_code);
            ",
        )?;
        Ok(storage)
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        open_connection(&self.path)
    }

    /// Inserts or renames a reference table.
    pub async fn upsert_reference_table(&self, code: i32, label: &str) -> Result<(), StorageError> {
        let label = label.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO reference_tables (code, label, fetched_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(code) DO UPDATE SET
                    label = excluded.label,
                    fetched_at = excluded.fetched_at",
                params![code, label, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    /// Creates the brand document for a period with an empty model list,
    /// replacing whatever was stored before.
    pub async fn upsert_brand(
        &self,
        period: i32,
        code: i32,
        name: &str,
    ) -> Result<(), StorageError> {
        let name = name.to_string();
        let document = serde_json::json!({
            "brandCode": code,
            "brandName": name,
            "monthYearId": period,
            "models": [],
        });
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO vehicles (month_year_id, brand_code, brand_name, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(month_year_id, brand_code) DO UPDATE SET
                    brand_name = excluded.brand_name,
                    document = excluded.document,
                    updated_at = excluded.updated_at",
                params![period, code, name, document.to_string(), Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    /// Appends one model document to a brand. Returns `false` if the brand
    /// has no document in that period.
    pub async fn push_model(
        &self,
        period: i32,
        brand: i32,
        model: &Value,
    ) -> Result<bool, StorageError> {
        let model = model.to_string();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE vehicles
                 SET document = json_insert(document, '$.models[#]', json(?3)), updated_at = ?4
                 WHERE month_year_id = ?1 AND brand_code = ?2",
                params![period, brand, model, Utc::now()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Stores a raw catalog document as-is.
    #[cfg(test)]
    pub fn put_document(&self, period: i32, document: &Value) -> Result<(), StorageError> {
        self.put_raw(
            period,
            document.get("brandCode").and_then(Value::as_i64),
            document.get("brandName").and_then(Value::as_str),
            &document.to_string(),
        )
    }

    /// Stores a row whose document text is taken verbatim.
    #[cfg(test)]
    pub fn put_raw(
        &self,
        period: i32,
        brand_code: Option<i64>,
        brand_name: Option<&str>,
        text: &str,
    ) -> Result<(), StorageError> {
        self.connect()?.execute(
            "INSERT INTO vehicles (month_year_id, brand_code, brand_name, document, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![period, brand_code, brand_name, text, Utc::now()],
        )?;
        Ok(())
    }

    /// Model codes stored for a brand, or `None` when the brand has no
    /// usable document (missing, or without a model list).
    pub async fn stored_model_codes(
        &self,
        period: i32,
        brand: i32,
    ) -> Result<Option<Vec<i32>>, StorageError> {
        self.blocking(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT document FROM vehicles WHERE month_year_id = ?1 AND brand_code = ?2",
                    params![period, brand],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(text) = text else {
                return Ok(None);
            };

            let document = decode_document(&text)?;
            let Some(models) = document.get_list("models") else {
                return Ok(None);
            };
            let mut codes = Vec::with_capacity(models.len());
            for model in models {
                match model.get_i32("modelCode") {
                    Some(code) => codes.push(code),
                    None => debug!(
                        "Unexpected modelCode shape in brand {} period {}",
                        brand, period
                    ),
                }
            }
            Ok(Some(codes))
        })
        .await
    }

    /// Runs `f` on the blocking pool with a fresh connection.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }
}

fn open_connection(path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn decode_document(text: &str) -> Result<Node, StorageError> {
    serde_json::from_str::<Value>(text)
        .map(Node::from)
        .map_err(|e| StorageError::Decode(e.to_string()))
}

/// Feeds query rows into `tx` until the rows run out or the receiver is gone.
fn stream_rows(
    path: &Path,
    period: i32,
    brand: Option<i32>,
    ready: oneshot::Sender<Result<(), StorageError>>,
    tx: mpsc::Sender<Result<Node, StorageError>>,
) {
    let conn = match open_connection(path) {
        Ok(conn) => conn,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let sql = match brand {
        Some(_) => {
            "SELECT document FROM vehicles
             WHERE month_year_id = ?1 AND brand_code = ?2 ORDER BY id"
        }
        None => "SELECT document FROM vehicles WHERE month_year_id = ?1 ORDER BY id",
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };
    let rows = match brand {
        Some(code) => stmt.query(params![period, code]),
        None => stmt.query(params![period]),
    };
    let mut rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    loop {
        let item = match rows.next() {
            Ok(Some(row)) => match row.get::<_, String>(0) {
                Ok(text) => decode_document(&text),
                Err(e) => Err(StorageError::Decode(e.to_string())),
            },
            Ok(None) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                break;
            }
        };
        if tx.blocking_send(item).is_err() {
            debug!("Consumer of period {} dropped, closing cursor", period);
            break;
        }
    }
}

#[async_trait::async_trait]
impl Catalog for SqliteStorage {
    async fn find(&self, period: i32, brand: Option<i32>) -> Result<DocumentStream, StorageError> {
        let path = self.path.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::task::spawn_blocking(move || stream_rows(&path, period, brand, ready_tx, tx));

        ready_rx
            .await
            .map_err(|_| StorageError::Worker("cursor thread exited".into()))??;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn find_one(&self, period: i32, brand: i32) -> Result<Option<Node>, StorageError> {
        self.blocking(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT document FROM vehicles WHERE month_year_id = ?1 AND brand_code = ?2",
                    params![period, brand],
                    |row| row.get(0),
                )
                .optional()?;
            text.map(|t| decode_document(&t)).transpose()
        })
        .await
    }

    async fn find_by_model(&self, period: i32, model: i32) -> Result<Option<Node>, StorageError> {
        self.blocking(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT document FROM vehicles
                     WHERE month_year_id = ?1
                       AND EXISTS (
                           SELECT 1 FROM json_each(vehicles.document, '$.models') AS m
                           WHERE json_extract(m.value, '$.modelCode') = ?2
                       )
                     ORDER BY id LIMIT 1",
                    params![period, model],
                    |row| row.get(0),
                )
                .optional()?;
            text.map(|t| decode_document(&t)).transpose()
        })
        .await
    }

    async fn brands(&self, period: i32) -> Result<Vec<BrandIdentity>, StorageError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT brand_code, brand_name FROM vehicles
                 WHERE month_year_id = ?1 AND brand_code IS NOT NULL AND brand_name IS NOT NULL
                 ORDER BY brand_name ASC",
            )?;
            let rows = stmt.query_map(params![period], |row| {
                Ok(BrandIdentity {
                    code: row.get(0)?,
                    name: row.get(1)?,
                })
            })?;

            let mut brands = Vec::new();
            for brand in rows {
                brands.push(brand?);
            }
            Ok(brands)
        })
        .await
    }

    async fn reference_label(&self, period: i32) -> Result<Option<String>, StorageError> {
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT label FROM reference_tables WHERE code = ?1",
                    params![period],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn reference_tables(&self) -> Result<Vec<ReferenceTable>, StorageError> {
        self.blocking(|conn| {
            let mut stmt =
                conn.prepare("SELECT code, label FROM reference_tables ORDER BY code DESC")?;
            let rows = stmt.query_map([], |row| {
                Ok(ReferenceTable {
                    code: row.get(0)?,
                    label: row.get(1)?,
                })
            })?;

            let mut tables = Vec::new();
            for table in rows {
                tables.push(table?);
            }
            Ok(tables)
        })
        .await
    }

    async fn has_vehicles(&self, period: i32) -> Result<bool, StorageError> {
        self.blocking(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM vehicles WHERE month_year_id = ?1)",
                params![period],
                |row| row.get(0),
            )?)
        })
        .await
    }
}
