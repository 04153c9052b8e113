//! SQLite-backed shipment store.
//!
//! `house_number` uniqueness is enforced by the schema; every
//! [`WriteBatch`] is applied inside a single transaction. Reads and the
//! commit take separate locks, so each write re-checks what its upload read:
//! updates compare the stored `version`, creates re-check that nothing now
//! owns their key.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};

use crate::core::{ShipmentStore, WriteBatch, WriteOp};
use crate::domain::extraction::{DocumentType, RawExtraction};
use crate::domain::model::{AuditEntry, ShipmentAggregate};
use crate::utils::error::{ReconError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shipments (
    shipment_id   TEXT PRIMARY KEY,
    master_number TEXT,
    house_number  TEXT UNIQUE,
    body          TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    version       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_shipments_master ON shipments(master_number);

-- Every accepted upload, newest last
CREATE TABLE IF NOT EXISTS documents (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    document_type   TEXT NOT NULL,
    manifest_number TEXT NOT NULL,
    master_number   TEXT,
    raw_json        TEXT NOT NULL,
    received_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_lookup ON documents(document_type, manifest_number);

CREATE TABLE IF NOT EXISTS actions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    shipment_id TEXT NOT NULL,
    action      TEXT NOT NULL,
    reason      TEXT NOT NULL,
    editor      TEXT NOT NULL,
    at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_actions_shipment ON actions(shipment_id);
"#;

pub struct SqliteShipmentStore {
    conn: Mutex<Connection>,
}

impl SqliteShipmentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            ReconError::Io(std::io::Error::other("shipment store lock poisoned"))
        })
    }

    fn decode(body: &str) -> Result<ShipmentAggregate> {
        Ok(serde_json::from_str(body)?)
    }

    fn apply_op(tx: &Transaction<'_>, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::Create(aggregate) => {
                Self::check_unclaimed(tx, aggregate)?;
                let body = serde_json::to_string(&**aggregate)?;
                tx.execute(
                    "INSERT INTO shipments (shipment_id, master_number, house_number, body, updated_at, version)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        aggregate.shipment_id,
                        aggregate.master_number,
                        aggregate.house_number,
                        body,
                        aggregate.updated_at.to_rfc3339(),
                        aggregate.version,
                    ],
                )
                .map_err(|e| {
                    if house_number_violation(&e) {
                        ReconError::DuplicateHouseNumber {
                            house_number: aggregate.house_number.clone().unwrap_or_default(),
                        }
                    } else {
                        e.into()
                    }
                })?;
            }
            WriteOp::Update(aggregate) => {
                let body = serde_json::to_string(&**aggregate)?;
                let result = tx.execute(
                    "UPDATE shipments
                     SET master_number = ?2, house_number = ?3, body = ?4, updated_at = ?5, version = ?6
                     WHERE shipment_id = ?1 AND version = ?6 - 1",
                    params![
                        aggregate.shipment_id,
                        aggregate.master_number,
                        aggregate.house_number,
                        body,
                        aggregate.updated_at.to_rfc3339(),
                        aggregate.version,
                    ],
                );
                let changed = match result {
                    Ok(changed) => changed,
                    Err(e) if house_number_violation(&e) => {
                        let house_number = aggregate.house_number.clone().unwrap_or_default();
                        let existing_shipment_id: String = tx.query_row(
                            "SELECT shipment_id FROM shipments WHERE house_number = ?1",
                            params![house_number],
                            |row| row.get(0),
                        )?;
                        return Err(ReconError::Conflict {
                            house_number,
                            existing_shipment_id,
                        });
                    }
                    Err(e) => return Err(e.into()),
                };
                if changed != 1 {
                    let exists = tx
                        .query_row(
                            "SELECT 1 FROM shipments WHERE shipment_id = ?1",
                            params![aggregate.shipment_id],
                            |_| Ok(()),
                        )
                        .optional()?
                        .is_some();
                    return Err(if exists {
                        ReconError::ConcurrentWrite {
                            key: aggregate.shipment_id.clone(),
                        }
                    } else {
                        ReconError::not_found(aggregate.shipment_id.clone())
                    });
                }
            }
            WriteOp::ArchiveDocument {
                extraction,
                received_at,
            } => {
                let manifest_number = extraction.own_number().ok_or_else(|| {
                    ReconError::validation("cannot archive a document without its manifest number")
                })?;
                tx.execute(
                    "INSERT INTO documents (document_type, manifest_number, master_number, raw_json, received_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        extraction.document_type.as_str(),
                        manifest_number,
                        extraction.master_number(),
                        serde_json::to_string(&**extraction)?,
                        received_at.to_rfc3339(),
                    ],
                )?;
            }
            WriteOp::Audit(entry) => {
                tx.execute(
                    "INSERT INTO actions (shipment_id, action, reason, editor, at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        entry.shipment_id,
                        entry.action.as_str(),
                        entry.reason,
                        entry.editor,
                        entry.at.to_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    }
}

impl SqliteShipmentStore {
    /// Re-checks, inside the write transaction, what resolution saw when it
    /// decided to create.
    fn check_unclaimed(tx: &Transaction<'_>, aggregate: &ShipmentAggregate) -> Result<()> {
        let Some(master_number) = aggregate.master_number.as_deref() else {
            return Ok(());
        };

        if aggregate.house_number.is_none() {
            // Master 單獨建立：同號碼已有任何 shipment 就該走更新
            let claimed = tx
                .query_row(
                    "SELECT 1 FROM shipments WHERE master_number = ?1 LIMIT 1",
                    params![master_number],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if claimed {
                return Err(ReconError::ConcurrentWrite {
                    key: master_number.to_string(),
                });
            }
            return Ok(());
        }

        // House 建立時帶入的 Master 必須仍是最新存檔
        let Some(latest) = Self::latest_master_in(tx, master_number)? else {
            return Ok(());
        };
        if aggregate.master_raw.as_ref() != Some(&latest) {
            return Err(ReconError::ConcurrentWrite {
                key: master_number.to_string(),
            });
        }
        Ok(())
    }

    fn latest_master_in(conn: &Connection, master_number: &str) -> Result<Option<RawExtraction>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT raw_json FROM documents
                 WHERE document_type = ?1 AND manifest_number = ?2
                 ORDER BY id DESC LIMIT 1",
                params![DocumentType::Master.as_str(), master_number],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|r| RawExtraction::from_json_str(&r)).transpose()
    }
}

fn house_number_violation(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == ErrorCode::ConstraintViolation
                && message.contains("shipments.house_number")
        }
        _ => false,
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ReconError::validation(format!("invalid stored timestamp '{value}': {e}")))
}

impl ShipmentStore for SqliteShipmentStore {
    async fn find_by_master_number(&self, master_number: &str) -> Result<Vec<ShipmentAggregate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM shipments WHERE master_number = ?1 ORDER BY rowid",
        )?;
        let bodies = stmt
            .query_map(params![master_number], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        bodies.iter().map(|b| Self::decode(b)).collect()
    }

    async fn find_by_house_number(&self, house_number: &str) -> Result<Option<ShipmentAggregate>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM shipments WHERE house_number = ?1",
                params![house_number],
                |row| row.get(0),
            )
            .optional()?;

        body.as_deref().map(Self::decode).transpose()
    }

    async fn find_by_id(&self, shipment_id: &str) -> Result<Option<ShipmentAggregate>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM shipments WHERE shipment_id = ?1",
                params![shipment_id],
                |row| row.get(0),
            )
            .optional()?;

        body.as_deref().map(Self::decode).transpose()
    }

    async fn latest_master_extraction(&self, master_number: &str) -> Result<Option<RawExtraction>> {
        let conn = self.lock()?;
        Self::latest_master_in(&conn, master_number)
    }

    async fn audit_trail(&self, shipment_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT action, reason, editor, at FROM actions WHERE shipment_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![shipment_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(action, reason, editor, at)| -> Result<AuditEntry> {
                Ok(AuditEntry {
                    shipment_id: shipment_id.to_string(),
                    action: action.parse()?,
                    reason,
                    editor,
                    at: parse_timestamp(&at)?,
                })
            })
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for op in batch.ops() {
            // 任何一筆失敗都會在 tx drop 時整批回滾
            Self::apply_op(&tx, op)?;
        }

        tx.commit()?;
        tracing::debug!("Committed batch of {} write(s)", batch.len());
        Ok(())
    }
}
