use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, Row, TransactionBehavior, params};
use uuid::Uuid;

use super::{SpliceOperation, SpliceOperationType, SpliceStatus};

const SELECT_COLUMNS: &str = r#"
SELECT
  channel_id,
  operation_id,
  txid,
  kind,
  status,
  amount,
  destination,
  fee_sats,
  script,
  started_at_ms,
  confirmations,
  error,
  previous_local_balance
FROM splice_operations
"#;

/// Journal of splice operations, one row per channel.
#[derive(Debug)]
pub struct SqliteSpliceStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSpliceStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create splice store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert_operation(&mut self, op: &SpliceOperation) -> Result<()> {
        upsert(&self.conn, op)
    }

    pub fn get_operation(&self, channel_id: &str) -> Result<Option<SpliceOperation>> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE channel_id = ?1"),
                params![channel_id],
                operation_from_row,
            )
            .optional()
            .with_context(|| format!("get splice operation {channel_id}"))
    }

    pub fn delete_operation(&mut self, channel_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM splice_operations WHERE channel_id = ?1",
                params![channel_id],
            )
            .with_context(|| format!("delete splice operation {channel_id}"))?;
        Ok(rows == 1)
    }

    pub fn list_operations(&self) -> Result<Vec<SpliceOperation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY channel_id"))
            .context("prepare list splice operations")?;

        let rows = stmt
            .query_map([], operation_from_row)
            .context("query list splice operations")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read splice operation row")?);
        }
        Ok(out)
    }

    /// Makes the journal mirror `operations` exactly. Only for callers that own
    /// the whole journal; sessions write back with [`Self::sync_channel`].
    pub fn replace_all(&mut self, operations: &[SpliceOperation]) -> Result<()> {
        let tx = self.conn.transaction().context("begin transaction")?;
        tx.execute("DELETE FROM splice_operations", [])
            .context("clear splice operations")?;
        for op in operations {
            upsert(&tx, op)?;
        }
        tx.commit().context("commit splice operations")
    }

    /// Writes back one channel's record as a session left it, deleting the row
    /// when the record is gone. Runs under a write lock taken up front so
    /// concurrent sessions touching other channels are never overwritten. A
    /// stored record for the same operation keeps its higher confirmation
    /// count.
    pub fn sync_channel(&mut self, channel_id: &str, op: Option<&SpliceOperation>) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("begin sync of {channel_id}"))?;

        match op {
            Some(op) => {
                let stored = tx
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE channel_id = ?1"),
                        params![channel_id],
                        operation_from_row,
                    )
                    .optional()
                    .with_context(|| format!("read stored splice operation {channel_id}"))?;

                let mut merged = op.clone();
                if let Some(stored) = stored
                    && stored.operation_id == op.operation_id
                    && stored.confirmations > op.confirmations
                {
                    merged.confirmations = stored.confirmations;
                    merged.status = stored.status;
                }
                upsert(&tx, &merged)?;
            }
            None => {
                tx.execute(
                    "DELETE FROM splice_operations WHERE channel_id = ?1",
                    params![channel_id],
                )
                .with_context(|| format!("delete splice operation {channel_id}"))?;
            }
        }

        tx.commit()
            .with_context(|| format!("commit sync of {channel_id}"))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM splice_operations", [])
            .context("clear splice operations")?;
        Ok(())
    }
}

fn upsert(conn: &Connection, op: &SpliceOperation) -> Result<()> {
    let fee_sats = i64::try_from(op.fee).context("fee does not fit sqlite integer")?;
    conn.execute(
        r#"
INSERT INTO splice_operations (
  channel_id,
  operation_id,
  txid,
  kind,
  status,
  amount,
  destination,
  fee_sats,
  script,
  started_at_ms,
  confirmations,
  error,
  previous_local_balance
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
)
ON CONFLICT(channel_id) DO UPDATE SET
  operation_id = excluded.operation_id,
  txid = excluded.txid,
  kind = excluded.kind,
  status = excluded.status,
  amount = excluded.amount,
  destination = excluded.destination,
  fee_sats = excluded.fee_sats,
  script = excluded.script,
  started_at_ms = excluded.started_at_ms,
  confirmations = excluded.confirmations,
  error = excluded.error,
  previous_local_balance = excluded.previous_local_balance
"#,
        params![
            &op.channel_id,
            op.operation_id.to_string(),
            &op.txid,
            kind_to_str(op.kind),
            status_to_str(op.status),
            &op.amount,
            &op.destination,
            fee_sats,
            &op.script,
            op.started_at.timestamp_millis(),
            op.confirmations,
            &op.error,
            &op.previous_local_balance,
        ],
    )
    .with_context(|| format!("upsert splice operation {}", op.channel_id))?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS splice_operations (
  channel_id TEXT PRIMARY KEY,
  operation_id TEXT NOT NULL,
  txid TEXT,
  kind TEXT NOT NULL,
  status TEXT NOT NULL,
  amount TEXT NOT NULL,
  destination TEXT,
  fee_sats INTEGER NOT NULL,
  script TEXT NOT NULL,
  started_at_ms INTEGER NOT NULL,
  confirmations INTEGER NOT NULL,
  error TEXT,
  previous_local_balance TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS splice_operations_status_idx ON splice_operations(status);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn conversion_error(col: usize, ty: rusqlite::types::Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, ty, msg.into())
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<SpliceOperation> {
    use rusqlite::types::Type;

    let operation_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let status: String = row.get(4)?;
    let fee_sats: i64 = row.get(7)?;
    let started_at_ms: i64 = row.get(9)?;
    let confirmations: i64 = row.get(10)?;

    Ok(SpliceOperation {
        channel_id: row.get(0)?,
        operation_id: Uuid::parse_str(&operation_id)
            .map_err(|e| conversion_error(1, Type::Text, format!("invalid operation_id: {e}")))?,
        txid: row.get(2)?,
        kind: kind_from_str(&kind, 3)?,
        status: status_from_str(&status, 4)?,
        amount: row.get(5)?,
        destination: row.get(6)?,
        fee: u64::try_from(fee_sats)
            .map_err(|_| conversion_error(7, Type::Integer, format!("invalid fee_sats {fee_sats}")))?,
        script: row.get(8)?,
        started_at: DateTime::<Utc>::from_timestamp_millis(started_at_ms).ok_or_else(|| {
            conversion_error(9, Type::Integer, format!("invalid started_at_ms {started_at_ms}"))
        })?,
        confirmations: u32::try_from(confirmations).map_err(|_| {
            conversion_error(
                10,
                Type::Integer,
                format!("invalid confirmations {confirmations}"),
            )
        })?,
        error: row.get(11)?,
        previous_local_balance: row.get(12)?,
    })
}

fn kind_to_str(kind: SpliceOperationType) -> &'static str {
    match kind {
        SpliceOperationType::Out => "out",
        SpliceOperationType::In => "in",
    }
}

fn kind_from_str(s: &str, col: usize) -> rusqlite::Result<SpliceOperationType> {
    match s {
        "out" => Ok(SpliceOperationType::Out),
        "in" => Ok(SpliceOperationType::In),
        other => Err(conversion_error(
            col,
            rusqlite::types::Type::Text,
            format!("unknown splice kind: {other}"),
        )),
    }
}

fn status_to_str(status: SpliceStatus) -> &'static str {
    match status {
        SpliceStatus::Pending => "pending",
        SpliceStatus::Executing => "executing",
        SpliceStatus::Confirming => "confirming",
        SpliceStatus::Completed => "completed",
        SpliceStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str, col: usize) -> rusqlite::Result<SpliceStatus> {
    match s {
        "pending" => Ok(SpliceStatus::Pending),
        "executing" => Ok(SpliceStatus::Executing),
        "confirming" => Ok(SpliceStatus::Confirming),
        "completed" => Ok(SpliceStatus::Completed),
        "failed" => Ok(SpliceStatus::Failed),
        other => Err(conversion_error(
            col,
            rusqlite::types::Type::Text,
            format!("unknown splice status: {other}"),
        )),
    }
}
