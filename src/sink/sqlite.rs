use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{PartitionStatus, RowValues, Sink};
use crate::error::SinkError;

/// SQLite-backed sink. Each restaurant is a logical partition of
/// `partition_rows`, addressed by `row_index` starting at 1.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

pub struct PartitionInfo {
    pub name: String,
    pub rows: usize,
    pub created_at: String,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create sink directory {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open sink database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::Unavailable("sqlite connection poisoned".into()))
    }

    pub fn list_partitions(&self) -> Result<Vec<PartitionInfo>, SinkError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.name, COUNT(r.row_index), p.created_at
                 FROM partitions p
                 LEFT JOIN partition_rows r ON r.partition = p.name
                 GROUP BY p.name
                 ORDER BY p.name",
            )
            .map_err(storage("*"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PartitionInfo {
                    name: row.get(0)?,
                    rows: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(storage("*"))?;
        Ok(rows)
    }

    /// All rows of a partition, header included, with their addresses.
    pub fn read_rows(&self, partition: &str) -> Result<Vec<(usize, RowValues)>, SinkError> {
        let conn = self.conn()?;
        if !partition_exists(&conn, partition)? {
            return Err(SinkError::MissingPartition(partition.to_string()));
        }
        let mut stmt = conn
            .prepare(
                "SELECT row_index, category, sub_category, name, description, price
                 FROM partition_rows WHERE partition = ?1 ORDER BY row_index",
            )
            .map_err(storage(partition))?;
        let rows = stmt
            .query_map(params![partition], |row| {
                Ok((
                    row.get::<_, usize>(0)?,
                    [
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ],
                ))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(storage(partition))?;
        Ok(rows)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS partitions (
            name       TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS partition_rows (
            partition    TEXT NOT NULL REFERENCES partitions(name),
            row_index    INTEGER NOT NULL CHECK(row_index >= 1),
            category     TEXT NOT NULL DEFAULT '',
            sub_category TEXT NOT NULL DEFAULT '',
            name         TEXT NOT NULL DEFAULT '',
            description  TEXT NOT NULL DEFAULT '',
            price        TEXT NOT NULL DEFAULT '',
            updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (partition, row_index)
        );
        ",
    )?;
    Ok(())
}

fn storage(partition: &str) -> impl FnOnce(rusqlite::Error) -> SinkError + '_ {
    move |source| SinkError::Storage {
        partition: partition.to_string(),
        source,
    }
}

fn partition_exists(conn: &Connection, partition: &str) -> Result<bool, SinkError> {
    conn.query_row(
        "SELECT 1 FROM partitions WHERE name = ?1",
        params![partition],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(storage(partition))
}

#[async_trait]
impl Sink for SqliteSink {
    async fn ensure_partition(&self, name: &str) -> Result<PartitionStatus, SinkError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO partitions (name) VALUES (?1)",
                params![name],
            )
            .map_err(storage(name))?;
        Ok(if inserted == 1 {
            PartitionStatus::Created
        } else {
            PartitionStatus::Existing
        })
    }

    async fn append_rows(&self, partition: &str, rows: &[RowValues]) -> Result<(), SinkError> {
        let conn = self.conn()?;
        if !partition_exists(&conn, partition)? {
            return Err(SinkError::MissingPartition(partition.to_string()));
        }
        let tx = conn.unchecked_transaction().map_err(storage(partition))?;
        {
            let next: usize = tx
                .query_row(
                    "SELECT COALESCE(MAX(row_index), 0) + 1 FROM partition_rows WHERE partition = ?1",
                    params![partition],
                    |r| r.get(0),
                )
                .map_err(storage(partition))?;
            let mut stmt = tx
                .prepare(
                    "INSERT INTO partition_rows
                     (partition, row_index, category, sub_category, name, description, price)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(storage(partition))?;
            for (offset, r) in rows.iter().enumerate() {
                stmt.execute(params![partition, next + offset, r[0], r[1], r[2], r[3], r[4]])
                    .map_err(storage(partition))?;
            }
        }
        tx.commit().map_err(storage(partition))?;
        Ok(())
    }

    async fn read_identity_column(&self, partition: &str) -> Result<Vec<Option<String>>, SinkError> {
        let conn = self.conn()?;
        if !partition_exists(&conn, partition)? {
            return Err(SinkError::MissingPartition(partition.to_string()));
        }
        let mut stmt = conn
            .prepare("SELECT row_index, name FROM partition_rows WHERE partition = ?1 ORDER BY row_index")
            .map_err(storage(partition))?;
        let cells = stmt
            .query_map(params![partition], |row| {
                Ok((row.get::<_, usize>(0)?, row.get::<_, String>(1)?))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(storage(partition))?;

        // Gaps in row_index read back as blank cells so positions stay aligned.
        let len = cells.last().map(|(idx, _)| *idx).unwrap_or(0);
        let mut column = vec![None; len];
        for (idx, name) in cells {
            if !name.is_empty() {
                column[idx - 1] = Some(name);
            }
        }
        Ok(column)
    }

    async fn batch_overwrite(&self, partition: &str, updates: &[(usize, RowValues)]) -> Result<(), SinkError> {
        let conn = self.conn()?;
        if !partition_exists(&conn, partition)? {
            return Err(SinkError::MissingPartition(partition.to_string()));
        }
        if let Some((row, _)) = updates.iter().find(|(row, _)| *row == 0) {
            return Err(SinkError::RowOutOfRange {
                partition: partition.to_string(),
                row: *row,
            });
        }
        let tx = conn.unchecked_transaction().map_err(storage(partition))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO partition_rows
                     (partition, row_index, category, sub_category, name, description, price)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(partition, row_index) DO UPDATE SET
                        category = excluded.category,
                        sub_category = excluded.sub_category,
                        name = excluded.name,
                        description = excluded.description,
                        price = excluded.price,
                        updated_at = datetime('now')",
                )
                .map_err(storage(partition))?;
            for (row, r) in updates {
                stmt.execute(params![partition, row, r[0], r[1], r[2], r[3], r[4]])
                    .map_err(storage(partition))?;
            }
        }
        tx.commit().map_err(storage(partition))?;
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::header_row;

    fn row(name: &str, price: &str) -> RowValues {
        ["Kitchen".into(), String::new(), name.into(), String::new(), price.into()]
    }

    #[tokio::test]
    async fn ensure_partition_reports_creation_once() {
        let sink = SqliteSink::open_in_memory().unwrap();
        assert_eq!(sink.ensure_partition("Cafe").await.unwrap(), PartitionStatus::Created);
        assert_eq!(sink.ensure_partition("Cafe").await.unwrap(), PartitionStatus::Existing);
    }

    #[tokio::test]
    async fn append_then_read_identity() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.ensure_partition("Cafe").await.unwrap();
        sink.append_rows("Cafe", &[header_row()]).await.unwrap();
        sink.append_rows("Cafe", &[row("Burger", "5"), row("Fries", "3")])
            .await
            .unwrap();

        let ids = sink.read_identity_column("Cafe").await.unwrap();
        assert_eq!(
            ids,
            vec![Some("Name".into()), Some("Burger".into()), Some("Fries".into())]
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_addressed_row() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.ensure_partition("Cafe").await.unwrap();
        sink.append_rows("Cafe", &[header_row(), row("Burger", "5")])
            .await
            .unwrap();
        sink.batch_overwrite("Cafe", &[(2, row("Burger", "6.50"))])
            .await
            .unwrap();

        let rows = sink.read_rows("Cafe").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0, 2);
        assert_eq!(rows[1].1[4], "6.50");
    }

    #[tokio::test]
    async fn missing_partition_is_an_error() {
        let sink = SqliteSink::open_in_memory().unwrap();
        assert!(matches!(
            sink.read_identity_column("Nowhere").await,
            Err(SinkError::MissingPartition(_))
        ));
        assert!(matches!(
            sink.append_rows("Nowhere", &[row("x", "1")]).await,
            Err(SinkError::MissingPartition(_))
        ));
    }

    #[tokio::test]
    async fn row_zero_is_rejected() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.ensure_partition("Cafe").await.unwrap();
        assert!(matches!(
            sink.batch_overwrite("Cafe", &[(0, row("x", "1"))]).await,
            Err(SinkError::RowOutOfRange { row: 0, .. })
        ));
    }

    #[tokio::test]
    async fn file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/menus.sqlite");
        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.ensure_partition("Cafe").await.unwrap();
            sink.append_rows("Cafe", &[header_row()]).await.unwrap();
        }
        let sink = SqliteSink::open(&path).unwrap();
        let parts = sink.list_partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "Cafe");
        assert_eq!(parts[0].rows, 1);
    }
}
