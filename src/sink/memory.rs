use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{PartitionStatus, RowValues, Sink, IDENTITY_COLUMN};
use crate::error::SinkError;

/// Process-local sink for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    partitions: Mutex<BTreeMap<String, Vec<RowValues>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<RowValues>>>, SinkError> {
        self.partitions
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink poisoned".into()))
    }

    /// Copy of every partition, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<RowValues>> {
        self.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn rows(&self, partition: &str) -> Option<Vec<RowValues>> {
        self.lock().ok()?.get(partition).cloned()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn ensure_partition(&self, name: &str) -> Result<PartitionStatus, SinkError> {
        let mut parts = self.lock()?;
        if parts.contains_key(name) {
            return Ok(PartitionStatus::Existing);
        }
        parts.insert(name.to_string(), Vec::new());
        Ok(PartitionStatus::Created)
    }

    async fn append_rows(&self, partition: &str, rows: &[RowValues]) -> Result<(), SinkError> {
        let mut parts = self.lock()?;
        let table = parts
            .get_mut(partition)
            .ok_or_else(|| SinkError::MissingPartition(partition.to_string()))?;
        table.extend_from_slice(rows);
        Ok(())
    }

    async fn read_identity_column(&self, partition: &str) -> Result<Vec<Option<String>>, SinkError> {
        let parts = self.lock()?;
        let table = parts
            .get(partition)
            .ok_or_else(|| SinkError::MissingPartition(partition.to_string()))?;
        Ok(table
            .iter()
            .map(|r| Some(r[IDENTITY_COLUMN].clone()).filter(|n| !n.is_empty()))
            .collect())
    }

    async fn batch_overwrite(&self, partition: &str, updates: &[(usize, RowValues)]) -> Result<(), SinkError> {
        let mut parts = self.lock()?;
        let table = parts
            .get_mut(partition)
            .ok_or_else(|| SinkError::MissingPartition(partition.to_string()))?;
        for (row, values) in updates {
            if *row == 0 {
                return Err(SinkError::RowOutOfRange {
                    partition: partition.to_string(),
                    row: *row,
                });
            }
            if table.len() < *row {
                table.resize_with(*row, Default::default);
            }
            table[row - 1] = values.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::header_row;

    #[tokio::test]
    async fn overwrite_past_end_pads_blank_rows() {
        let sink = MemorySink::new();
        sink.ensure_partition("Cafe").await.unwrap();
        sink.append_rows("Cafe", &[header_row()]).await.unwrap();

        let mut row = header_row();
        row[IDENTITY_COLUMN] = "Tea".into();
        sink.batch_overwrite("Cafe", &[(3, row)]).await.unwrap();

        let ids = sink.read_identity_column("Cafe").await.unwrap();
        assert_eq!(ids, vec![Some("Name".into()), None, Some("Tea".into())]);
    }
}
