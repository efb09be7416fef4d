pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::SinkError;

/// Fixed row layout: category, sub-category, name, description, price.
pub type RowValues = [String; 5];

/// Header written once when a partition is created.
pub const HEADER: [&str; 5] = ["Category", "SubCategory", "Name", "Description", "Price"];

/// Position of the dish name (identity) column within [`RowValues`].
pub const IDENTITY_COLUMN: usize = 2;

pub fn header_row() -> RowValues {
    HEADER.map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    Created,
    Existing,
}

/// Named-partition tabular store. Rows are addressed from 1, the header
/// occupying row 1 of every partition.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn ensure_partition(&self, name: &str) -> Result<PartitionStatus, SinkError>;

    async fn append_rows(&self, partition: &str, rows: &[RowValues]) -> Result<(), SinkError>;

    /// Identity cell of every row in row order; index 0 is row 1. Blank
    /// cells come back as `None`.
    async fn read_identity_column(&self, partition: &str) -> Result<Vec<Option<String>>, SinkError>;

    async fn batch_overwrite(&self, partition: &str, updates: &[(usize, RowValues)]) -> Result<(), SinkError>;
}
