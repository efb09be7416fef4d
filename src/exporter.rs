use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::model::{Dish, Restaurant};
use crate::sink::{header_row, PartitionStatus, RowValues, Sink, IDENTITY_COLUMN};

/// Dishes split by whether their name already has a row in the partition.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PartitionedDishes {
    /// (row address, new values)
    pub for_update: Vec<(usize, RowValues)>,
    pub for_append: Vec<RowValues>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub created: bool,
    pub updated: usize,
    pub appended: usize,
}

/// Upserts one restaurant's dishes into its own sink partition, matching
/// rows by dish name.
pub struct DiffingExporter {
    sink: Arc<dyn Sink>,
}

impl DiffingExporter {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub async fn export(&self, restaurant: &Restaurant) -> Result<ExportSummary, SinkError> {
        let partition = restaurant.name.as_str();

        let created = self.sink.ensure_partition(partition).await? == PartitionStatus::Created;
        let mut identity = self.sink.read_identity_column(partition).await?;
        // An empty partition gets its header first, also when an earlier
        // export created it but failed before the header landed.
        if identity.is_empty() {
            let header = header_row();
            self.sink.append_rows(partition, &[header.clone()]).await?;
            if created {
                info!(restaurant = %partition, "Created partition");
            } else {
                warn!(restaurant = %partition, "Partition had no header row, wrote it");
            }
            identity.push(Some(header[IDENTITY_COLUMN].clone()));
        }

        let index = index_identity_rows(&identity);
        let parts = partition_dishes(&restaurant.dishes, &index);

        if !parts.for_update.is_empty() {
            self.sink.batch_overwrite(partition, &parts.for_update).await?;
        }
        if !parts.for_append.is_empty() {
            self.sink.append_rows(partition, &parts.for_append).await?;
        }

        let summary = ExportSummary {
            created,
            updated: parts.for_update.len(),
            appended: parts.for_append.len(),
        };
        debug!(
            restaurant = %partition,
            updated = summary.updated,
            appended = summary.appended,
            "Exported dishes"
        );
        Ok(summary)
    }
}

/// Map each dish name to its 1-based row. The first row seen wins when the
/// sink holds duplicates; blank cells are skipped.
pub fn index_identity_rows(column: &[Option<String>]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(column.len());
    for (i, cell) in column.iter().enumerate() {
        if let Some(name) = cell {
            index.entry(name.clone()).or_insert(i + 1);
        }
    }
    index
}

pub fn partition_dishes(dishes: &[Dish], index: &HashMap<String, usize>) -> PartitionedDishes {
    let mut parts = PartitionedDishes::default();
    for dish in dishes {
        let row = row_values(dish);
        match index.get(&dish.name) {
            Some(&addr) => parts.for_update.push((addr, row)),
            None => parts.for_append.push(row),
        }
    }
    parts
}

pub fn row_values(dish: &Dish) -> RowValues {
    [
        dish.category.category.clone(),
        dish.category.sub_category.clone().unwrap_or_default(),
        dish.name.clone(),
        dish.description.clone(),
        dish.price.to_string(),
    ]
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::model::Category;
    use crate::sink::memory::MemorySink;

    fn dish(name: &str, price: i64) -> Dish {
        Dish {
            name: name.into(),
            category: Category::new("Kitchen", None),
            description: String::new(),
            price: Decimal::new(price, 0),
        }
    }

    fn restaurant(dishes: Vec<Dish>) -> Restaurant {
        Restaurant {
            name: "Diner".into(),
            dishes,
        }
    }

    #[test]
    fn existing_names_update_new_names_append() {
        let index: HashMap<String, usize> =
            [("Burger".to_string(), 2), ("Fries".to_string(), 3)].into_iter().collect();
        let parts = partition_dishes(&[dish("Burger", 5), dish("Salad", 6)], &index);

        assert_eq!(parts.for_update.len(), 1);
        assert_eq!(parts.for_update[0].0, 2);
        assert_eq!(parts.for_update[0].1[2], "Burger");
        assert_eq!(parts.for_append.len(), 1);
        assert_eq!(parts.for_append[0][2], "Salad");
    }

    #[test]
    fn first_duplicate_row_wins() {
        let column = vec![
            Some("Name".to_string()),
            Some("Burger".to_string()),
            None,
            Some("Burger".to_string()),
        ];
        let index = index_identity_rows(&column);
        assert_eq!(index.get("Burger"), Some(&2));
        assert_eq!(index.get("Name"), Some(&1));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn row_layout_uses_blanks_for_absent_fields() {
        let d = Dish {
            name: "Soup".into(),
            category: Category::new("Kitchen", Some("Starters".into())),
            description: String::new(),
            price: Decimal::new(1250, 2),
        };
        assert_eq!(row_values(&d), ["Kitchen", "Starters", "Soup", "", "12.50"].map(String::from));

        let plain = dish("Tea", 0);
        assert_eq!(row_values(&plain)[1], "");
        assert_eq!(row_values(&plain)[4], "0");
    }

    #[tokio::test]
    async fn first_export_creates_header_and_rows() {
        let sink = Arc::new(MemorySink::new());
        let exporter = DiffingExporter::new(sink.clone());

        let summary = exporter
            .export(&restaurant(vec![dish("Burger", 5), dish("Fries", 3)]))
            .await
            .unwrap();
        assert_eq!(
            summary,
            ExportSummary {
                created: true,
                updated: 0,
                appended: 2
            }
        );

        let rows = sink.rows("Diner").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], header_row());
        assert_eq!(rows[1][2], "Burger");
    }

    #[tokio::test]
    async fn re_export_is_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let exporter = DiffingExporter::new(sink.clone());
        let r = restaurant(vec![dish("Burger", 5), dish("Fries", 3)]);

        exporter.export(&r).await.unwrap();
        let after_first = sink.snapshot();
        let summary = exporter.export(&r).await.unwrap();

        assert_eq!(sink.snapshot(), after_first);
        assert!(!summary.created);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.appended, 0);
    }

    #[tokio::test]
    async fn changed_price_overwrites_in_place() {
        let sink = Arc::new(MemorySink::new());
        let exporter = DiffingExporter::new(sink.clone());

        exporter
            .export(&restaurant(vec![dish("Burger", 5), dish("Fries", 3)]))
            .await
            .unwrap();
        exporter
            .export(&restaurant(vec![dish("Fries", 4), dish("Salad", 6)]))
            .await
            .unwrap();

        let names: Vec<String> = sink.rows("Diner").unwrap().iter().map(|r| r[2].clone()).collect();
        assert_eq!(names, vec!["Name", "Burger", "Fries", "Salad"]);
        assert_eq!(sink.rows("Diner").unwrap()[2][4], "4");
    }

    /// Counts calls per operation and delegates to an in-memory sink.
    #[derive(Default)]
    struct CountingSink {
        inner: MemorySink,
        appends: AtomicUsize,
        overwrites: AtomicUsize,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn ensure_partition(&self, name: &str) -> Result<PartitionStatus, SinkError> {
            self.inner.ensure_partition(name).await
        }

        async fn append_rows(&self, partition: &str, rows: &[RowValues]) -> Result<(), SinkError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            self.inner.append_rows(partition, rows).await
        }

        async fn read_identity_column(&self, partition: &str) -> Result<Vec<Option<String>>, SinkError> {
            self.inner.read_identity_column(partition).await
        }

        async fn batch_overwrite(&self, partition: &str, updates: &[(usize, RowValues)]) -> Result<(), SinkError> {
            self.overwrites.fetch_add(1, Ordering::SeqCst);
            self.inner.batch_overwrite(partition, updates).await
        }
    }

    #[tokio::test]
    async fn empty_batches_make_no_calls() {
        let sink = Arc::new(CountingSink::default());
        let exporter = DiffingExporter::new(sink.clone());

        // header append + dish append, nothing to overwrite
        exporter.export(&restaurant(vec![dish("Burger", 5)])).await.unwrap();
        assert_eq!(sink.appends.load(Ordering::SeqCst), 2);
        assert_eq!(sink.overwrites.load(Ordering::SeqCst), 0);

        // overwrite only
        exporter.export(&restaurant(vec![dish("Burger", 5)])).await.unwrap();
        assert_eq!(sink.appends.load(Ordering::SeqCst), 2);
        assert_eq!(sink.overwrites.load(Ordering::SeqCst), 1);

        // nothing at all
        exporter.export(&restaurant(Vec::new())).await.unwrap();
        assert_eq!(sink.appends.load(Ordering::SeqCst), 2);
        assert_eq!(sink.overwrites.load(Ordering::SeqCst), 1);
    }

    /// Fails the first `append_rows` call, then delegates.
    #[derive(Default)]
    struct FirstAppendFails {
        inner: MemorySink,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl Sink for FirstAppendFails {
        async fn ensure_partition(&self, name: &str) -> Result<PartitionStatus, SinkError> {
            self.inner.ensure_partition(name).await
        }

        async fn append_rows(&self, partition: &str, rows: &[RowValues]) -> Result<(), SinkError> {
            if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SinkError::Unavailable("connection reset".into()));
            }
            self.inner.append_rows(partition, rows).await
        }

        async fn read_identity_column(&self, partition: &str) -> Result<Vec<Option<String>>, SinkError> {
            self.inner.read_identity_column(partition).await
        }

        async fn batch_overwrite(&self, partition: &str, updates: &[(usize, RowValues)]) -> Result<(), SinkError> {
            self.inner.batch_overwrite(partition, updates).await
        }
    }

    #[tokio::test]
    async fn header_written_after_failed_first_export() {
        let sink = Arc::new(FirstAppendFails::default());
        let exporter = DiffingExporter::new(sink.clone());
        let r = restaurant(vec![dish("Burger", 5)]);

        assert!(exporter.export(&r).await.is_err());
        let summary = exporter.export(&r).await.unwrap();
        assert!(!summary.created);
        assert_eq!(summary.appended, 1);

        let rows = sink.inner.rows("Diner").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], header_row());
        assert_eq!(rows[1][2], "Burger");
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let sink = Arc::new(MemorySink::new());
        let exporter = DiffingExporter::new(sink.clone());

        exporter.export(&restaurant(vec![dish("Burger", 5)])).await.unwrap();
        exporter
            .export(&Restaurant {
                name: "Cafe".into(),
                dishes: vec![dish("Burger", 7)],
            })
            .await
            .unwrap();

        assert_eq!(sink.rows("Diner").unwrap()[1][4], "5");
        assert_eq!(sink.rows("Cafe").unwrap()[1][4], "7");
    }
}
