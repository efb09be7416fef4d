use async_trait::async_trait;
use tracing::info;

use super::stage::Stage;
use super::tracker::StageKind;
use crate::error::SinkError;
use crate::exporter::{DiffingExporter, ExportSummary};
use crate::model::Restaurant;

pub struct ExportStage {
    exporter: DiffingExporter,
}

impl ExportStage {
    pub fn new(exporter: DiffingExporter) -> Self {
        Self { exporter }
    }
}

#[async_trait]
impl Stage for ExportStage {
    type In = Restaurant;
    type Out = ExportSummary;
    type Worker = ();
    type Error = SinkError;

    const KIND: StageKind = StageKind::Export;

    fn new_worker(&self) -> Self::Worker {}

    fn label(restaurant: &Restaurant) -> String {
        restaurant.name.clone()
    }

    async fn process(&self, _worker: &mut (), restaurant: Restaurant) -> Result<ExportSummary, SinkError> {
        let summary = self.exporter.export(&restaurant).await?;
        info!(
            restaurant = %restaurant.name,
            created = summary.created,
            updated = summary.updated,
            appended = summary.appended,
            "Exported restaurant"
        );
        Ok(summary)
    }

    async fn retire_worker(&self, _worker: ()) {}
}
