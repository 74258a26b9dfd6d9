use async_trait::async_trait;
use health::{ConsumptionLog, ConsumptionRecord};

/// Writes consumption records to the log as JSON.
pub struct LoggedConsumption;

#[async_trait]
impl ConsumptionLog for LoggedConsumption {
    async fn append(&self, record: ConsumptionRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => log::info!(target: "consumption", "{json}"),
            Err(e) => log::error!("Failed to serialize consumption record: {e}"),
        }
    }
}
