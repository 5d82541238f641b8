use crate::errors::Result;
use std::collections::HashMap;

/// Which history set a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Success,
    Failure,
}

impl RecordKind {
    /// Payload column / field name.
    pub fn column(&self) -> &'static str {
        match self {
            RecordKind::Success => "success",
            RecordKind::Failure => "failure",
        }
    }
}

/// Full-replace persistence of one fingerprint -> payload collection.
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads every record of `collection`; a missing collection is empty.
    async fn load(&self, collection: &str, kind: RecordKind) -> Result<HashMap<String, String>>;

    /// Replaces the whole collection with `records` and returns the count
    /// written. Readers never observe a mix of old and new records.
    async fn replace(
        &self,
        collection: &str,
        kind: RecordKind,
        records: &HashMap<String, String>,
    ) -> Result<usize>;
}
