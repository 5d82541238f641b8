use crate::errors::{HistoryError, Result};
use crate::history::backend::{HistoryBackend, RecordKind};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON object file per collection under `dir`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait::async_trait]
impl HistoryBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, collection: &str, _kind: RecordKind) -> Result<HashMap<String, String>> {
        let path = self.path_of(collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(HashMap::new());
        }
        let records: HashMap<String, String> = serde_json::from_slice(&bytes)
            .map_err(|e| HistoryError::Serialize(Box::new(e)))?;
        Ok(records)
    }

    async fn replace(
        &self,
        collection: &str,
        _kind: RecordKind,
        records: &HashMap<String, String>,
    ) -> Result<usize> {
        let path = self.path_of(collection);
        if records.is_empty() {
            remove_if_exists(&path).await?;
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let ordered: BTreeMap<&String, &String> = records.iter().collect();
        let body = serde_json::to_vec(&ordered).map_err(|e| HistoryError::Serialize(Box::new(e)))?;

        // write aside, then swap in
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{collection}.json.{}.{seq}.tmp", std::process::id()));
        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(records.len())
    }
}
