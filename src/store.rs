//! On-disk sequence store: one JSON document per sequence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::models::Sequence;

const COLLECTION: &str = "sequence";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error decoding sequence: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sequence not found: {0}")]
    NotFound(String),
    #[error("invalid sequence name: {0:?}")]
    InvalidName(String),
}

/// Directory-backed sequence store
///
/// Sequences live under `<dir>/sequence/<name>.json`; names double as file
/// names and are validated accordingly.
pub struct SequenceStore {
    dir: PathBuf,
}

impl SequenceStore {
    pub fn new(dir: &Path) -> Result<Self, StoreError> {
        let dir = dir.join(COLLECTION);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// All stored sequences, sorted by name
    pub async fn get_all(&self) -> Result<Vec<Sequence>, StoreError> {
        let mut sequences: Vec<Sequence> = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.extension().map_or(false, |ext| ext == "json") {
                let data = fs::read(&path).await?;
                sequences.push(serde_json::from_slice(&data)?);
            }
        }

        sequences.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sequences)
    }

    pub async fn get(&self, name: &str) -> Result<Sequence, StoreError> {
        let path = self.sequence_path(name)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_owned()))
            }
            Err(error) => return Err(error.into()),
        };

        Ok(serde_json::from_slice(&data)?)
    }

    /// Store a sequence, replacing any previous one with the same name
    pub async fn add(&self, seq: &Sequence) -> Result<(), StoreError> {
        let path = self.sequence_path(&seq.name)?;
        let tmp = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(seq)?;

        // Write-then-rename keeps readers from seeing partial documents
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.sequence_path(name)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_owned()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn sequence_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(StoreError::InvalidName(name.to_owned()));
        }

        Ok(self.dir.join(format!("{}.json", name)))
    }
}
