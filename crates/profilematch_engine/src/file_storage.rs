use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use profilematch_logging::pm_warn;

use crate::{Storage, StorageError};

const RECORD_EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

/// Durable storage: one JSON record per key inside a directory.
///
/// File names are the SHA-256 of the key, so any key is filesystem-safe.
/// Writes go to a temp file in the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create the directory if missing and check it is writable.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        NamedTempFile::new_in(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", hashed_name(key)))
    }

    fn read_record(path: &Path) -> Result<Option<Record>, StorageError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| StorageError::Corrupt {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let record = Self::read_record(&self.record_path(key))?;
        Ok(record
            .filter(|record| record.key == key)
            .map(|record| record.value))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        ensure_dir(&self.dir)?;
        let record = Record {
            key: key.to_string(),
            value: value.to_string(),
        };
        let content = serde_json::to_string(&record).map_err(io::Error::from)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(self.record_path(key))
            .map_err(|err| StorageError::Io(err.error))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(record)) => keys.push(record.key),
                Ok(None) => {}
                Err(err) => pm_warn!("Skipping unreadable storage record: {}", err),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    if dir.exists() {
        if !fs::metadata(dir)?.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", dir.display()),
            )));
        }
    } else {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn hashed_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_names_are_stable_hex() {
        let name = hashed_name("profilematch_cache_lastAnalysis");
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, hashed_name("profilematch_cache_lastAnalysis"));
        assert_ne!(name, hashed_name("profilematch_cache_lastanalysis"));
    }
}
