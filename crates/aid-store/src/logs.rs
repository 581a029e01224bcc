use crate::layout::StoreLayout;
use crate::{fsync_dir, validate_uid, StoreError};
use aid_schema::LogId;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Content-addressable store for captured build logs.
///
/// Logs are stored as files named by their blake3 hash; reads recompute the
/// hash. Storing the same log twice yields the same id.
pub struct LogStore {
    layout: StoreLayout,
}

impl LogStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, data: &[u8]) -> Result<LogId, StoreError> {
        let hash = blake3::hash(data).to_hex().to_string();
        let dir = self.layout.logs_dir();
        let dest = dir.join(&hash);

        if dest.exists() {
            return Ok(LogId::new(hash));
        }

        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(LogId::new(hash))
    }

    pub fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        validate_uid(id)?;
        let path = self.layout.logs_dir().join(id);
        if !path.exists() {
            return Err(StoreError::LogNotFound(id.to_owned()));
        }
        let data = fs::read(&path)?;

        let actual = blake3::hash(&data).to_hex();
        if actual.as_str() != id {
            return Err(StoreError::IntegrityFailure {
                kind: "build log".to_owned(),
                uid: id.to_owned(),
                expected: id.to_owned(),
                actual: actual.to_string(),
            });
        }
        Ok(data)
    }
}
