use crate::entity::EntityStore;
use crate::layout::StoreLayout;
use crate::records::{
    ContainerRecord, ContainerUpdate, EnvVarRecord, ImageRecord, Record, SolverRecord,
};
use crate::{fsync_dir, validate_uid, StoreError};
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// One directory of records of a single kind, one file per uid.
struct RecordDir<T: Record> {
    dir: PathBuf,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Record> RecordDir<T> {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            _kind: PhantomData,
        }
    }

    fn path(&self, uid: &str) -> Result<PathBuf, StoreError> {
        validate_uid(uid)?;
        Ok(self.dir.join(uid))
    }

    fn not_found(uid: &str) -> StoreError {
        StoreError::NotFound {
            kind: T::KIND,
            uid: uid.to_owned(),
        }
    }

    fn stage(&self, record: &T) -> Result<(NamedTempFile, T), StoreError> {
        let mut stamped = record.clone();
        stamped.set_checksum(Some(stamped.compute_checksum()?));
        let content = serde_json::to_string_pretty(&stamped)?;

        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        Ok((tmp, stamped))
    }

    /// Write a record that must not exist yet.
    fn create(&self, record: &T) -> Result<T, StoreError> {
        let dest = self.path(record.uid())?;
        let (tmp, stamped) = self.stage(record)?;
        tmp.persist_noclobber(&dest).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists {
                    kind: T::KIND,
                    uid: record.uid().to_owned(),
                }
            } else {
                StoreError::Io(e.error)
            }
        })?;
        fsync_dir(&self.dir)?;
        debug!("created {} {}", T::KIND, record.uid());
        Ok(stamped)
    }

    /// Write a record, replacing any previous version.
    fn put(&self, record: &T) -> Result<T, StoreError> {
        let dest = self.path(record.uid())?;
        let (tmp, stamped) = self.stage(record)?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(stamped)
    }

    fn get(&self, uid: &str) -> Result<T, StoreError> {
        let path = self.path(uid)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Self::not_found(uid));
            }
            Err(e) => return Err(e.into()),
        };
        let record: T = serde_json::from_str(&content)?;

        // Records written without a checksum are accepted as-is.
        if let Some(expected) = record.checksum() {
            let actual = record.compute_checksum()?;
            if actual != expected {
                return Err(StoreError::IntegrityFailure {
                    kind: T::KIND.to_string(),
                    uid: uid.to_owned(),
                    expected: expected.to_owned(),
                    actual,
                });
            }
        }
        Ok(record)
    }

    fn update(&self, uid: &str, f: impl FnOnce(&mut T)) -> Result<T, StoreError> {
        let mut record = self.get(uid)?;
        f(&mut record);
        self.put(&record)
    }

    fn remove(&self, uid: &str) -> Result<(), StoreError> {
        let path = self.path(uid)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                fsync_dir(&self.dir)?;
                debug!("deleted {} {uid}", T::KIND);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Self::not_found(uid)),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name_str) = name.to_str() else {
                continue;
            };
            // Staged temp files start with '.'
            if name_str.starts_with('.') {
                continue;
            }
            match self.get(name_str) {
                Ok(record) => results.push(record),
                Err(e) => warn!("skipping corrupted {} record '{name_str}': {e}", T::KIND),
            }
        }
        results.sort_by(|a, b| a.uid().cmp(b.uid()));
        Ok(results)
    }
}

/// [`EntityStore`] backed by JSON files under `<home>/store`.
pub struct FileEntityStore {
    layout: StoreLayout,
    images: RecordDir<ImageRecord>,
    containers: RecordDir<ContainerRecord>,
    solvers: RecordDir<SolverRecord>,
    envs: RecordDir<EnvVarRecord>,
}

impl FileEntityStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            images: RecordDir::new(layout.images_dir()),
            containers: RecordDir::new(layout.containers_dir()),
            solvers: RecordDir::new(layout.solvers_dir()),
            envs: RecordDir::new(layout.envs_dir()),
            layout,
        }
    }

    /// Create the store directories (if needed) and return the store.
    pub fn open(layout: StoreLayout) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self::new(layout))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }
}

impl EntityStore for FileEntityStore {
    fn create_image(&self, image: &ImageRecord) -> Result<ImageRecord, StoreError> {
        self.images.create(image)
    }

    fn find_image(&self, uid: &str) -> Result<ImageRecord, StoreError> {
        self.images.get(uid)
    }

    fn delete_image(&self, uid: &str) -> Result<(), StoreError> {
        self.images.remove(uid)
    }

    fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        self.images.list()
    }

    fn create_container(
        &self,
        container: &ContainerRecord,
    ) -> Result<ContainerRecord, StoreError> {
        self.containers.create(container)
    }

    fn find_container(&self, uid: &str) -> Result<ContainerRecord, StoreError> {
        self.containers.get(uid)
    }

    fn update_container(
        &self,
        uid: &str,
        changes: &ContainerUpdate,
    ) -> Result<ContainerRecord, StoreError> {
        self.containers.update(uid, |c| changes.apply(c))
    }

    fn delete_container(&self, uid: &str) -> Result<(), StoreError> {
        self.containers.remove(uid)
    }

    fn list_containers(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        self.containers.list()
    }

    fn put_solver(&self, solver: &SolverRecord) -> Result<SolverRecord, StoreError> {
        self.solvers.put(solver)
    }

    fn find_solver(&self, uid: &str) -> Result<SolverRecord, StoreError> {
        self.solvers.get(uid)
    }

    fn delete_solver(&self, uid: &str) -> Result<(), StoreError> {
        self.solvers.remove(uid)
    }

    fn list_solvers(&self) -> Result<Vec<SolverRecord>, StoreError> {
        self.solvers.list()
    }

    fn put_env_var(&self, var: &EnvVarRecord) -> Result<EnvVarRecord, StoreError> {
        self.envs.put(var)
    }

    fn delete_env_var(&self, uid: &str) -> Result<(), StoreError> {
        self.envs.remove(uid)
    }

    fn list_env_vars(&self) -> Result<Vec<EnvVarRecord>, StoreError> {
        self.envs.list()
    }
}
