use crate::records::{ContainerRecord, ContainerUpdate, EnvVarRecord, ImageRecord, SolverRecord};
use crate::StoreError;

/// Typed CRUD over the persisted Image, Container, Solver and package
/// environment variable records.
///
/// Every call is atomic on its own: readers never observe a partially
/// written record. Lookups of a missing uid fail with
/// [`StoreError::NotFound`], which callers can tell apart from other
/// persistence failures via [`StoreError::is_not_found`].
pub trait EntityStore: Send + Sync {
    /// Persist a new image. Fails with `AlreadyExists` if the uid is taken.
    fn create_image(&self, image: &ImageRecord) -> Result<ImageRecord, StoreError>;

    fn find_image(&self, uid: &str) -> Result<ImageRecord, StoreError>;

    fn delete_image(&self, uid: &str) -> Result<(), StoreError>;

    fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// Persist a new container. Fails with `AlreadyExists` if the uid is taken.
    fn create_container(&self, container: &ContainerRecord)
        -> Result<ContainerRecord, StoreError>;

    fn find_container(&self, uid: &str) -> Result<ContainerRecord, StoreError>;

    fn update_container(
        &self,
        uid: &str,
        changes: &ContainerUpdate,
    ) -> Result<ContainerRecord, StoreError>;

    fn delete_container(&self, uid: &str) -> Result<(), StoreError>;

    fn list_containers(&self) -> Result<Vec<ContainerRecord>, StoreError>;

    /// Insert or replace a solver declaration.
    fn put_solver(&self, solver: &SolverRecord) -> Result<SolverRecord, StoreError>;

    fn find_solver(&self, uid: &str) -> Result<SolverRecord, StoreError>;

    fn delete_solver(&self, uid: &str) -> Result<(), StoreError>;

    fn list_solvers(&self) -> Result<Vec<SolverRecord>, StoreError>;

    /// Insert or replace the value of one environment variable.
    fn put_env_var(&self, var: &EnvVarRecord) -> Result<EnvVarRecord, StoreError>;

    fn delete_env_var(&self, uid: &str) -> Result<(), StoreError>;

    fn list_env_vars(&self) -> Result<Vec<EnvVarRecord>, StoreError>;

    /// Variables of one package, ordered by environment then key.
    fn env_vars_for_package(
        &self,
        vendor: &str,
        package: &str,
    ) -> Result<Vec<EnvVarRecord>, StoreError> {
        let mut vars: Vec<EnvVarRecord> = self
            .list_env_vars()?
            .into_iter()
            .filter(|v| v.belongs_to(vendor, package))
            .collect();
        vars.sort_by(|a, b| (&a.environment, &a.key).cmp(&(&b.environment, &b.key)));
        Ok(vars)
    }

    /// Solver records declared by one package.
    fn solvers_for_package(
        &self,
        vendor: &str,
        package: &str,
    ) -> Result<Vec<SolverRecord>, StoreError> {
        Ok(self
            .list_solvers()?
            .into_iter()
            .filter(|s| s.vendor == vendor && s.package == package)
            .collect())
    }

    /// Images built under `title`, newest first.
    fn find_images_by_title(&self, title: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let mut images: Vec<ImageRecord> = self
            .list_images()?
            .into_iter()
            .filter(|i| i.title == title)
            .collect();
        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images)
    }

    /// Containers created from the image `image_uid`.
    fn containers_for_image(&self, image_uid: &str) -> Result<Vec<ContainerRecord>, StoreError> {
        Ok(self
            .list_containers()?
            .into_iter()
            .filter(|c| c.image == image_uid)
            .collect())
    }
}
