use crate::artifacts::{dockerfile_name, write_atomic, ArtifactGenerator};
use crate::concurrency::KeyedLock;
use crate::config::AidConfig;
use crate::lifecycle::{validate_transition, ContainerState};
use crate::packages::{
    read_optional, scan_packages, validate_env_key, validate_environment, PackageMeta,
    PackageSummary, ALL_ENVIRONMENTS, README_FILE, REQUIREMENTS_FILE,
};
use crate::template::TemplateRenderer;
use crate::CoreError;
use aid_runtime::{select_runtime, BuildRequest, InferenceClient, RuntimeClient, RuntimeError};
use aid_schema::{
    parse_descriptor_file, read_pretrained, short_uid, ContainerUid, ImageUid, LogId,
    PackageDescriptor, SolverUid, DESCRIPTOR_FILE,
};
use aid_store::{
    ContainerRecord, ContainerUpdate, EntityStore, EnvVarRecord, FileEntityStore, ImageRecord,
    LogStore, SolverRecord, StoreLayout,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, info_span, Span};

/// `vendor/package` or `vendor/package/solver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub vendor: String,
    pub package: String,
    pub solver: Option<String>,
}

fn check_segment(segment: &str, what: &str) -> Result<(), CoreError> {
    let valid = !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!("invalid {what} '{segment}'")))
    }
}

impl PackageRef {
    pub fn new(vendor: &str, package: &str, solver: Option<&str>) -> Result<Self, CoreError> {
        check_segment(vendor, "vendor")?;
        check_segment(package, "package")?;
        if let Some(solver) = solver {
            check_segment(solver, "solver")?;
        }
        Ok(Self {
            vendor: vendor.to_owned(),
            package: package.to_owned(),
            solver: solver.map(str::to_owned),
        })
    }

    pub fn solver(&self) -> Result<&str, CoreError> {
        self.solver.as_deref().ok_or_else(|| {
            CoreError::InvalidArgument(format!("expected vendor/package/solver, got '{self}'"))
        })
    }

    /// Fails if a solver was named where only a package is meant.
    pub fn package_only(&self) -> Result<(), CoreError> {
        match self.solver {
            None => Ok(()),
            Some(_) => Err(CoreError::InvalidArgument(format!(
                "expected vendor/package, got '{self}'"
            ))),
        }
    }
}

impl FromStr for PackageRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [vendor, package] => Self::new(vendor, package, None),
            [vendor, package, solver] => Self::new(vendor, package, Some(*solver)),
            _ => Err(CoreError::InvalidArgument(format!(
                "expected vendor/package[/solver], got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.package)?;
        if let Some(solver) = &self.solver {
            write!(f, "/{solver}")?;
        }
        Ok(())
    }
}

/// Which kind of entity `remove` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveTarget {
    Container,
    Image,
    Package,
}

impl RemoveTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Package => "package",
        }
    }
}

impl FromStr for RemoveTarget {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" | "containers" => Ok(Self::Container),
            "image" | "images" => Ok(Self::Image),
            "package" | "packages" => Ok(Self::Package),
            other => Err(CoreError::InvalidArgument(format!(
                "cannot remove '{other}', expected container, image or package"
            ))),
        }
    }
}

/// Result of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub image: ImageRecord,
    pub log_id: LogId,
    /// The engine returned an image that was already recorded.
    pub reused: bool,
}

/// A host port: decimal, 1..=65535.
pub fn validate_port(port: &str) -> Result<u16, CoreError> {
    match port.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(CoreError::InvalidArgument(format!("invalid host port '{port}'"))),
    }
}

fn short_runtime_uid<'a>(id: &'a str, what: &str) -> Result<&'a str, CoreError> {
    short_uid(id).ok_or_else(|| {
        CoreError::Runtime(RuntimeError::InvalidOutput(format!(
            "runtime returned unusable {what} id '{id}'"
        )))
    })
}

/// Lifecycle orchestrator for solver images and containers.
///
/// Every mutating verb resolves its entity from the store, checks the
/// recorded state, calls the runtime, and only then updates the store, all
/// while holding a lock on the entity's identifier.
pub struct Engine {
    layout: StoreLayout,
    config: AidConfig,
    store: Arc<dyn EntityStore>,
    runtime: Arc<dyn RuntimeClient>,
    logs: LogStore,
    artifacts: ArtifactGenerator,
    inference: InferenceClient,
    span: Span,
}

impl Engine {
    /// Open the home at `home`, reading `<home>/config.toml` if present.
    pub fn new(home: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(home);
        let config = AidConfig::load(&layout.config_file())?;
        Self::with_config(layout, config)
    }

    pub fn with_config(layout: StoreLayout, config: AidConfig) -> Result<Self, CoreError> {
        let store = Arc::new(FileEntityStore::open(layout.clone())?);
        let runtime = select_runtime(&config.runtime, &config.docker_bin)?;
        let renderer = TemplateRenderer::with_overrides(&layout.templates_dir())?;
        let mut engine = Self::with_parts(layout, store, runtime, renderer);
        engine.config = config;
        Ok(engine)
    }

    /// Assemble an engine from explicit collaborators.
    pub fn with_parts(
        layout: StoreLayout,
        store: Arc<dyn EntityStore>,
        runtime: Arc<dyn RuntimeClient>,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            logs: LogStore::new(layout.clone()),
            layout,
            config: AidConfig::default(),
            store,
            runtime,
            artifacts: ArtifactGenerator::new(renderer),
            inference: InferenceClient::new(),
            span: info_span!("engine"),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn with_inference(mut self, inference: InferenceClient) -> Self {
        self.inference = inference;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config(&self) -> &AidConfig {
        &self.config
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Whether the container engine answers right now.
    pub fn runtime_available(&self) -> bool {
        self.runtime.available()
    }

    /// Directory of an installed package: one holding a descriptor.
    pub fn installed_package_dir(&self, pkg: &PackageRef) -> Result<PathBuf, CoreError> {
        let dir = self.layout.package_dir(&pkg.vendor, &pkg.package);
        if dir.join(DESCRIPTOR_FILE).is_file() {
            Ok(dir)
        } else {
            Err(CoreError::NotFound(format!(
                "package not found: {}/{}",
                pkg.vendor, pkg.package
            )))
        }
    }

    fn load_package(&self, pkg: &PackageRef) -> Result<(PathBuf, PackageDescriptor), CoreError> {
        let dir = self.installed_package_dir(pkg)?;
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        debug!("reading {}", descriptor_path.display());
        let descriptor = parse_descriptor_file(&descriptor_path)?;
        Ok((dir, descriptor))
    }

    fn declared_solver<'a>(
        pkg: &PackageRef,
        descriptor: &'a PackageDescriptor,
    ) -> Result<&'a aid_schema::Solver, CoreError> {
        let name = pkg.solver()?;
        descriptor.solver(name).ok_or_else(|| {
            CoreError::NotFound(format!(
                "solver not found: {name} is not declared in {}/{}",
                pkg.vendor, pkg.package
            ))
        })
    }

    /// Build the image for one solver of a package.
    ///
    /// Fails if an image with the solver's title already exists unless
    /// `rebuild` is set.
    pub fn build(&self, pkg: &PackageRef, rebuild: bool) -> Result<BuildResult, CoreError> {
        let _enter = self.span.enter();
        let (dir, descriptor) = self.load_package(pkg)?;
        let solver = Self::declared_solver(pkg, &descriptor)?;
        let title = descriptor.image_title(&solver.name);

        let _lock = KeyedLock::acquire(&self.layout, &format!("build-{title}"))?;
        info!("building {title} from {}", dir.display());

        if !rebuild {
            if let Some(existing) = self.store.find_images_by_title(&title)?.first() {
                return Err(CoreError::transition(
                    existing.uid.as_str(),
                    format!("image {title} already exists, rebuild to replace it"),
                ));
            }
        }

        self.artifacts.generate_runners(&descriptor, &dir)?;
        let dockerfile = dir.join(dockerfile_name(&solver.name));
        if dockerfile.exists() {
            debug!("keeping existing {}", dockerfile.display());
        } else {
            self.artifacts.generate_dockerfile(&solver.name, &dir)?;
        }

        let output = self.runtime.build_image(&BuildRequest {
            tag: title.clone(),
            dockerfile,
            context: dir,
        })?;
        let log_id = self.logs.put(output.log.as_bytes())?;
        let uid = short_runtime_uid(&output.image_id, "image")?;

        let solver_uid = SolverUid::new(title.clone());
        self.store.put_solver(&SolverRecord::from_solver(
            solver_uid.clone(),
            &descriptor.package.vendor,
            &descriptor.package.name,
            solver,
        ))?;

        match self.store.find_image(uid) {
            Ok(existing) => {
                info!("runtime reused image {uid} for {title}");
                return Ok(BuildResult {
                    image: existing,
                    log_id,
                    reused: true,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let mut record = ImageRecord::new(ImageUid::new(uid), title.clone(), solver_uid);
        record.build_log = Some(log_id.clone());
        let image = self.store.create_image(&record)?;
        info!("built image {uid} for {title}");
        Ok(BuildResult {
            image,
            log_id,
            reused: false,
        })
    }

    /// Create a container from a recorded image, publishing the solver port
    /// on `host_port`.
    pub fn create(&self, image_uid: &str, host_port: &str) -> Result<ContainerRecord, CoreError> {
        let _enter = self.span.enter();
        validate_port(host_port)?;
        let host_port = host_port.trim();

        self.store.find_image(image_uid)?;
        let _lock = KeyedLock::acquire(&self.layout, &format!("image-{image_uid}"))?;
        let image = self.store.find_image(image_uid)?;

        let runtime_id = self.runtime.create_container(&image.uid, host_port)?;
        let uid = short_runtime_uid(&runtime_id, "container")?;
        let container = self.store.create_container(&ContainerRecord::new(
            ContainerUid::new(uid),
            host_port,
            image.uid.clone(),
        ))?;
        info!("created container {uid} from {} on port {host_port}", image.title);
        Ok(container)
    }

    pub fn start(&self, uid: &str) -> Result<ContainerRecord, CoreError> {
        self.transition(uid, ContainerState::Running, |rt, id| rt.start_container(id))
    }

    pub fn stop(&self, uid: &str) -> Result<ContainerRecord, CoreError> {
        self.transition(uid, ContainerState::Stopped, |rt, id| rt.stop_container(id))
    }

    fn transition(
        &self,
        uid: &str,
        to: ContainerState,
        call: impl FnOnce(&dyn RuntimeClient, &str) -> Result<(), RuntimeError>,
    ) -> Result<ContainerRecord, CoreError> {
        let _enter = self.span.enter();
        let _lock = self.lock_container(uid)?;
        let container = self.store.find_container(uid)?;
        validate_transition(uid, ContainerState::from_running(container.running), to)?;

        call(self.runtime.as_ref(), container.uid.as_str())?;
        let updated = self
            .store
            .update_container(uid, &ContainerUpdate::running(to == ContainerState::Running))?;
        info!("container {uid} is now {to}");
        Ok(updated)
    }

    /// Lock a container that exists. The record is re-read under the lock;
    /// the lookup here keeps unknown ids from leaving lock files behind.
    fn lock_container(&self, uid: &str) -> Result<KeyedLock, CoreError> {
        self.store.find_container(uid)?;
        KeyedLock::acquire(&self.layout, &format!("container-{uid}"))
    }

    pub fn remove_container(&self, uid: &str) -> Result<(), CoreError> {
        let _enter = self.span.enter();
        let lock = self.lock_container(uid)?;
        let container = self.store.find_container(uid)?;
        validate_transition(
            uid,
            ContainerState::from_running(container.running),
            ContainerState::Removed,
        )?;

        self.runtime.remove_container(&container.uid)?;
        self.store.delete_container(uid)?;
        lock.release_and_remove();
        info!("removed container {uid}");
        Ok(())
    }

    /// Remove an image no container refers to.
    pub fn remove_image(&self, uid: &str) -> Result<(), CoreError> {
        let _enter = self.span.enter();
        self.store.find_image(uid)?;
        let lock = KeyedLock::acquire(&self.layout, &format!("image-{uid}"))?;
        let image = self.store.find_image(uid)?;

        let dependents = self.store.containers_for_image(uid)?;
        if !dependents.is_empty() {
            let names: Vec<&str> = dependents.iter().map(|c| c.uid.as_str()).collect();
            return Err(CoreError::transition(
                uid,
                format!(
                    "image {uid} is used by container(s) {}, remove them first",
                    names.join(", ")
                ),
            ));
        }

        self.runtime.remove_image(&image.uid)?;
        self.store.delete_image(uid)?;
        lock.release_and_remove();
        info!("removed image {uid} ({})", image.title);
        Ok(())
    }

    pub fn remove(&self, target: RemoveTarget, uid: &str) -> Result<(), CoreError> {
        match target {
            RemoveTarget::Container => self.remove_container(uid),
            RemoveTarget::Image => self.remove_image(uid),
            RemoveTarget::Package => self.remove_package(&uid.parse()?),
        }
    }

    /// Delete an installed package together with its solver records and
    /// environment variables. Refused while an image built from it exists.
    pub fn remove_package(&self, pkg: &PackageRef) -> Result<(), CoreError> {
        let _enter = self.span.enter();
        pkg.package_only()?;
        let dir = self.installed_package_dir(pkg)?;

        let mut titles: Vec<String> = self
            .store
            .solvers_for_package(&pkg.vendor, &pkg.package)?
            .into_iter()
            .map(|s| s.uid.into_inner())
            .collect();
        match parse_descriptor_file(dir.join(DESCRIPTOR_FILE)) {
            Ok(descriptor) => titles.extend(
                descriptor
                    .solvers
                    .iter()
                    .map(|s| descriptor.image_title(&s.name)),
            ),
            Err(e) => debug!("removing {pkg} with unreadable descriptor: {e}"),
        }
        titles.sort();
        titles.dedup();
        // Builds of this package wait until the removal is done.
        let _locks = titles
            .iter()
            .map(|title| KeyedLock::acquire(&self.layout, &format!("build-{title}")))
            .collect::<Result<Vec<_>, _>>()?;

        let images: Vec<String> = self
            .store
            .list_images()?
            .into_iter()
            .filter(|i| titles.contains(&i.title))
            .map(|i| i.uid.into_inner())
            .collect();
        if !images.is_empty() {
            return Err(CoreError::transition(
                pkg.to_string(),
                format!(
                    "package {pkg} has image(s) {}, remove them first",
                    images.join(", ")
                ),
            ));
        }

        std::fs::remove_dir_all(&dir)?;
        for solver in self.store.solvers_for_package(&pkg.vendor, &pkg.package)? {
            self.store.delete_solver(&solver.uid)?;
        }
        for var in self.store.env_vars_for_package(&pkg.vendor, &pkg.package)? {
            self.store.delete_env_var(&var.uid)?;
        }
        if let Some(vendor_dir) = dir.parent() {
            // Succeeds only once the vendor has no packages left.
            let _ = std::fs::remove_dir(vendor_dir);
        }
        info!("removed package {pkg}");
        Ok(())
    }

    pub fn list_packages(&self) -> Result<Vec<PackageSummary>, CoreError> {
        scan_packages(&self.layout.models_dir())
    }

    /// Solvers, pretrained weights, README and requirements of a package.
    pub fn package_meta(&self, pkg: &PackageRef) -> Result<PackageMeta, CoreError> {
        pkg.package_only()?;
        let (dir, descriptor) = self.load_package(pkg)?;
        Ok(PackageMeta {
            vendor: pkg.vendor.clone(),
            name: pkg.package.clone(),
            tagline: descriptor.package.tagline,
            solvers: descriptor.solvers,
            pretrained: read_pretrained(&dir)?.models,
            readme: read_optional(&dir.join(README_FILE))?,
            requirements: read_optional(&dir.join(REQUIREMENTS_FILE))?,
        })
    }

    /// Environment variables of a package in `environment`, or in every
    /// environment for `all`.
    pub fn env_vars(
        &self,
        pkg: &PackageRef,
        environment: &str,
    ) -> Result<Vec<EnvVarRecord>, CoreError> {
        pkg.package_only()?;
        let every = environment == ALL_ENVIRONMENTS;
        if !every {
            validate_environment(environment)?;
        }
        self.installed_package_dir(pkg)?;
        Ok(self
            .store
            .env_vars_for_package(&pkg.vendor, &pkg.package)?
            .into_iter()
            .filter(|v| every || v.environment == environment)
            .collect())
    }

    fn check_env_slot(
        &self,
        pkg: &PackageRef,
        environment: &str,
        key: &str,
    ) -> Result<(), CoreError> {
        pkg.package_only()?;
        validate_environment(environment)?;
        if environment == ALL_ENVIRONMENTS {
            return Err(CoreError::InvalidArgument(format!(
                "'{ALL_ENVIRONMENTS}' selects every environment and cannot hold variables"
            )));
        }
        validate_env_key(key)?;
        self.installed_package_dir(pkg)?;
        Ok(())
    }

    pub fn set_env_var(
        &self,
        pkg: &PackageRef,
        environment: &str,
        key: &str,
        value: &str,
    ) -> Result<EnvVarRecord, CoreError> {
        let _enter = self.span.enter();
        self.check_env_slot(pkg, environment, key)?;
        let var = self.store.put_env_var(&EnvVarRecord::new(
            pkg.vendor.as_str(),
            pkg.package.as_str(),
            environment,
            key,
            value,
        ))?;
        info!("set {key} for {pkg} in {environment}");
        Ok(var)
    }

    pub fn unset_env_var(
        &self,
        pkg: &PackageRef,
        environment: &str,
        key: &str,
    ) -> Result<(), CoreError> {
        let _enter = self.span.enter();
        self.check_env_slot(pkg, environment, key)?;
        let uid = EnvVarRecord::uid_for(&pkg.vendor, &pkg.package, environment, key);
        match self.store.delete_env_var(&uid) {
            Ok(()) => {
                info!("unset {key} for {pkg} in {environment}");
                Ok(())
            }
            Err(e) if e.is_not_found() => Err(CoreError::NotFound(format!(
                "{key} is not set for {pkg} in {environment}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_images(&self) -> Result<Vec<ImageRecord>, CoreError> {
        Ok(self.store.list_images()?)
    }

    pub fn list_containers(&self) -> Result<Vec<ContainerRecord>, CoreError> {
        Ok(self.store.list_containers()?)
    }

    pub fn list_solvers(&self) -> Result<Vec<SolverRecord>, CoreError> {
        Ok(self.store.list_solvers()?)
    }

    pub fn inspect_image(&self, uid: &str) -> Result<ImageRecord, CoreError> {
        Ok(self.store.find_image(uid)?)
    }

    pub fn inspect_container(&self, uid: &str) -> Result<ContainerRecord, CoreError> {
        Ok(self.store.find_container(uid)?)
    }

    /// Regenerate the runner and Dockerfile of every solver in a package.
    pub fn generate(&self, pkg: &PackageRef) -> Result<Vec<PathBuf>, CoreError> {
        let _enter = self.span.enter();
        let (dir, descriptor) = self.load_package(pkg)?;
        let written = self.artifacts.generate_all(&descriptor, &dir)?;
        info!("generated {} artifacts for {pkg}", written.len());
        Ok(written)
    }

    fn dockerfile_path(&self, pkg: &PackageRef) -> Result<(PathBuf, PathBuf, String), CoreError> {
        let (dir, descriptor) = self.load_package(pkg)?;
        let solver = Self::declared_solver(pkg, &descriptor)?;
        Ok((dir.join(dockerfile_name(&solver.name)), dir, solver.name.clone()))
    }

    /// The solver's Dockerfile, rendered first if it does not exist yet.
    pub fn read_dockerfile(&self, pkg: &PackageRef) -> Result<String, CoreError> {
        let _enter = self.span.enter();
        let (path, dir, solver) = self.dockerfile_path(pkg)?;
        if !path.exists() {
            self.artifacts.generate_dockerfile(&solver, &dir)?;
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Replace the solver's Dockerfile. Later builds use it as is.
    pub fn write_dockerfile(&self, pkg: &PackageRef, content: &str) -> Result<PathBuf, CoreError> {
        let _enter = self.span.enter();
        let (path, _, _) = self.dockerfile_path(pkg)?;
        write_atomic(&path, content)?;
        info!("updated {}", path.display());
        Ok(path)
    }

    pub fn build_log(&self, id: &str) -> Result<String, CoreError> {
        let data = self.logs.get(id)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// POST `params` to the `/infer` endpoint of a running container.
    pub fn infer(&self, uid: &str, params: &BTreeMap<String, String>) -> Result<String, CoreError> {
        let _enter = self.span.enter();
        let container = self.store.find_container(uid)?;
        if !container.running {
            return Err(CoreError::transition(
                uid,
                format!("container {uid} is not running"),
            ));
        }
        debug!("infer on container {uid} port {}", container.port);
        Ok(self.inference.infer(&container.port, params)?)
    }

    /// Path of a package directory under this home.
    pub fn package_dir(&self, pkg: &PackageRef) -> PathBuf {
        self.layout.package_dir(&pkg.vendor, &pkg.package)
    }
}

/// Parse `key=value` pairs as given on a command line.
pub fn parse_params<S: AsRef<str>>(pairs: &[S]) -> Result<BTreeMap<String, String>, CoreError> {
    pairs
        .iter()
        .map(|pair| {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
                _ => Err(CoreError::InvalidArgument(format!(
                    "expected key=value, got '{pair}'"
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aid_runtime::{MockOp, MockRuntime};

    const DESCRIPTOR: &str = r#"
[package]
name = "face"
vendor = "aidmodels"

[[solvers]]
name = "mtcnn"
class = "face/solver/MtcnnSolver"
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Engine,
        runtime: Arc<MockRuntime>,
        store: Arc<FileEntityStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let store = Arc::new(FileEntityStore::open(layout.clone()).unwrap());
        let runtime = Arc::new(MockRuntime::new());
        let pkg_dir = layout.package_dir("aidmodels", "face");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join(DESCRIPTOR_FILE), DESCRIPTOR).unwrap();

        let engine = Engine::with_parts(
            layout,
            store.clone(),
            runtime.clone(),
            TemplateRenderer::from_embedded().unwrap(),
        );
        Fixture {
            _dir: dir,
            engine,
            runtime,
            store,
        }
    }

    fn mtcnn() -> PackageRef {
        "aidmodels/face/mtcnn".parse().unwrap()
    }

    #[test]
    fn package_ref_parsing() {
        let r: PackageRef = "aidmodels/face/mtcnn".parse().unwrap();
        assert_eq!(r.solver().unwrap(), "mtcnn");
        assert_eq!(r.to_string(), "aidmodels/face/mtcnn");

        let p: PackageRef = "aidmodels/face".parse().unwrap();
        assert!(p.solver.is_none());
        assert!(matches!(p.solver(), Err(CoreError::InvalidArgument(_))));

        assert!("aidmodels".parse::<PackageRef>().is_err());
        assert!("a/b/c/d".parse::<PackageRef>().is_err());
        assert!("../face/x".parse::<PackageRef>().is_err());
        assert!("aidmodels//x".parse::<PackageRef>().is_err());
    }

    #[test]
    fn remove_target_parsing() {
        assert_eq!("container".parse::<RemoveTarget>().unwrap(), RemoveTarget::Container);
        assert_eq!("image".parse::<RemoveTarget>().unwrap(), RemoveTarget::Image);
        assert_eq!("package".parse::<RemoveTarget>().unwrap(), RemoveTarget::Package);
        assert_eq!(RemoveTarget::Package.as_str(), "package");
        assert!("solver".parse::<RemoveTarget>().is_err());
    }

    #[test]
    fn port_validation() {
        assert_eq!(validate_port("9000").unwrap(), 9000);
        assert!(validate_port("").is_err());
        assert!(validate_port("0").is_err());
        assert!(validate_port("http").is_err());
        assert!(validate_port("70000").is_err());
    }

    #[test]
    fn params_parsing() {
        let params = parse_params(&["text=hello world", "empty="]).unwrap();
        assert_eq!(params["text"], "hello world");
        assert_eq!(params["empty"], "");
        assert!(parse_params(&["novalue"]).is_err());
        assert!(parse_params(&["=x"]).is_err());
    }

    #[test]
    fn build_records_image_solver_and_log() {
        let f = fixture();
        let result = f.engine.build(&mtcnn(), false).unwrap();
        assert!(!result.reused);
        assert_eq!(result.image.title, "aidmodels-face-mtcnn");
        assert_eq!(result.image.uid.len(), 10);
        assert_eq!(result.image.build_log.as_ref(), Some(&result.log_id));

        let solver = f.store.find_solver("aidmodels-face-mtcnn").unwrap();
        assert_eq!(solver.class, "face/solver/MtcnnSolver");

        let log = f.engine.build_log(&result.log_id).unwrap();
        assert!(log.contains("aidmodels-face-mtcnn"));

        let dir = f.engine.package_dir(&mtcnn());
        assert!(dir.join("docker_mtcnn").exists());
        assert!(dir.join("runner_mtcnn.py").exists());
    }

    #[test]
    fn build_refuses_existing_title_without_rebuild() {
        let f = fixture();
        f.engine.build(&mtcnn(), false).unwrap();
        let err = f.engine.build(&mtcnn(), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(f.runtime.calls(MockOp::Build), 1);
    }

    #[test]
    fn rebuild_of_unchanged_dockerfile_reuses_record() {
        let f = fixture();
        let first = f.engine.build(&mtcnn(), false).unwrap();
        let second = f.engine.build(&mtcnn(), true).unwrap();
        assert!(second.reused);
        assert_eq!(first.image, second.image);
        assert_eq!(f.engine.list_images().unwrap().len(), 1);
    }

    #[test]
    fn build_keeps_edited_dockerfile() {
        let f = fixture();
        f.engine.write_dockerfile(&mtcnn(), "FROM scratch\n").unwrap();
        f.engine.build(&mtcnn(), false).unwrap();
        assert_eq!(f.engine.read_dockerfile(&mtcnn()).unwrap(), "FROM scratch\n");
    }

    #[test]
    fn build_of_unknown_package_or_solver_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .build(&"aidmodels/other/mtcnn".parse().unwrap(), false)
            .unwrap_err();
        assert!(err.is_not_found());
        let err = f
            .engine
            .build(&"aidmodels/face/retina".parse().unwrap(), false)
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.runtime.calls(MockOp::Build), 0);
    }

    #[test]
    fn failed_build_records_no_image() {
        let f = fixture();
        f.runtime.fail_next(MockOp::Build);
        assert!(matches!(
            f.engine.build(&mtcnn(), false),
            Err(CoreError::Runtime(_))
        ));
        assert!(f.engine.list_images().unwrap().is_empty());
        assert!(f.engine.list_solvers().unwrap().is_empty());
    }

    fn lock_files(f: &Fixture) -> usize {
        std::fs::read_dir(f.engine.layout().locks_dir()).unwrap().count()
    }

    #[test]
    fn unknown_ids_leave_no_lock_files() {
        let f = fixture();
        for i in 0..50 {
            let ghost = format!("ghost{i:05}");
            assert!(f.engine.start(&ghost).unwrap_err().is_not_found());
            assert!(f.engine.remove_container(&ghost).unwrap_err().is_not_found());
            assert!(f.engine.remove_image(&ghost).unwrap_err().is_not_found());
            assert!(f.engine.create(&ghost, "9000").unwrap_err().is_not_found());
        }
        assert_eq!(lock_files(&f), 0);
    }

    #[test]
    fn removal_deletes_entity_lock_files() {
        let f = fixture();
        let image = f.engine.build(&mtcnn(), false).unwrap().image;
        let container = f.engine.create(&image.uid, "9000").unwrap();
        f.engine.start(&container.uid).unwrap();
        f.engine.stop(&container.uid).unwrap();
        let layout = f.engine.layout();
        assert!(layout.lock_file(&format!("container-{}", container.uid)).exists());

        f.engine.remove_container(&container.uid).unwrap();
        f.engine.remove_image(&image.uid).unwrap();
        assert!(!layout.lock_file(&format!("container-{}", container.uid)).exists());
        assert!(!layout.lock_file(&format!("image-{}", image.uid)).exists());
    }

    fn face() -> PackageRef {
        "aidmodels/face".parse().unwrap()
    }

    #[test]
    fn installed_packages_are_listed() {
        let f = fixture();
        let packages = f.engine.list_packages().unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].vendor, "aidmodels");
        assert_eq!(packages[0].name, "face");
        assert_eq!(packages[0].solvers, vec!["mtcnn"]);
    }

    #[test]
    fn package_meta_collects_optional_files() {
        let f = fixture();
        let dir = f.engine.package_dir(&face());
        let meta = f.engine.package_meta(&face()).unwrap();
        assert_eq!(meta.solvers.len(), 1);
        assert!(meta.pretrained.is_empty());
        assert_eq!(meta.readme, None);

        std::fs::write(dir.join("README.md"), "# Face\n").unwrap();
        std::fs::write(dir.join("requirements.txt"), "torch\n").unwrap();
        std::fs::write(
            dir.join("pretrained.toml"),
            "[[models]]\nname = \"default\"\nurl = \"https://example.com/w.pth\"\n",
        )
        .unwrap();
        let meta = f.engine.package_meta(&face()).unwrap();
        assert_eq!(meta.readme.as_deref(), Some("# Face\n"));
        assert_eq!(meta.requirements.as_deref(), Some("torch\n"));
        assert_eq!(meta.pretrained[0].name, "default");

        assert!(f
            .engine
            .package_meta(&"aidmodels/none".parse().unwrap())
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            f.engine.package_meta(&mtcnn()),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn package_with_images_cannot_be_removed() {
        let f = fixture();
        let image = f.engine.build(&mtcnn(), false).unwrap().image;
        f.engine.set_env_var(&face(), "prod", "WORKERS", "2").unwrap();

        let err = f.engine.remove_package(&face()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert!(err.to_string().contains(image.uid.as_str()));
        assert!(f.engine.package_dir(&face()).is_dir());

        f.engine.remove_image(&image.uid).unwrap();
        f.engine.remove(RemoveTarget::Package, "aidmodels/face").unwrap();
        assert!(!f.engine.package_dir(&face()).exists());
        assert!(f.engine.list_solvers().unwrap().is_empty());
        assert!(f.store.list_env_vars().unwrap().is_empty());
        assert!(f.engine.list_packages().unwrap().is_empty());
        assert!(f.engine.remove_package(&face()).unwrap_err().is_not_found());
    }

    #[test]
    fn env_vars_are_scoped_by_environment() {
        let f = fixture();
        f.engine.set_env_var(&face(), "dev", "WORKERS", "1").unwrap();
        f.engine.set_env_var(&face(), "prod", "WORKERS", "2").unwrap();
        f.engine.set_env_var(&face(), "prod", "WORKERS", "4").unwrap();

        let prod = f.engine.env_vars(&face(), "prod").unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].value, "4");
        assert_eq!(f.engine.env_vars(&face(), ALL_ENVIRONMENTS).unwrap().len(), 2);

        f.engine.unset_env_var(&face(), "dev", "WORKERS").unwrap();
        assert!(f.engine.env_vars(&face(), "dev").unwrap().is_empty());
        assert!(f
            .engine
            .unset_env_var(&face(), "dev", "WORKERS")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn env_var_arguments_are_checked() {
        let f = fixture();
        for (env, key) in [("all", "K"), ("prod", "1K"), ("../x", "K")] {
            assert!(matches!(
                f.engine.set_env_var(&face(), env, key, "v"),
                Err(CoreError::InvalidArgument(_))
            ));
        }
        assert!(f
            .engine
            .set_env_var(&"aidmodels/none".parse().unwrap(), "prod", "K", "v")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn create_rejects_bad_port_before_runtime() {
        let f = fixture();
        let image = f.engine.build(&mtcnn(), false).unwrap().image;
        for port in ["", "abc", "0"] {
            assert!(matches!(
                f.engine.create(&image.uid, port),
                Err(CoreError::InvalidArgument(_))
            ));
        }
        assert_eq!(f.runtime.calls(MockOp::Create), 0);
    }

    #[test]
    fn create_from_unknown_image_is_not_found() {
        let f = fixture();
        assert!(f.engine.create("0000000000", "9000").unwrap_err().is_not_found());
        assert_eq!(f.runtime.calls(MockOp::Create), 0);
    }

    #[test]
    fn infer_requires_running_container() {
        let f = fixture();
        let image = f.engine.build(&mtcnn(), false).unwrap().image;
        let container = f.engine.create(&image.uid, "9000").unwrap();
        let err = f
            .engine
            .infer(&container.uid, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn generate_writes_all_artifacts() {
        let f = fixture();
        let written = f.engine.generate(&"aidmodels/face".parse().unwrap()).unwrap();
        assert_eq!(written.len(), 2);
    }

    #[test]
    fn malformed_descriptor_is_reported() {
        let f = fixture();
        let dir = f.engine.package_dir(&mtcnn());
        std::fs::write(dir.join(DESCRIPTOR_FILE), "[package]\nname = ").unwrap();
        assert!(matches!(
            f.engine.build(&mtcnn(), false),
            Err(CoreError::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        let f = fixture();
        assert_eq!(f.engine.runtime_name(), "mock");
        assert!(f.engine.runtime_available());
    }
}
