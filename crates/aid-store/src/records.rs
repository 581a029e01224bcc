use aid_schema::{ContainerUid, ImageUid, LogId, Solver, SolverUid};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Image,
    Container,
    Solver,
    EnvVar,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Image => write!(f, "image"),
            RecordKind::Container => write!(f, "container"),
            RecordKind::Solver => write!(f, "solver"),
            RecordKind::EnvVar => write!(f, "environment variable"),
        }
    }
}

/// A persisted entity: one JSON document per uid, carrying a checksum of its
/// own content.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const KIND: RecordKind;

    fn uid(&self) -> &str;

    fn checksum(&self) -> Option<&str>;

    fn set_checksum(&mut self, checksum: Option<String>);

    /// blake3 over the pretty JSON of the record with the checksum cleared.
    fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        let mut copy = self.clone();
        copy.set_checksum(None);
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub uid: ImageUid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub solver: SolverUid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_log: Option<LogId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub uid: ContainerUid,
    pub port: String,
    /// Cached belief about live state. Only flipped after a successful
    /// runtime start/stop.
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub image: ImageUid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolverRecord {
    pub uid: SolverUid,
    pub vendor: String,
    pub package: String,
    pub name: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// One `KEY=value` pair of a package, scoped to a named environment
/// such as `dev` or `prod`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVarRecord {
    pub uid: String,
    pub vendor: String,
    pub package: String,
    pub environment: String,
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Field changes accepted by a container update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerUpdate {
    pub running: Option<bool>,
}

impl ContainerUpdate {
    pub fn running(running: bool) -> Self {
        Self {
            running: Some(running),
        }
    }

    pub fn apply(&self, record: &mut ContainerRecord) {
        if let Some(running) = self.running {
            record.running = running;
        }
    }
}

impl ImageRecord {
    pub fn new(uid: ImageUid, title: impl Into<String>, solver: SolverUid) -> Self {
        Self {
            uid,
            title: title.into(),
            created_at: Utc::now(),
            solver,
            build_log: None,
            checksum: None,
        }
    }
}

impl ContainerRecord {
    pub fn new(uid: ContainerUid, port: impl Into<String>, image: ImageUid) -> Self {
        Self {
            uid,
            port: port.into(),
            running: false,
            created_at: Utc::now(),
            image,
            checksum: None,
        }
    }
}

impl SolverRecord {
    pub fn from_solver(uid: SolverUid, vendor: &str, package: &str, solver: &Solver) -> Self {
        Self {
            uid,
            vendor: vendor.to_owned(),
            package: package.to_owned(),
            name: solver.name.clone(),
            class: solver.class.clone(),
            checksum: None,
        }
    }

}

impl EnvVarRecord {
    pub fn new(
        vendor: impl Into<String>,
        package: impl Into<String>,
        environment: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let (vendor, package, environment, key) =
            (vendor.into(), package.into(), environment.into(), key.into());
        Self {
            uid: Self::uid_for(&vendor, &package, &environment, &key),
            vendor,
            package,
            environment,
            key,
            value: value.into(),
            checksum: None,
        }
    }

    /// Record uid for one (package, environment, key) slot. Hashed, since
    /// the parts may themselves contain the separators a joined name would use.
    pub fn uid_for(vendor: &str, package: &str, environment: &str, key: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [vendor, package, environment, key] {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        hasher.finalize().to_hex().as_str()[..32].to_owned()
    }

    pub fn belongs_to(&self, vendor: &str, package: &str) -> bool {
        self.vendor == vendor && self.package == package
    }
}

macro_rules! impl_record {
    ($ty:ty, $kind:expr) => {
        impl Record for $ty {
            const KIND: RecordKind = $kind;

            fn uid(&self) -> &str {
                &self.uid
            }

            fn checksum(&self) -> Option<&str> {
                self.checksum.as_deref()
            }

            fn set_checksum(&mut self, checksum: Option<String>) {
                self.checksum = checksum;
            }
        }
    };
}

impl_record!(ImageRecord, RecordKind::Image);
impl_record!(ContainerRecord, RecordKind::Container);
impl_record!(SolverRecord, RecordKind::Solver);
impl_record!(EnvVarRecord, RecordKind::EnvVar);
