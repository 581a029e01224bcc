//! Package descriptor parsing and identifier types for aid.
//!
//! This crate defines the schema layer: the `aid.toml` package descriptor
//! (`PackageDescriptor`), the `Solver` declarations it enumerates, the
//! `package/file/class` split used to generate runner scripts (`ClassPath`),
//! and the string newtypes that identify images, containers, solvers and
//! stored build logs, plus the optional `pretrained.toml` weight list.

pub mod descriptor;
pub mod pretrained;
pub mod types;

pub use descriptor::{
    parse_descriptor_file, parse_descriptor_str, ClassPath, DescriptorError, PackageDescriptor,
    PackageSection, Solver, DESCRIPTOR_FILE,
};
pub use pretrained::{
    parse_pretrained_str, read_pretrained, PretrainedList, PretrainedModel, PRETRAINED_FILE,
};
pub use types::{short_uid, ContainerUid, ImageUid, LogId, SolverUid, UID_LEN};
