//! Resin persists graphs of polymorphic objects into flat, table-based
//! containers and rebuilds them with their sharing intact.
//!
//! Core concepts:
//! - **Persistable**: a value that can describe itself to an archive under a
//!   stable persistence name
//! - **ObjectId**: per-archive identity; 0 is null, the first object put is 1
//! - **Record**: one object's persistence name and payload fields
//! - **OutputArchive**: walks a graph, writing each distinct object once
//! - **FactoryRegistry**: maps persistence names to factories that rebuild
//!   objects the reader has never seen declared
//! - **InputArchive**: rebuilds objects lazily, sharing one instance per id
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use resin_core::{
//!     persist, ArchiveError, FactoryRegistry, InputArchive, OutputArchiveHandle, Persistable,
//!     Record, Reconstruct,
//! };
//!
//! #[derive(Debug)]
//! struct Offset {
//!     dx: f64,
//! }
//!
//! impl Persistable for Offset {
//!     fn persistence_name(&self) -> &str {
//!         Self::PERSISTENCE_NAME
//!     }
//!
//!     fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
//!         handle.set("dx", &self.dx)
//!     }
//! }
//!
//! impl Reconstruct for Offset {
//!     const PERSISTENCE_NAME: &'static str = "Offset";
//!
//!     fn reconstruct(_archive: &InputArchive<'_>, record: &Record) -> Result<Self, ArchiveError> {
//!         Ok(Offset { dx: record.get("dx")? })
//!     }
//! }
//!
//! let mut registry = FactoryRegistry::new();
//! registry.register_type::<Offset>().unwrap();
//!
//! let file = persist::write_memory(&Arc::new(Offset { dx: 1.5 })).unwrap();
//! let offset: Arc<Offset> = persist::read_memory_as(&file, 0, &registry).unwrap();
//! assert_eq!(offset.dx, 1.5);
//! ```
//!
//! # Limitations
//!
//! Only acyclic graphs can be written. Cycles are reported as errors on both
//! the write and the read side rather than followed.

mod container;
mod error;
mod id;
mod input;
mod link;
pub mod manifest;
mod options;
mod output;
pub mod persist;
mod persistable;
mod record;
pub mod registry;

pub use container::{ContainerReader, ContainerWriter, FORMAT_VERSION, MAGIC, MemFile};
pub use error::{ArchiveError, ErrorKind};
pub use id::ObjectId;
pub use input::InputArchive;
pub use link::Link;
pub use options::{ReadOptions, WriteOptions};
pub use output::{OutputArchive, OutputArchiveHandle};
pub use persistable::{AsAny, ObjectRef, Persistable, Reconstruct};
pub use record::{Payload, Record};
pub use registry::{FactoryRegistry, PersistableFactory};

#[cfg(feature = "derive")]
pub use resin_derive::Persistable;
