//! One-call helpers that write a single object graph to a container and read
//! its primary object back.

use std::path::Path;
use std::sync::Arc;

use crate::container::{ContainerReader, ContainerWriter, MemFile};
use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::input::InputArchive;
use crate::options::{ReadOptions, WriteOptions};
use crate::output::OutputArchive;
use crate::persistable::{ObjectRef, Persistable};
use crate::registry::FactoryRegistry;

fn archive_of<R: ObjectRef + ?Sized>(object: &R, options: &WriteOptions) -> Result<OutputArchive, ArchiveError> {
    let mut archive = OutputArchive::with_options(options.clone());
    archive.put(object)?;
    Ok(archive)
}

/// Writes `object` and its graph as a new container file.
pub fn write_file<R: ObjectRef + ?Sized>(object: &R, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
    let archive = archive_of(object, &WriteOptions::default())?;
    let mut writer = ContainerWriter::create(path)?;
    archive.flush(&mut writer)?;
    writer.finish()?;
    Ok(())
}

/// Appends `object` and its graph to a container file as a further archive.
///
/// Returns the HDU to read it back from.
pub fn append_file<R: ObjectRef + ?Sized>(object: &R, path: impl AsRef<Path>) -> Result<usize, ArchiveError> {
    let archive = archive_of(object, &WriteOptions::default())?;
    let mut writer = ContainerWriter::append(path)?;
    let hdu = archive.flush(&mut writer)?;
    writer.finish()?;
    Ok(hdu)
}

/// Writes `object` and its graph into an in-memory container.
pub fn write_memory<R: ObjectRef + ?Sized>(object: &R) -> Result<MemFile, ArchiveError> {
    write_memory_with(object, &WriteOptions::default())
}

pub fn write_memory_with<R: ObjectRef + ?Sized>(object: &R, options: &WriteOptions) -> Result<MemFile, ArchiveError> {
    let archive = archive_of(object, options)?;
    let mut writer = ContainerWriter::new(MemFile::new())?;
    archive.flush(&mut writer)?;
    writer.finish()
}

fn read_primary(mut reader: ContainerReader, registry: &FactoryRegistry) -> Result<Arc<dyn Persistable>, ArchiveError> {
    let archive = InputArchive::read_container_with(&mut reader, registry)?;
    archive.primary()
}

/// Reads the primary object of the archive starting at `hdu`.
pub fn read_file(
    path: impl AsRef<Path>,
    hdu: usize,
    registry: &FactoryRegistry,
) -> Result<Arc<dyn Persistable>, ArchiveError> {
    let reader = ContainerReader::open_with_options(path, &ReadOptions::at_hdu(hdu))?;
    read_primary(reader, registry)
}

pub fn read_memory(file: &MemFile, hdu: usize, registry: &FactoryRegistry) -> Result<Arc<dyn Persistable>, ArchiveError> {
    let reader = ContainerReader::with_options(file.as_bytes().to_vec(), &ReadOptions::at_hdu(hdu))?;
    read_primary(reader, registry)
}

fn downcast<T: Persistable>(object: Arc<dyn Persistable>) -> Result<Arc<T>, ArchiveError> {
    object.into_any().downcast::<T>().map_err(|_| ArchiveError::TypeMismatch {
        id: ObjectId::PRIMARY,
        expected: std::any::type_name::<T>(),
    })
}

pub fn read_file_as<T: Persistable>(
    path: impl AsRef<Path>,
    hdu: usize,
    registry: &FactoryRegistry,
) -> Result<Arc<T>, ArchiveError> {
    downcast(read_file(path, hdu, registry)?)
}

pub fn read_memory_as<T: Persistable>(file: &MemFile, hdu: usize, registry: &FactoryRegistry) -> Result<Arc<T>, ArchiveError> {
    downcast(read_memory(file, hdu, registry)?)
}
