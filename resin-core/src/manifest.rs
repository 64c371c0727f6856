//! How an archive's records are laid out in a container.
//!
//! An archive occupies consecutive HDUs: one `ARCHIVE_INDEX` table naming
//! every object and where its payload lives, then one `ARCHIVE_DATA` table per
//! persistence name holding the payloads of all objects of that type.

use std::io::Write;

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::container::{ContainerReader, ContainerWriter};
use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::record::{Payload, Record};

pub const INDEX_EXTNAME: &str = "ARCHIVE_INDEX";
pub const DATA_EXTNAME: &str = "ARCHIVE_DATA";

/// Where one object's payload lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: ObjectId,
    pub name: String,
    pub section: usize,
    pub row: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Persistence name of each section, in HDU order.
    pub sections: Vec<String>,
    /// One entry per object, in id order.
    pub entries: Vec<ManifestEntry>,
}

/// Payloads of every object sharing one persistence name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub rows: Vec<Payload>,
}

/// Groups records (given in id order) into a manifest and its sections.
pub(crate) fn layout(records: Vec<Record>) -> (Manifest, Vec<Section>) {
    let mut sections: IndexMap<String, Vec<Payload>> = IndexMap::new();
    let mut entries = Vec::with_capacity(records.len());

    for record in records {
        let id = record.id();
        let name = record.name().to_string();
        let entry = sections.entry(name.clone());
        let section = entry.index();
        let rows = entry.or_default();
        entries.push(ManifestEntry {
            id,
            name,
            section,
            row: rows.len(),
        });
        rows.push(record.into_payload());
    }

    let manifest = Manifest {
        sections: sections.keys().cloned().collect(),
        entries,
    };
    let sections = sections
        .into_iter()
        .map(|(name, rows)| Section { name, rows })
        .collect();
    (manifest, sections)
}

/// Writes the manifest and its sections, returning the manifest's HDU index.
pub(crate) fn write<W: Write>(
    writer: &mut ContainerWriter<W>,
    records: Vec<Record>,
) -> Result<usize, ArchiveError> {
    let (manifest, sections) = layout(records);
    let index = writer.write_table(INDEX_EXTNAME, &manifest)?;
    for section in &sections {
        writer.write_table(DATA_EXTNAME, section)?;
    }
    Ok(index)
}

/// Reads a manifest at the reader's current HDU and the sections after it.
pub(crate) fn read(reader: &mut ContainerReader) -> Result<IndexMap<ObjectId, Record>, ArchiveError> {
    let manifest: Manifest = reader.read_table(INDEX_EXTNAME)?;

    let mut sections = Vec::with_capacity(manifest.sections.len());
    for expected in &manifest.sections {
        let section: Section = reader.read_table(DATA_EXTNAME)?;
        if &section.name != expected {
            return Err(ArchiveError::Corrupt(format!(
                "section '{}' found where '{}' was expected",
                section.name, expected
            )));
        }
        let rows: Vec<Option<Payload>> = section.rows.into_iter().map(Some).collect();
        sections.push((section.name, rows));
    }

    let mut records = IndexMap::with_capacity(manifest.entries.len());
    for entry in manifest.entries {
        if entry.id.is_null() {
            return Err(ArchiveError::Corrupt("manifest entry with null id".to_string()));
        }
        if records.contains_key(&entry.id) {
            return Err(ArchiveError::Corrupt(format!("duplicate manifest entry for object {}", entry.id)));
        }
        let (name, rows) = sections.get_mut(entry.section).ok_or_else(|| {
            ArchiveError::Corrupt(format!("object {} refers to missing section {}", entry.id, entry.section))
        })?;
        if *name != entry.name {
            return Err(ArchiveError::Corrupt(format!(
                "object {} is '{}' but its section holds '{}'",
                entry.id, entry.name, name
            )));
        }
        let payload = rows.get_mut(entry.row).and_then(Option::take).ok_or_else(|| {
            ArchiveError::Corrupt(format!(
                "object {} refers to missing or reused row {} of section '{}'",
                entry.id, entry.row, name
            ))
        })?;
        records.insert(entry.id, Record::new(entry.id, entry.name, payload));
    }

    let orphans: usize = sections
        .iter()
        .map(|(_, rows)| rows.iter().filter(|row| row.is_some()).count())
        .sum();
    if orphans > 0 {
        warn!("archive has {} payload rows not referenced by its manifest", orphans);
    }

    Ok(records)
}
