use ciborium::Value;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::input::InputArchive;
use crate::link::Link;

/// The named fields one object wrote about itself.
///
/// Fields keep the order they were written in. Values are CBOR; references to
/// other objects appear as ObjectIds like any other integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(IndexMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning the previous value if the name was taken.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Field names in write order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One persisted object: its id, its persistence name and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: ObjectId,
    name: String,
    payload: Payload,
}

impl Record {
    pub fn new(id: ObjectId, name: impl Into<String>, payload: Payload) -> Self {
        Record {
            id,
            name: name.into(),
            payload,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The persistence name used to find this record's factory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }

    /// Decodes a required field.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, ArchiveError> {
        let value = self
            .payload
            .get(field)
            .ok_or_else(|| ArchiveError::MissingField {
                id: self.id,
                name: self.name.clone(),
                field: field.to_string(),
            })?;
        self.decode(field, value)
    }

    /// Decodes a field that older writers may not have produced.
    pub fn get_opt<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, ArchiveError> {
        match self.payload.get(field) {
            Some(value) => self.decode(field, value).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves a reference field through the archive that owns this record.
    pub fn link<L: Link>(&self, field: &str, archive: &InputArchive<'_>) -> Result<L, ArchiveError> {
        let ids: L::Ids = self.get(field)?;
        L::get_link(ids, archive)
    }

    fn decode<T: DeserializeOwned>(&self, field: &str, value: &Value) -> Result<T, ArchiveError> {
        value.deserialized().map_err(|e| {
            ArchiveError::Decode(format!(
                "field '{}' of record {} ('{}'): {}",
                field, self.id, self.name, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut payload = Payload::new();
        payload.insert("scale", Value::serialized(&2.5f64).unwrap());
        payload.insert("label", Value::serialized("psf").unwrap());
        Record::new(ObjectId::new(4), "GaussianPsf", payload)
    }

    #[test]
    fn field_order_is_write_order() {
        let record = sample();
        let fields: Vec<_> = record.payload().fields().collect();
        assert_eq!(fields, ["scale", "label"]);
    }

    #[test]
    fn typed_get() {
        let record = sample();
        assert_eq!(record.get::<f64>("scale").unwrap(), 2.5);
        assert_eq!(record.get::<String>("label").unwrap(), "psf");
    }

    #[test]
    fn missing_field() {
        let record = sample();
        let err = record.get::<f64>("sigma").unwrap_err();
        assert!(matches!(err, ArchiveError::MissingField { ref field, .. } if field == "sigma"));
        assert!(err.is_bad_archive());
        assert_eq!(record.get_opt::<f64>("sigma").unwrap(), None);
    }

    #[test]
    fn wrong_type_is_decode_error() {
        let record = sample();
        let err = record.get::<u32>("label").unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
    }
}
