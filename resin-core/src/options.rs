use serde::{Deserialize, Serialize};

/// Settings for an [`OutputArchive`](crate::OutputArchive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Put non-persistable objects as null (id 0) instead of failing.
    pub permissive: bool,
}

/// Settings for reading a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// HDU the archive's manifest is read from.
    pub hdu: usize,
    /// Check each HDU's blake3 digest before decoding it.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            hdu: 0,
            verify_checksums: true,
        }
    }
}

impl ReadOptions {
    pub fn at_hdu(hdu: usize) -> Self {
        Self {
            hdu,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&ciborium::Value::Map(vec![]), &mut bytes).unwrap();
        let options: ReadOptions = ciborium::from_reader(&bytes[..]).unwrap();
        assert_eq!(options, ReadOptions::default());
        assert!(options.verify_checksums);
    }

    #[test]
    fn at_hdu_keeps_verification() {
        let options = ReadOptions::at_hdu(3);
        assert_eq!(options.hdu, 3);
        assert!(options.verify_checksums);
        assert!(!WriteOptions::default().permissive);
    }
}
