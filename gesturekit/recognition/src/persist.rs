//! Versioned, type-tagged model records.
//!
//! # Layout
//!
//! ```text
//! Field         Size  Notes
//! -----         ----  -----
//! magic         4     "GKMR"
//! major         1     format version (major)
//! minor         1     format version (minor)
//! flags         2     bit 0: trained-state block present
//! id_len        2     followed by the UTF-8 type id
//! settings_len  4     followed by the settings block
//! settings_crc  4     CRC32 of the settings block
//! state_len     4     only when bit 0 is set, followed by the state block
//! state_crc     4     only when bit 0 is set
//! ```
//!
//! All integers are little-endian. Blocks are JSON documents. Composite
//! modules store their members as [`NestedRecord`]s inside their state block.

use std::io::{self, Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ModuleError, PersistError, Result},
    module::Module,
    registry::{self, Registry},
};

/// Magic bytes opening every record.
pub const MAGIC: &[u8; 4] = b"GKMR";
/// Current format version (major).
pub const FORMAT_VERSION_MAJOR: u8 = 1;
/// Current format version (minor).
pub const FORMAT_VERSION_MINOR: u8 = 0;

const FLAG_HAS_STATE: u16 = 1 << 0;

/// A decoded model record.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    /// Format version (major) the record was written with.
    pub version_major: u8,
    /// Format version (minor) the record was written with.
    pub version_minor: u8,
    /// Type id of the module that wrote the record.
    pub id: String,
    /// Hyperparameter block.
    pub settings: Value,
    /// Trained-state block, present only for trained modules.
    pub state: Option<Value>,
}

impl ModelRecord {
    /// Captures a module's settings and state.
    pub fn from_module<M: Module + ?Sized>(module: &M) -> Result<Self> {
        Ok(Self {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            id: module.id().to_owned(),
            settings: module.encode_settings()?,
            state: module.encode_state()?,
        })
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Writes the record to a stream.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), PersistError> {
        let settings = encode_json(&self.settings, "settings")?;
        let state = self
            .state
            .as_ref()
            .map(|state| encode_json(state, "state"))
            .transpose()?;
        let id_len = u16::try_from(self.id.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "type id too long"))?;
        let flags = if state.is_some() { FLAG_HAS_STATE } else { 0 };

        // Assemble in memory so a failed encode never leaves a partial record.
        let mut buf = Vec::with_capacity(16 + self.id.len() + settings.len());
        buf.extend_from_slice(MAGIC);
        buf.push(self.version_major);
        buf.push(self.version_minor);
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(self.id.as_bytes());
        write_block(&mut buf, &settings)?;
        if let Some(state) = &state {
            write_block(&mut buf, state)?;
        }
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Parses a record from bytes.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, PersistError> {
        Self::read_from(&mut bytes)
    }

    /// Reads and validates a record from a stream.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, PersistError> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic, "magic")?;
        if &magic != MAGIC {
            return Err(PersistError::BadMagic);
        }
        let [version_major, version_minor] = read_array::<2, R>(reader, "version")?;
        if version_major > FORMAT_VERSION_MAJOR {
            return Err(PersistError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }
        let flags = u16::from_le_bytes(read_array(reader, "flags")?);
        let id_len = u16::from_le_bytes(read_array(reader, "type id")?);
        let mut id = vec![0u8; usize::from(id_len)];
        read_exact(reader, &mut id, "type id")?;
        let id = String::from_utf8(id)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let settings = decode_json(&read_block(reader, "settings")?, "settings")?;
        let state = if flags & FLAG_HAS_STATE == 0 {
            None
        } else {
            Some(decode_json(&read_block(reader, "state")?, "state")?)
        };
        Ok(Self {
            version_major,
            version_minor,
            id,
            settings,
            state,
        })
    }

    /// Loads this record into `module`, checking the type id first.
    ///
    /// An id registered as an alias of the module's id is accepted.
    pub fn apply_to<M: Module + ?Sized>(self, module: &mut M) -> Result<()> {
        if self.id != module.id() && registry::canonical_id(&self.id).as_deref() != Some(module.id())
        {
            return Err(PersistError::TypeMismatch {
                expected: module.id().to_owned(),
                found: self.id,
            }
            .into());
        }
        module.decode(self.settings, self.state)
    }
}

/// A member or stage record embedded in a composite's state block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRecord {
    /// Type id used to resolve the factory on load.
    pub type_id: String,
    /// Complete model record bytes.
    pub record: Vec<u8>,
}

impl NestedRecord {
    /// Encodes an owned member.
    pub fn capture<M: Module + ?Sized>(module: &M) -> Result<Self> {
        Ok(Self {
            type_id: module.id().to_owned(),
            record: ModelRecord::from_module(module)?.to_bytes()?,
        })
    }

    /// Encodes only the hyperparameters of an owned member.
    pub fn capture_settings<M: Module + ?Sized>(module: &M) -> Result<Self> {
        let mut record = ModelRecord::from_module(module)?;
        record.state = None;
        Ok(Self {
            type_id: module.id().to_owned(),
            record: record.to_bytes()?,
        })
    }

    /// Instantiates the member through `registry` and loads the record into it.
    pub fn restore<T>(&self, registry: &Registry<T>) -> Result<Box<T>>
    where
        T: Module + ?Sized,
    {
        let mut module = registry
            .create(&self.type_id)
            .ok_or_else(|| ModuleError::UnknownType {
                capability: registry.capability(),
                id: self.type_id.clone(),
            })?;
        ModelRecord::from_bytes(&self.record)?.apply_to(module.as_mut())?;
        Ok(module)
    }
}

/// Serializes a settings or state struct into a JSON block.
pub fn encode_block<T: Serialize>(value: &T, block: &'static str) -> Result<Value> {
    serde_json::to_value(value).map_err(|source| PersistError::Encoding { block, source }.into())
}

/// Parses a JSON block into a settings or state struct.
pub fn decode_block<T: DeserializeOwned>(value: Value, block: &'static str) -> Result<T> {
    serde_json::from_value(value).map_err(|source| PersistError::Encoding { block, source }.into())
}

fn encode_json(value: &Value, block: &'static str) -> Result<Vec<u8>, PersistError> {
    serde_json::to_vec(value).map_err(|source| PersistError::Encoding { block, source })
}

fn decode_json(bytes: &[u8], block: &'static str) -> Result<Value, PersistError> {
    serde_json::from_slice(bytes).map_err(|source| PersistError::Encoding { block, source })
}

fn write_block(buf: &mut Vec<u8>, block: &[u8]) -> Result<(), PersistError> {
    let len = u32::try_from(block.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "block exceeds 4 GiB"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(block);
    buf.extend_from_slice(&crc32fast::hash(block).to_le_bytes());
    Ok(())
}

fn read_block<R: Read + ?Sized>(reader: &mut R, block: &'static str) -> Result<Vec<u8>, PersistError> {
    let len = u32::from_le_bytes(read_array(reader, block)?);
    let mut data = Vec::new();
    let read = Read::take(&mut *reader, u64::from(len))
        .read_to_end(&mut data)
        .map_err(PersistError::Io)?;
    if read != len as usize {
        return Err(PersistError::Truncated(block));
    }
    let expected = u32::from_le_bytes(read_array(reader, block)?);
    let actual = crc32fast::hash(&data);
    if expected != actual {
        return Err(PersistError::ChecksumMismatch {
            block,
            expected,
            actual,
        });
    }
    Ok(data)
}

fn read_array<const N: usize, R: Read + ?Sized>(
    reader: &mut R,
    field: &'static str,
) -> Result<[u8; N], PersistError> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf, field)?;
    Ok(buf)
}

fn read_exact<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<(), PersistError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PersistError::Truncated(field)
        } else {
            PersistError::Io(err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(state: Option<Value>) -> ModelRecord {
        ModelRecord {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            id: "MinDist".into(),
            settings: json!({ "num_clusters": 10 }),
            state,
        }
    }

    #[test]
    fn untrained_record_has_no_state_block() {
        let bytes = record(None).to_bytes().unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 0);
        assert_eq!(ModelRecord::from_bytes(&bytes).unwrap(), record(None));
    }

    #[test]
    fn state_block_survives() {
        let original = record(Some(json!({ "centroids": [[1.0, 2.0]] })));
        let bytes = original.to_bytes().unwrap();
        assert_eq!(ModelRecord::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn corrupt_header_is_refused() {
        let mut bytes = record(None).to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ModelRecord::from_bytes(&bytes),
            Err(PersistError::BadMagic)
        ));
    }

    #[test]
    fn future_major_is_refused_but_minor_accepted() {
        let mut bytes = record(None).to_bytes().unwrap();
        bytes[5] = FORMAT_VERSION_MINOR + 3;
        assert_eq!(
            ModelRecord::from_bytes(&bytes).unwrap().version_minor,
            FORMAT_VERSION_MINOR + 3
        );
        bytes[4] = FORMAT_VERSION_MAJOR + 1;
        assert!(matches!(
            ModelRecord::from_bytes(&bytes),
            Err(PersistError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn flipped_block_byte_fails_checksum() {
        let mut bytes = record(Some(json!({ "x": 1 }))).to_bytes().unwrap();
        let last_block_byte = bytes.len() - 5;
        bytes[last_block_byte] ^= 0x01;
        assert!(matches!(
            ModelRecord::from_bytes(&bytes),
            Err(PersistError::ChecksumMismatch { block: "state", .. })
        ));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let bytes = record(Some(json!({ "x": 1 }))).to_bytes().unwrap();
        for cut in [2, 9, bytes.len() - 2] {
            assert!(matches!(
                ModelRecord::from_bytes(&bytes[..cut]),
                Err(PersistError::Truncated(_))
            ));
        }
    }
}
