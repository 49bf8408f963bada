use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::error::DecodeError;
use super::metadata::Metadata;
use super::record::{ArrayData, Record};

/// Turns one raw file into a Record.
///
/// Instrument byte decoders live outside of this crate; anything with the signature
/// `Fn(&Path) -> Result<Record, DecodeError>` can be used directly.
pub trait Decoder {
    fn decode(&self, path: &Path) -> Result<Record, DecodeError>;
}

impl<F> Decoder for F
where
    F: Fn(&Path) -> Result<Record, DecodeError>,
{
    fn decode(&self, path: &Path) -> Result<Record, DecodeError> {
        self(path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

#[derive(Debug, Deserialize)]
struct RawArray {
    #[serde(default)]
    shape: Option<Vec<usize>>,
    values: RawValues,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    arrays: BTreeMap<String, RawArray>,
    #[serde(default)]
    metadata: Metadata,
}

/// Decoder for records that were already exported to YAML:
///
/// ```yml
/// arrays:
///   counts:
///     values: [0, 3, 12, 4]
///     units: cps
///   map:
///     shape: [2, 2]
///     values: [0.1, 0.2, 0.3, 0.4]
/// metadata:
///   live_time: 30.0
/// ```
///
/// Integer lists become integer arrays. A missing shape means a 1D array.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlRecordDecoder;

impl YamlRecordDecoder {
    pub fn decode_str(yaml_str: &str) -> Result<Record, DecodeError> {
        let raw = serde_yaml::from_str::<RawRecord>(yaml_str)?;
        let mut record = Record::new();
        record.metadata = raw.metadata;
        for (name, array) in raw.arrays {
            let data = match array.values {
                RawValues::Int(values) => {
                    let shape = array.shape.unwrap_or_else(|| vec![values.len()]);
                    ArrayData::int(&shape, values)
                }
                RawValues::Float(values) => {
                    let shape = array.shape.unwrap_or_else(|| vec![values.len()]);
                    ArrayData::float(&shape, values)
                }
            };
            let data = data.map_err(|e| match e {
                DecodeError::BadShape { shape, len, .. } => DecodeError::BadShape {
                    name: name.clone(),
                    shape,
                    len,
                },
                other => other,
            })?;
            if let Some(units) = array.units {
                record.units.insert(name.clone(), units);
            }
            record.arrays.insert(name, data);
        }
        Ok(record)
    }
}

impl Decoder for YamlRecordDecoder {
    fn decode(&self, path: &Path) -> Result<Record, DecodeError> {
        let yaml_str = std::fs::read_to_string(path)?;
        Self::decode_str(&yaml_str)
    }
}
