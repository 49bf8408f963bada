use hdf5::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Group, Location};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::error::{ContainerError, WriteError};

/// Named metadata, as attached to the sample root or to a single record
pub type Metadata = BTreeMap<String, MetaValue>;

/// A single metadata value. Mappings nest arbitrarily.
///
/// Values are untagged so that sample descriptions can be written by hand in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(Metadata),
}

impl MetaValue {
    /// Numeric view of the value, used by header based position resolution
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Metadata> for MetaValue {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

/// Encode a metadata key as an HDF5 link or attribute name.
///
/// Every key is accepted. `%`, `/` and NUL are percent escaped, and the names HDF5
/// cannot hold on their own (empty, `.`, `..`) get a fixed spelling. decode_key inverts it.
pub fn encode_key(key: &str) -> String {
    match key {
        "" => return String::from("%"),
        "." => return String::from("%2E"),
        ".." => return String::from("%2E%2E"),
        _ => (),
    }
    let mut name = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => name.push_str("%25"),
            '/' => name.push_str("%2F"),
            '\0' => name.push_str("%00"),
            c => name.push(c),
        }
    }
    name
}

/// Decode a name written by encode_key
pub fn decode_key(name: &str) -> String {
    if name == "%" {
        return String::new();
    }
    // Every literal % was escaped, so each remaining % starts exactly one escape
    name.replace("%2F", "/")
        .replace("%00", "\0")
        .replace("%2E", ".")
        .replace("%25", "%")
}

/// Write a text attribute
pub fn write_text_attribute(location: &Location, name: &str, value: &str) -> Result<(), WriteError> {
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&VarLenUnicode::from_str(value)?)?;
    Ok(())
}

/// Read a text attribute, None if it is missing
pub fn read_text_attribute(location: &Location, name: &str) -> Result<Option<String>, ContainerError> {
    if !location.attr_names()?.iter().any(|n| n == name) {
        return Ok(None);
    }
    match read_scalar_attribute(location, name)? {
        MetaValue::Text(text) => Ok(Some(text)),
        _ => Err(ContainerError::UnsupportedType(name.to_string())),
    }
}

/// Write metadata as the group `name` under parent.
///
/// Scalars become attributes of the group and mappings become subgroups, so nested
/// metadata keeps its shape, empty mappings included.
pub fn write_metadata(parent: &Group, name: &str, metadata: &Metadata) -> Result<(), WriteError> {
    let group = parent.create_group(name)?;
    write_tree(&group, metadata)
}

fn write_tree(group: &Group, metadata: &Metadata) -> Result<(), WriteError> {
    for (key, value) in metadata.iter() {
        let name = encode_key(key);
        match value {
            MetaValue::Bool(v) => group.new_attr::<bool>().create(name.as_str())?.write_scalar(v)?,
            MetaValue::Int(v) => group.new_attr::<i64>().create(name.as_str())?.write_scalar(v)?,
            MetaValue::Float(v) => group.new_attr::<f64>().create(name.as_str())?.write_scalar(v)?,
            MetaValue::Text(v) => write_text_attribute(group, &name, v)?,
            MetaValue::Map(inner) => write_tree(&group.create_group(&name)?, inner)?,
        }
    }
    Ok(())
}

/// Read back metadata written by write_metadata. A missing group reads as empty.
pub fn read_metadata(parent: &Group, name: &str) -> Result<Metadata, ContainerError> {
    if !parent.link_exists(name) {
        return Ok(Metadata::new());
    }
    read_tree(&parent.group(name)?)
}

fn read_tree(group: &Group) -> Result<Metadata, ContainerError> {
    let mut metadata = Metadata::new();
    for name in group.attr_names()? {
        let value = read_scalar_attribute(group, &name)?;
        metadata.insert(decode_key(&name), value);
    }
    for name in group.member_names()? {
        let inner = read_tree(&group.group(&name)?)?;
        metadata.insert(decode_key(&name), MetaValue::Map(inner));
    }
    Ok(metadata)
}

/// Read a scalar attribute back into a MetaValue
pub fn read_scalar_attribute(location: &Location, name: &str) -> Result<MetaValue, ContainerError> {
    let attr = location.attr(name)?;
    let value = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::Boolean | TypeDescriptor::Enum(_) => MetaValue::Bool(attr.read_scalar()?),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            MetaValue::Int(attr.read_scalar::<i64>()?)
        }
        TypeDescriptor::Float(_) => MetaValue::Float(attr.read_scalar::<f64>()?),
        TypeDescriptor::VarLenUnicode => {
            MetaValue::Text(attr.read_scalar::<VarLenUnicode>()?.as_str().to_string())
        }
        TypeDescriptor::VarLenAscii => {
            MetaValue::Text(attr.read_scalar::<VarLenAscii>()?.as_str().to_string())
        }
        _ => return Err(ContainerError::UnsupportedType(name.to_string())),
    };
    Ok(value)
}
