//! The canonical layout of a sample container.
//!
//! ```text
//! sample.h5 - ht_format
//! |---- __sample__ - <sample metadata...>
//! |---- __staging__
//! |---- __recovered__
//! |---- edx - HT_type
//! |    |---- scan_1,1 - ht_source, x_pos, y_pos, position_units
//! |    |    |---- __meta__ - <record metadata...>
//! |    |    |---- counts(dset) - units
//! |    |    |---- energy(dset) - units
//! |---- moke - HT_type
//! |    |---- (-20.0,10.0) - ht_source, x_pos, y_pos, position_units
//! |    |    |---- __meta__ - <record metadata...>
//! |    |    |---- magnetization(dset)
//! ```
//!
//! Caller metadata lives in its own groups (`__sample__`, `__meta__`), so the attributes
//! on the root and on nodes belong to the compiler alone. Nothing outside of this module
//! decides where a node lives.
use hdf5::Group;
use std::fmt::Display;

use super::error::{SchemaError, WriteError};
use super::metadata::write_text_attribute;
use super::position::PositionKey;

/// Root attribute holding `<crate>:<version>`; its presence marks a compiled container
pub const FORMAT_ATTR: &str = "ht_format";
/// Version of the persisted layout. Only the major part has to match on open.
pub const FORMAT_VERSION: &str = "1.0";
/// Instrument subtree attribute naming the modality
pub const INSTRUMENT_TYPE_ATTR: &str = "HT_type";
/// Position node attribute naming the raw file the record came from
pub const SOURCE_ATTR: &str = "ht_source";
/// Position node attributes holding the wafer position, when the key encodes one
pub const X_POS_ATTR: &str = "x_pos";
pub const Y_POS_ATTR: &str = "y_pos";
pub const POSITION_UNITS_ATTR: &str = "position_units";
pub const POSITION_UNITS: &str = "mm";
/// Dataset attribute holding the physical units of an array
pub const UNITS_ATTR: &str = "units";
/// Root group holding the sample metadata
pub const SAMPLE_GROUP: &str = "__sample__";
/// Node group holding the record metadata
pub const RECORD_META_GROUP: &str = "__meta__";
/// Root group where records are built before they are moved into place
pub const STAGING_GROUP: &str = "__staging__";
/// Root group keeping records that could not be put back after a failed replace.
/// Unlike the staging area it is never swept.
pub const RECOVERY_GROUP: &str = "__recovered__";

/// The format marker written at creation
pub fn format_marker() -> String {
    format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION)
}

/// Check a stored format marker against the one this build writes
pub fn is_compatible_marker(marker: &str) -> bool {
    let Some((name, version)) = marker.split_once(':') else {
        return false;
    };
    let major = |v: &str| v.split('.').next().map(str::to_string);
    name == env!("CARGO_PKG_NAME") && major(version) == major(FORMAT_VERSION)
}

/// Names the layout claims for itself, at the root or inside a node
pub fn is_reserved_name(name: &str) -> bool {
    [SAMPLE_GROUP, RECORD_META_GROUP, STAGING_GROUP, RECOVERY_GROUP].contains(&name)
}

/// Validate a single level of the hierarchical address (instrument name, position key
/// or array name)
pub fn validate_component(name: &str) -> Result<(), SchemaError> {
    let fail = |reason| Err(SchemaError::InvalidSchemaPath(name.to_string(), reason));
    if name.is_empty() {
        return fail("name is empty");
    }
    if name == "." || name == ".." {
        return fail("name is a relative path marker");
    }
    if name.contains('/') {
        return fail("name contains a path separator");
    }
    if name.contains('\0') {
        return fail("name contains a NUL character");
    }
    if name.trim() != name {
        return fail("name has leading or trailing whitespace");
    }
    if is_reserved_name(name) {
        return fail("name is reserved by the container layout");
    }
    Ok(())
}

/// Address of one position node: `/<instrument>/<position>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath {
    instrument: String,
    position: String,
    key: PositionKey,
}

impl NodePath {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    /// The key the position name was rendered from
    pub fn key(&self) -> &PositionKey {
        &self.key
    }

    /// Path relative to the root group
    pub fn relative(&self) -> String {
        format!("{}/{}", self.instrument, self.position)
    }

    /// Name of the staging entry used while this node is being written
    pub fn staging_name(&self, sequence: u64) -> String {
        format!("{}@{}#{}", self.instrument, self.position, sequence)
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.instrument, self.position)
    }
}

/// Resolve the node path for an (instrument, position) pair. Pure; creates nothing.
pub fn resolve_path(instrument: &str, position: &PositionKey) -> Result<NodePath, SchemaError> {
    let rendered = position.to_string();
    validate_component(instrument)?;
    validate_component(&rendered)?;
    Ok(NodePath {
        instrument: instrument.to_string(),
        position: rendered,
        key: position.clone(),
    })
}

/// Get the instrument subtree, creating it if missing.
///
/// Returns the group and whether it was created by this call, so that a failed commit
/// can remove a subtree it introduced.
pub fn ensure_instrument_group(root: &Group, instrument: &str) -> Result<(Group, bool), WriteError> {
    validate_component(instrument)?;
    if root.link_exists(instrument) {
        return Ok((root.group(instrument)?, false));
    }
    let group = root.create_group(instrument)?;
    write_text_attribute(&group, INSTRUMENT_TYPE_ATTR, instrument)?;
    Ok((group, true))
}

/// Get a root level group of the layout, creating it if missing
pub fn ensure_group(root: &Group, name: &str) -> Result<Group, hdf5::Error> {
    if root.link_exists(name) {
        root.group(name)
    } else {
        root.create_group(name)
    }
}
