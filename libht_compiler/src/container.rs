use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};

use super::error::{ContainerError, WriteError};
use super::metadata::{
    read_metadata, read_scalar_attribute, read_text_attribute, write_metadata,
    write_text_attribute, Metadata,
};
use super::record::{ArrayData, Record};
use super::schema::{
    ensure_group, format_marker, is_compatible_marker, is_reserved_name, NodePath, FORMAT_ATTR,
    RECORD_META_GROUP, RECOVERY_GROUP, SAMPLE_GROUP, SOURCE_ATTR, STAGING_GROUP, UNITS_ATTR,
    X_POS_ATTR, Y_POS_ATTR,
};

/// A handle on one sample container, wrapping an HDF5 file opened for writing.
///
/// The handle owns the file. It is closed when the Container is dropped or closed,
/// whichever way the run ends, and every committed record has been flushed by then.
#[derive(Debug)]
pub struct Container {
    file_handle: File,
    path: PathBuf,
    staging_sequence: u64,
}

impl Container {
    /// Create a new container at path, writing the sample metadata exactly as given.
    ///
    /// Refuses to touch anything that already exists at path.
    pub fn create(path: &Path, sample: &Metadata) -> Result<Self, ContainerError> {
        if path.exists() {
            return Err(ContainerError::AlreadyExists(path.to_path_buf()));
        }

        let file_handle = File::create_excl(path)?;
        if let Err(e) = Self::write_root(&file_handle, sample) {
            drop(file_handle);
            if let Err(rm) = std::fs::remove_file(path) {
                log::error!("Could not remove incomplete container {}: {rm}", path.display());
            }
            return Err(e);
        }
        file_handle.flush()?;
        log::info!("Created container {}", path.display());

        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            staging_sequence: 0,
        })
    }

    fn write_root(file_handle: &File, sample: &Metadata) -> Result<(), ContainerError> {
        write_text_attribute(file_handle, FORMAT_ATTR, &format_marker())?;
        write_metadata(file_handle, SAMPLE_GROUP, sample)?;
        ensure_group(file_handle, STAGING_GROUP)?;
        Ok(())
    }

    /// Open a container made by this crate for incremental writes.
    ///
    /// Anything left in the staging area by an interrupted run is discarded.
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        if !path.exists() {
            return Err(ContainerError::NotFound(path.to_path_buf()));
        }
        let file_handle = File::open_rw(path).map_err(|e| {
            ContainerError::SchemaMismatch(path.to_path_buf(), format!("not an HDF5 file ({e})"))
        })?;

        let marker = match file_handle.attr(FORMAT_ATTR) {
            Ok(attr) => attr.read_scalar::<VarLenUnicode>().map_err(|_| {
                ContainerError::SchemaMismatch(
                    path.to_path_buf(),
                    format!("{FORMAT_ATTR} is not a string"),
                )
            })?,
            Err(_) => {
                return Err(ContainerError::SchemaMismatch(
                    path.to_path_buf(),
                    format!("missing {FORMAT_ATTR} attribute"),
                ))
            }
        };
        if !is_compatible_marker(marker.as_str()) {
            return Err(ContainerError::SchemaMismatch(
                path.to_path_buf(),
                format!("incompatible format {}, expected {}", marker.as_str(), format_marker()),
            ));
        }

        let mut container = Self {
            file_handle,
            path: path.to_path_buf(),
            staging_sequence: 0,
        };
        container.sweep_staging()?;
        let recovered = container.recovered()?;
        if !recovered.is_empty() {
            log::warn!(
                "{} holds {} record(s) set aside by a failed replace under /{RECOVERY_GROUP}",
                path.display(),
                recovered.len()
            );
        }
        log::info!("Opened container {} for extension", path.display());
        Ok(container)
    }

    /// Drop incomplete records from a previous run
    fn sweep_staging(&mut self) -> Result<(), ContainerError> {
        let staging = ensure_group(&self.file_handle, STAGING_GROUP)?;
        let leftovers = staging.member_names()?;
        if leftovers.is_empty() {
            return Ok(());
        }
        log::warn!(
            "Discarding {} incomplete record(s) left by an interrupted run in {}",
            leftovers.len(),
            self.path.display()
        );
        for name in leftovers.iter() {
            staging.unlink(name)?;
        }
        self.file_handle.flush()?;
        Ok(())
    }

    /// Flush and release the file
    pub fn close(self) -> Result<(), ContainerError> {
        self.file_handle.flush()?;
        log::info!("Closed container {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn root(&self) -> &Group {
        &self.file_handle
    }

    pub(crate) fn flush(&self) -> Result<(), WriteError> {
        self.file_handle.flush()?;
        Ok(())
    }

    /// A staging entry name that is unique within this handle's lifetime
    pub(crate) fn next_staging_path(&mut self, node: &NodePath) -> String {
        self.staging_sequence += 1;
        format!("{STAGING_GROUP}/{}", node.staging_name(self.staging_sequence))
    }

    /// The sample metadata written at creation
    pub fn sample_metadata(&self) -> Result<Metadata, ContainerError> {
        read_metadata(&self.file_handle, SAMPLE_GROUP)
    }

    /// Records set aside after a replace that could neither finish nor roll back
    pub fn recovered(&self) -> Result<Vec<String>, ContainerError> {
        if !self.file_handle.link_exists(RECOVERY_GROUP) {
            return Ok(vec![]);
        }
        Ok(self.file_handle.group(RECOVERY_GROUP)?.member_names()?)
    }

    /// Names of the instrument subtrees present
    pub fn instruments(&self) -> Result<Vec<String>, ContainerError> {
        Ok(self
            .file_handle
            .member_names()?
            .into_iter()
            .filter(|name| !is_reserved_name(name))
            .collect())
    }

    /// Position keys present under an instrument. Empty if the subtree does not exist yet.
    pub fn positions(&self, instrument: &str) -> Result<Vec<String>, ContainerError> {
        if !self.file_handle.link_exists(instrument) {
            return Ok(vec![]);
        }
        Ok(self.file_handle.group(instrument)?.member_names()?)
    }

    /// Check if a node exists at the path
    pub fn contains(&self, node: &NodePath) -> bool {
        match self.file_handle.group(node.instrument()) {
            Ok(group) => group.link_exists(node.position()),
            Err(_) => false,
        }
    }

    fn node_group(&self, node: &NodePath) -> Result<Option<Group>, ContainerError> {
        if !self.contains(node) {
            return Ok(None);
        }
        Ok(Some(self.file_handle.group(&node.relative())?))
    }

    /// File name of the raw file whose record populates the node
    pub fn source_of(&self, node: &NodePath) -> Result<Option<String>, ContainerError> {
        let Some(group) = self.node_group(node)? else {
            return Ok(None);
        };
        read_text_attribute(&group, SOURCE_ATTR)
    }

    /// Wafer position in mm stored with the node, for keys that encode one
    pub fn wafer_position(&self, node: &NodePath) -> Result<Option<(f64, f64)>, ContainerError> {
        let Some(group) = self.node_group(node)? else {
            return Ok(None);
        };
        let names = group.attr_names()?;
        if !names.iter().any(|n| n == X_POS_ATTR) || !names.iter().any(|n| n == Y_POS_ATTR) {
            return Ok(None);
        }
        let x = read_scalar_attribute(&group, X_POS_ATTR)?.as_f64();
        let y = read_scalar_attribute(&group, Y_POS_ATTR)?.as_f64();
        match (x, y) {
            (Some(x), Some(y)) => Ok(Some((x, y))),
            _ => Err(ContainerError::UnsupportedType(X_POS_ATTR.to_string())),
        }
    }

    /// Read back the record stored at a node
    pub fn read_record(&self, node: &NodePath) -> Result<Option<Record>, ContainerError> {
        let Some(group) = self.node_group(node)? else {
            return Ok(None);
        };
        let mut record = Record::new();
        for name in group.member_names()? {
            if name == RECORD_META_GROUP {
                continue;
            }
            let dataset = group.dataset(&name)?;
            if let Some(units) = read_text_attribute(&dataset, UNITS_ATTR)? {
                record.units.insert(name.clone(), units);
            }
            record.arrays.insert(name.clone(), read_array(&dataset, &name)?);
        }
        record.metadata = read_metadata(&group, RECORD_META_GROUP)?;
        Ok(Some(record))
    }
}

fn read_array(dataset: &Dataset, name: &str) -> Result<ArrayData, ContainerError> {
    let shape = dataset.shape();
    let bad = |_| ContainerError::BadArray(name.to_string());
    match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::Float(_) => {
            let values = dataset.read_raw::<f64>()?;
            Ok(ArrayData::Float(
                ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(bad)?,
            ))
        }
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            let values = dataset.read_raw::<i64>()?;
            Ok(ArrayData::Int(
                ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(bad)?,
            ))
        }
        _ => Err(ContainerError::UnsupportedType(name.to_string())),
    }
}
