use hdf5::{Dataset, Group};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::container::Container;
use super::decoder::Decoder;
use super::error::{MergeError, SchemaError, WriteError};
use super::metadata::{write_metadata, write_text_attribute};
use super::position::{PositionResolver, WaferGrid};
use super::record::{ArrayData, Record};
use super::report::{FailureKind, FileOutcome, Outcome, RunReport};
use super::schema::{
    ensure_group, ensure_instrument_group, resolve_path, validate_component, NodePath,
    POSITION_UNITS, POSITION_UNITS_ATTR, RECORD_META_GROUP, RECOVERY_GROUP, SOURCE_ATTR,
    STAGING_GROUP, UNITS_ATTR, X_POS_ATTR, Y_POS_ATTR,
};

/// What to do when a record targets a position that already holds data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the stored record and report the new file as skipped
    #[default]
    Skip,
    /// Replace the stored record
    Force,
    /// Keep the stored record and report the new file as failed
    Strict,
}

/// The Merger ingests raw files into a Container.
///
/// Each file goes through decode, position resolution and a write. A record is first
/// built in the staging area and then moved to its node in one step, so an interrupted or
/// failed write never leaves a partial node behind. Failures of a single file end up in
/// its Outcome; only a bad schema path aborts, since it means a resolver is broken.
#[derive(Debug)]
pub struct Merger<'a> {
    container: &'a mut Container,
    policy: ConflictPolicy,
    grid: WaferGrid,
}

impl<'a> Merger<'a> {
    pub fn new(container: &'a mut Container, policy: ConflictPolicy) -> Self {
        Self {
            container,
            policy,
            grid: WaferGrid::default(),
        }
    }

    /// Use a different mapping geometry for the wafer positions of grid keys
    pub fn with_grid(mut self, grid: WaferGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Ingest a single raw file
    pub fn ingest(
        &mut self,
        resolver: &dyn PositionResolver,
        decoder: &dyn Decoder,
        path: &Path,
    ) -> Result<Outcome, MergeError> {
        let instrument = resolver.instrument();
        validate_component(instrument)?;

        let record = match decoder.decode(path) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Could not decode {}: {e}", path.display());
                return Ok(Outcome::failed(FailureKind::DecodeError, e));
            }
        };

        let key = match resolver.resolve(path, &record) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("{e}");
                return Ok(Outcome::failed(FailureKind::UnrecognizedFilenameFormat, e));
            }
        };

        let node = resolve_path(instrument, &key)?;
        Ok(self.write_record(&node, &record, path))
    }

    /// Ingest a batch of files for one instrument, in order
    pub fn ingest_batch<P: AsRef<Path>>(
        &mut self,
        resolver: &dyn PositionResolver,
        decoder: &dyn Decoder,
        paths: &[P],
    ) -> Result<RunReport, MergeError> {
        self.ingest_batch_with(resolver, decoder, paths, |_, _| ())
    }

    /// Ingest a batch, calling on_file with the number of files done after each one
    pub fn ingest_batch_with<P, F>(
        &mut self,
        resolver: &dyn PositionResolver,
        decoder: &dyn Decoder,
        paths: &[P],
        mut on_file: F,
    ) -> Result<RunReport, MergeError>
    where
        P: AsRef<Path>,
        F: FnMut(usize, &FileOutcome),
    {
        let total_bytes: u64 = paths
            .iter()
            .filter_map(|p| p.as_ref().metadata().ok())
            .map(|m| m.len())
            .sum();
        log::info!(
            "Compiling {} {} file(s) with total size {} into {}",
            paths.len(),
            resolver.instrument(),
            human_bytes::human_bytes(total_bytes as f64),
            self.container.path().display()
        );

        let mut report = RunReport::new(resolver.instrument());
        for (idx, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            let outcome = self.ingest(resolver, decoder, path)?;
            report.push(path, outcome);
            if let Some(entry) = report.entries.last() {
                on_file(idx + 1, entry);
            }
        }
        report.log_summary();
        Ok(report)
    }

    /// Write a record at a node, applying the conflict policy
    pub fn write_record(&mut self, node: &NodePath, record: &Record, source: &Path) -> Outcome {
        let position = node.position().to_string();
        let occupied = self.container.contains(node);
        if occupied {
            let reason = self.conflict_reason(node);
            match self.policy {
                ConflictPolicy::Skip => {
                    log::info!("Skipping {}: {reason}", source.display());
                    return Outcome::Skipped { position, reason };
                }
                ConflictPolicy::Strict => {
                    log::warn!("Conflict for {}: {reason}", source.display());
                    return Outcome::failed(FailureKind::WriteConflict, reason);
                }
                ConflictPolicy::Force => {
                    log::info!("Replacing {node} with the record of {}", source.display())
                }
            }
        }

        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source.to_string_lossy().to_string());
        if let Err(e) = self.commit(node, record, &source_name, occupied) {
            log::warn!("Could not write {} to {node}: {e}", source.display());
            return Outcome::failed(FailureKind::WriteError, e);
        }
        // Committed once relinked, a failed flush does not undo that
        if let Err(e) = self.container.flush() {
            log::warn!(
                "{node} is committed but {} could not be flushed: {e}",
                self.container.path().display()
            );
        }
        Outcome::Written {
            position,
            replaced: occupied,
        }
    }

    fn conflict_reason(&self, node: &NodePath) -> String {
        match self.container.source_of(node) {
            Ok(Some(source)) => format!("{node} already holds the record of {source}"),
            _ => format!("{node} already holds a record"),
        }
    }

    /// Stage the record, then move it into place
    fn commit(
        &mut self,
        node: &NodePath,
        record: &Record,
        source_name: &str,
        replace: bool,
    ) -> Result<(), WriteError> {
        let staged = self.container.next_staging_path(node);
        let displaced = self.container.next_staging_path(node);
        let position = self.grid.position_mm(node.key());
        let root = self.container.root();

        if let Err(e) = stage_record(root, &staged, record, source_name, position) {
            discard(root, &staged);
            return Err(e);
        }

        let created = match ensure_instrument_group(root, node.instrument()) {
            Ok((_, created)) => created,
            Err(e) => {
                discard(root, &staged);
                return Err(e);
            }
        };

        let moved = if replace {
            swap_into_place(root, &staged, &displaced, &node.relative())
        } else {
            root.relink(&staged, &node.relative())
        };
        if let Err(e) = moved {
            discard(root, &staged);
            if created {
                discard(root, node.instrument());
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Build the complete record under the staging area
fn stage_record(
    root: &Group,
    staged: &str,
    record: &Record,
    source_name: &str,
    position: Option<(f64, f64)>,
) -> Result<(), WriteError> {
    if let Some(name) = record.units.keys().find(|n| !record.arrays.contains_key(*n)) {
        return Err(SchemaError::InvalidSchemaPath(
            name.clone(),
            "units given for an array the record does not hold",
        )
        .into());
    }
    ensure_group(root, STAGING_GROUP)?;
    let group = root.create_group(staged)?;
    for (name, data) in record.arrays.iter() {
        validate_component(name)?;
        let dataset = write_array(&group, name, data)?;
        if let Some(units) = record.units.get(name) {
            write_text_attribute(&dataset, UNITS_ATTR, units)?;
        }
    }
    write_metadata(&group, RECORD_META_GROUP, &record.metadata)?;
    write_text_attribute(&group, SOURCE_ATTR, source_name)?;
    if let Some((x, y)) = position {
        group.new_attr::<f64>().create(X_POS_ATTR)?.write_scalar(&x)?;
        group.new_attr::<f64>().create(Y_POS_ATTR)?.write_scalar(&y)?;
        write_text_attribute(&group, POSITION_UNITS_ATTR, POSITION_UNITS)?;
    }
    Ok(())
}

fn write_array(group: &Group, name: &str, data: &ArrayData) -> Result<Dataset, WriteError> {
    let dataset = match data {
        ArrayData::Float(array) => {
            let dataset = group
                .new_dataset::<f64>()
                .shape(array.shape().to_vec())
                .create(name)?;
            if !array.is_empty() {
                let flat: Vec<f64> = array.iter().copied().collect();
                dataset.write_raw(flat.as_slice())?;
            }
            dataset
        }
        ArrayData::Int(array) => {
            let dataset = group
                .new_dataset::<i64>()
                .shape(array.shape().to_vec())
                .create(name)?;
            if !array.is_empty() {
                let flat: Vec<i64> = array.iter().copied().collect();
                dataset.write_raw(flat.as_slice())?;
            }
            dataset
        }
    };
    Ok(dataset)
}

/// Move the current node aside, put the staged record in its place, then drop the old one.
/// If the second move fails the old node is put back, or set aside when even that fails.
fn swap_into_place(
    root: &Group,
    staged: &str,
    displaced: &str,
    target: &str,
) -> Result<(), hdf5::Error> {
    root.relink(target, displaced)?;
    if let Err(e) = root.relink(staged, target) {
        if let Err(back) = root.relink(displaced, target) {
            log::error!("Could not restore {target} after a failed replace: {back}");
            set_aside(root, displaced);
        }
        return Err(e);
    }
    // A leftover here is swept on the next open
    if let Err(e) = root.unlink(displaced) {
        log::warn!("Could not remove replaced record {displaced}: {e}");
    }
    Ok(())
}

/// Move a staged entry to the recovery group, out of reach of the staging sweep.
/// Returns where it ended up.
fn set_aside(root: &Group, staged: &str) -> Option<String> {
    let entry = staged
        .strip_prefix(STAGING_GROUP)
        .unwrap_or(staged)
        .trim_start_matches('/');
    let base = format!("{RECOVERY_GROUP}/{entry}");
    let moved = ensure_group(root, RECOVERY_GROUP).and_then(|_| {
        let mut target = base.clone();
        let mut n = 1;
        while root.link_exists(&target) {
            n += 1;
            target = format!("{base}~{n}");
        }
        root.relink(staged, &target).map(|_| target)
    });
    match moved {
        Ok(target) => {
            log::error!("The previous record is kept at /{target}");
            Some(target)
        }
        Err(e) => {
            log::error!("Could not set {staged} aside, it will be lost on the next open: {e}");
            None
        }
    }
}

fn discard(root: &Group, path: &str) {
    if root.link_exists(path) {
        if let Err(e) = root.unlink(path) {
            log::error!("Could not discard {path}: {e}");
        }
    }
}
