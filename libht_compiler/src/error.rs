use std::path::PathBuf;
use thiserror::Error;

use super::compile_status::CompileStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Invalid schema path component {0:?}: {1}")]
    InvalidSchemaPath(String, &'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("File name {filename:?} does not follow the {instrument} naming convention")]
    UnrecognizedFilenameFormat {
        instrument: String,
        filename: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Decoder could not read the raw file: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Decoder failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Array {name} declares shape {shape:?} but holds {len} values")]
    BadShape {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },
    #[error("Decoder rejected the raw file: {0}")]
    BadFormat(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Record write failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Record write failed to encode a string: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("Record write failed due to an invalid name: {0}")]
    SchemaError(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("A container already exists at {0:?}")]
    AlreadyExists(PathBuf),
    #[error("No container exists at {0:?}")]
    NotFound(PathBuf),
    #[error("File {0:?} is not a container compiled under the canonical schema: {1}")]
    SchemaMismatch(PathBuf, String),
    #[error("Container failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Container failed to encode a string: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("Container found an attribute or array {0} of a type it cannot read")]
    UnsupportedType(String),
    #[error("Container holds array {0} whose data does not match its shape")]
    BadArray(String),
    #[error("Container failed while writing: {0}")]
    WriteError(#[from] WriteError),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Merger aborted due to invalid schema path: {0}")]
    SchemaError(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("RunReport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RunReport failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config does not name a container path")]
    NoContainerPath,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Container error: {0}")]
    ContainerError(#[from] ContainerError),
    #[error("Processor failed due to Merger error: {0}")]
    MergeError(#[from] MergeError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to RunReport error: {0}")]
    ReportError(#[from] ReportError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<CompileStatus>),
}
