use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

use super::error::DecodeError;
use super::metadata::{MetaValue, Metadata};

/// A numeric array of a measurement. Spectra and loops are 1D, area maps 2D.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
}

impl ArrayData {
    /// Build a float array from a shape and row-major values
    pub fn float(shape: &[usize], values: Vec<f64>) -> Result<Self, DecodeError> {
        let len = values.len();
        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map(Self::Float)
            .map_err(|_| DecodeError::BadShape {
                name: String::new(),
                shape: shape.to_vec(),
                len,
            })
    }

    /// Build an integer array from a shape and row-major values
    pub fn int(shape: &[usize], values: Vec<i64>) -> Result<Self, DecodeError> {
        let len = values.len();
        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map(Self::Int)
            .map_err(|_| DecodeError::BadShape {
                name: String::new(),
                shape: shape.to_vec(),
                len,
            })
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float(a) => a.shape(),
            Self::Int(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float(a) => a.len(),
            Self::Int(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<f64>> for ArrayData {
    fn from(values: Vec<f64>) -> Self {
        Self::Float(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).unwrap_or_default())
    }
}

impl From<Vec<i64>> for ArrayData {
    fn from(values: Vec<i64>) -> Self {
        Self::Int(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).unwrap_or_default())
    }
}

/// The decoded payload of one raw measurement file.
///
/// The compiler treats it as opaque beyond named arrays, their units and named metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub arrays: BTreeMap<String, ArrayData>,
    /// Physical units per array name, stored on the array's dataset
    pub units: BTreeMap<String, String>,
    pub metadata: Metadata,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style helper for adding an array
    pub fn with_array(mut self, name: &str, data: impl Into<ArrayData>) -> Self {
        self.arrays.insert(name.to_string(), data.into());
        self
    }

    /// Builder style helper for setting the units of an array
    pub fn with_units(mut self, name: &str, units: &str) -> Self {
        self.units.insert(name.to_string(), units.to_string());
        self
    }

    /// Builder style helper for adding a metadata entry
    pub fn with_meta(mut self, name: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }
}
