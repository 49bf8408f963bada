use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

use super::error::ResolveError;
use super::record::Record;

/// Bruker mapping exports end the stem with the (x,y) scan indices
static EDX_GRID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*(-?\d+)\s*,\s*(-?\d+)\s*\)$").expect("Invalid regex for EDX grid names")
});
/// Point exports end the stem with a pN counter
static EDX_POINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[_\-\s])[pP](\d{1,4})$").expect("Invalid regex for EDX point names")
});
/// MOKE exports may carry stage coordinates in the name
static MOKE_COORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[_\-\s])x(-?\d+(?:\.\d+)?)_y(-?\d+(?:\.\d+)?)(?:$|[_\-\s])")
        .expect("Invalid regex for MOKE coordinate names")
});

/// Header fields holding the stage position, for formats that do not encode it in the name
pub const HEADER_X_POS: &str = "x_pos";
pub const HEADER_Y_POS: &str = "y_pos";

/// The canonical identifier of a measurement location within one instrument subtree.
///
/// Each variant has exactly one rendering, which is what ends up as the node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PositionKey {
    /// Scan indices of a mapping, rendered `scan_X,Y`
    Grid { x: i32, y: i32 },
    /// Point counter, rendered `pNN`
    Point(u32),
    /// Scan counter, rendered `scan_NNNN`
    Scan(u32),
    /// Stage coordinates in tenths of a unit, rendered `(X.X,Y.Y)`
    Coord { x_tenths: i64, y_tenths: i64 },
    /// Free form key for custom resolvers; validated by the schema like any other
    Named(String),
}

impl PositionKey {
    /// Build a coordinate key, rounding to one decimal.
    ///
    /// None when a coordinate is not finite or does not fit the key once scaled.
    pub fn coord(x: f64, y: f64) -> Option<Self> {
        Some(Self::Coord {
            x_tenths: to_tenths(x)?,
            y_tenths: to_tenths(y)?,
        })
    }
}

fn to_tenths(value: f64) -> Option<i64> {
    let scaled = (value * 10.0).round();
    // i64::MAX as f64 is 2^63, which no longer fits
    if scaled.is_finite() && scaled.abs() < i64::MAX as f64 {
        Some(scaled as i64)
    } else {
        None
    }
}

/// Stage geometry of an EDX mapping: the wafer position of scan index (1,1) and the
/// pitch between indices, in mm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaferGrid {
    pub step_x: f64,
    pub step_y: f64,
    pub start_x: f64,
    pub start_y: f64,
}

impl Default for WaferGrid {
    fn default() -> Self {
        Self {
            step_x: 5.0,
            step_y: 5.0,
            start_x: -40.0,
            start_y: -40.0,
        }
    }
}

impl WaferGrid {
    /// Wafer position in mm of a key, for the keys that encode one
    pub fn position_mm(&self, key: &PositionKey) -> Option<(f64, f64)> {
        match key {
            PositionKey::Grid { x, y } => Some((
                (f64::from(*x) - 1.0) * self.step_x + self.start_x,
                (f64::from(*y) - 1.0) * self.step_y + self.start_y,
            )),
            PositionKey::Coord { x_tenths, y_tenths } => {
                Some((*x_tenths as f64 / 10.0, *y_tenths as f64 / 10.0))
            }
            _ => None,
        }
    }
}

fn write_tenths(f: &mut std::fmt::Formatter<'_>, tenths: i64) -> std::fmt::Result {
    let sign = if tenths < 0 { "-" } else { "" };
    let abs = tenths.unsigned_abs();
    write!(f, "{sign}{}.{}", abs / 10, abs % 10)
}

impl Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grid { x, y } => write!(f, "scan_{x},{y}"),
            Self::Point(n) => write!(f, "p{n:02}"),
            Self::Scan(n) => write!(f, "scan_{n:04}"),
            Self::Coord { x_tenths, y_tenths } => {
                write!(f, "(")?;
                write_tenths(f, *x_tenths)?;
                write!(f, ",")?;
                write_tenths(f, *y_tenths)?;
                write!(f, ")")
            }
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Derives the position key of a raw file.
///
/// Implementations must be deterministic, and must fail with
/// `UnrecognizedFilenameFormat` rather than guess when a name is outside their grammar.
/// Two files resolving to the same key is not an error here; the merger decides.
pub trait PositionResolver {
    /// Name of the instrument subtree fed by this resolver
    fn instrument(&self) -> &str;

    /// Resolve the key from the raw file path and its decoded record
    fn resolve(&self, path: &Path, record: &Record) -> Result<PositionKey, ResolveError>;
}

/// The instruments of the high-throughput line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Edx,
    Xrd,
    Moke,
}

impl Instrument {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Edx => "edx",
            Self::Xrd => "xrd",
            Self::Moke => "moke",
        }
    }

    fn unrecognized(&self, path: &Path) -> ResolveError {
        ResolveError::UnrecognizedFilenameFormat {
            instrument: self.name().to_string(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    fn resolve_edx(&self, stem: &str, path: &Path) -> Result<PositionKey, ResolveError> {
        if let Some(caps) = EDX_GRID_REGEX.captures(stem) {
            let x = caps[1].parse().map_err(|_| self.unrecognized(path))?;
            let y = caps[2].parse().map_err(|_| self.unrecognized(path))?;
            return Ok(PositionKey::Grid { x, y });
        }
        if let Some(caps) = EDX_POINT_REGEX.captures(stem) {
            let n = caps[1].parse().map_err(|_| self.unrecognized(path))?;
            return Ok(PositionKey::Point(n));
        }
        Err(self.unrecognized(path))
    }

    fn resolve_xrd(&self, stem: &str, path: &Path) -> Result<PositionKey, ResolveError> {
        // The first token is the sample prefix, which is often numeric itself
        let counter = stem
            .split('_')
            .skip(1)
            .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
            .last()
            .ok_or_else(|| self.unrecognized(path))?;
        let n = counter.parse().map_err(|_| self.unrecognized(path))?;
        Ok(PositionKey::Scan(n))
    }

    fn resolve_moke(
        &self,
        stem: &str,
        path: &Path,
        record: &Record,
    ) -> Result<PositionKey, ResolveError> {
        let header_x = record.metadata.get(HEADER_X_POS).and_then(|v| v.as_f64());
        let header_y = record.metadata.get(HEADER_Y_POS).and_then(|v| v.as_f64());
        if let (Some(x), Some(y)) = (header_x, header_y) {
            return PositionKey::coord(x, y).ok_or_else(|| self.unrecognized(path));
        }
        if let Some(caps) = MOKE_COORD_REGEX.captures(stem) {
            let x: f64 = caps[1].parse().map_err(|_| self.unrecognized(path))?;
            let y: f64 = caps[2].parse().map_err(|_| self.unrecognized(path))?;
            return PositionKey::coord(x, y).ok_or_else(|| self.unrecognized(path));
        }
        Err(self.unrecognized(path))
    }
}

impl Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl PositionResolver for Instrument {
    fn instrument(&self) -> &str {
        self.name()
    }

    fn resolve(&self, path: &Path, record: &Record) -> Result<PositionKey, ResolveError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| self.unrecognized(path))?;
        match self {
            Self::Edx => self.resolve_edx(stem, path),
            Self::Xrd => self.resolve_xrd(stem, path),
            Self::Moke => self.resolve_moke(stem, path, record),
        }
    }
}
