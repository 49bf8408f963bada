//! # ht_compiler
//!
//! ht_compiler gathers the measurements of a high-throughput combinatorial experiment
//! into one HDF5 file per sample. A compositional spread wafer is measured at many
//! positions by several instruments (EDX, XRD mapping, MOKE), and every instrument
//! writes its own files with its own naming convention. ht_compiler works out which
//! position each file belongs to and merges its data into the sample's container.
//!
//! Compilation can be repeated as often as needed against the same container. Positions
//! that already hold data are reported as skipped rather than written twice, and a file
//! that fails (unreadable, badly named, failed write) never affects the other files of
//! the batch or the data that is already in the container.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### HDF5
//!
//! Before building ht_compiler, HDF5 must be installed. Typically this will be
//! installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If HDF5 lives in a custom location,
//! write the following snippet into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./ht_compiler_cli` from the
//! top level repository.
//!
//! ## Configuration
//!
//! The CLI reads a YAML job description:
//!
//! ```yml
//! container_path: /data/2711_LaCeNdFeB.h5
//! sample:
//!   sample_name: 2711_LaCeNdFeB
//!   substrate:
//!     material: Si
//! policy: skip
//! write_reports: true
//! grid:
//!   step_x: 5.0
//!   step_y: 5.0
//!   start_x: -40.0
//!   start_y: -40.0
//! instruments:
//!   edx:
//!   - /data/edx/2711_LaCeNdFeB (1,1).yml
//!   moke:
//!   - /data/moke/2711_x-20_y10.yml
//! ```
//!
//! The CLI expects records that were exported to YAML (see `decoder::YamlRecordDecoder`);
//! instrument decoders plug in through the `decoder::Decoder` trait.
//!
//! The sample metadata is only used when the container does not exist yet. `policy`
//! decides what happens when a file targets a position that already holds data:
//!
//! - `skip`: keep the stored record, report the file as skipped (default)
//! - `force`: replace the stored record
//! - `strict`: keep the stored record, report the file as failed
//!
//! `grid` places EDX mapping scans on the wafer: scan `(x,y)` sits at
//! `((x-1)*step_x + start_x, (y-1)*step_y + start_y)` mm. It defaults to the values above.
//! `write_reports` defaults to true.
//!
//! ## Position naming
//!
//! The extension of a file is ignored; the stem decides the position.
//!
//! | Instrument | File name | Node |
//! |---|---|---|
//! | EDX | `... (3,12).spx` | `scan_3,12` |
//! | EDX | `..._p1.spx` | `p01` |
//! | XRD | `2711_LaCeNdFeB_0012_frame.img` | `scan_0012` |
//! | MOKE | header `x_pos`/`y_pos`, or `..._x-20_y10...` | `(-20.0,10.0)` |
//!
//! ## Output
//!
//! ```text
//! sample.h5 - ht_format
//! |---- __sample__ - <sample metadata...>
//! |    |---- substrate - material
//! |---- edx - HT_type
//! |    |---- scan_3,12 - ht_source, x_pos, y_pos, position_units
//! |    |    |---- __meta__ - <record metadata...>
//! |    |    |---- counts(dset) - units
//! |    |    |---- energy(dset) - units
//! |---- xrd - HT_type
//! |    |---- scan_0012 - ht_source
//! |    |    |---- __meta__ - <record metadata...>
//! |    |    |---- image(dset)
//! ```
//!
//! Scalar metadata values are attributes and nested mappings are subgroups. Keys are kept
//! as given; `%`, `/` and NUL are percent escaped in the stored names.
//! With `write_reports`, a YAML report per instrument listing the outcome of every
//! file is written next to the container.
pub mod compile_status;
pub mod config;
pub mod container;
pub mod decoder;
pub mod error;
pub mod merger;
pub mod metadata;
pub mod position;
pub mod process;
pub mod record;
pub mod report;
pub mod schema;
