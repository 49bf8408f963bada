//! End to end tests: containers on disk, reopened between runs like separate processes would.
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libht_compiler::compile_status::{CompileStatus, Stage};
use libht_compiler::config::Config;
use libht_compiler::container::Container;
use libht_compiler::decoder::{Decoder, YamlRecordDecoder};
use libht_compiler::error::{ContainerError, DecodeError};
use libht_compiler::merger::{ConflictPolicy, Merger};
use libht_compiler::metadata::{MetaValue, Metadata};
use libht_compiler::position::{Instrument, PositionKey};
use libht_compiler::process::compile;
use libht_compiler::record::{ArrayData, Record};
use libht_compiler::report::{FailureKind, Outcome, RunStatus};
use libht_compiler::schema::{resolve_path, STAGING_GROUP};
use tempfile::TempDir;

fn sample() -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("sample_name".into(), "2711_LaCeNdFeB".into());
    meta
}

/// Write a pre-exported EDX spectrum, slightly different per file
fn write_spectrum(dir: &Path, name: &str, seed: i64) -> PathBuf {
    let path = dir.join(name);
    let yaml_str = format!(
        "arrays:\n  counts:\n    values: [{}, {}, {}, {}]\n    units: cps\n  energy:\n    values: [0.01, 0.02, 0.03, 0.04]\n    units: keV\nmetadata:\n  live_time: 30.0\n  detector:\n    model: XFlash 6|30\n    temperature: -25\n    Det.Thickness_mm: 0.45\n  calibration: {{}}\n",
        seed,
        seed + 1,
        seed * 2,
        seed * 3
    );
    std::fs::write(&path, yaml_str).unwrap();
    path
}

fn setup() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let container_path = dir.path().join("S.container");
    (dir, container_path)
}

#[test]
fn test_duplicate_position_scenario() {
    let (dir, container_path) = setup();
    let files = vec![
        write_spectrum(dir.path(), "2711_LaCeNdFeB_p01.yml", 1),
        write_spectrum(dir.path(), "2711_LaCeNdFeB_p02.yml", 2),
        write_spectrum(dir.path(), "2711_LaCeNdFeB_repeat_p01.yml", 3),
    ];

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let report = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest_batch(&Instrument::Edx, &YamlRecordDecoder, &files)
        .unwrap();

    assert!(report.entries[0].outcome.is_written());
    assert!(report.entries[1].outcome.is_written());
    match &report.entries[2].outcome {
        Outcome::Skipped { position, .. } => assert_eq!(position, "p01"),
        other => panic!("expected a skip, got {other:?}"),
    }
    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(container.positions("edx").unwrap(), vec!["p01", "p02"]);
    container.close().unwrap();
}

#[test]
fn test_ingest_is_idempotent_across_runs() {
    let (dir, container_path) = setup();
    let file = write_spectrum(dir.path(), "2711_LaCeNdFeB (4,7).yml", 5);
    let node = resolve_path("edx", &PositionKey::Grid { x: 4, y: 7 }).unwrap();

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let first = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Edx, &YamlRecordDecoder, &file)
        .unwrap();
    assert_eq!(
        first,
        Outcome::Written {
            position: "scan_4,7".into(),
            replaced: false
        }
    );
    let stored = container.read_record(&node).unwrap();
    container.close().unwrap();

    let mut container = Container::open(&container_path).unwrap();
    let second = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Edx, &YamlRecordDecoder, &file)
        .unwrap();
    assert!(second.is_skipped());
    assert_eq!(container.read_record(&node).unwrap(), stored);
    assert_eq!(container.positions("edx").unwrap().len(), 1);
}

#[test]
fn test_decode_error_is_isolated() {
    let (dir, container_path) = setup();
    let broken = dir.path().join("2711_LaCeNdFeB_p03.yml");
    std::fs::write(&broken, "arrays: [this is not, a record").unwrap();
    let files = vec![
        write_spectrum(dir.path(), "2711_LaCeNdFeB_p01.yml", 1),
        write_spectrum(dir.path(), "2711_LaCeNdFeB_p02.yml", 2),
        broken.clone(),
        write_spectrum(dir.path(), "2711_LaCeNdFeB_p04.yml", 4),
    ];

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let report = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest_batch(&Instrument::Edx, &YamlRecordDecoder, &files)
        .unwrap();

    assert_eq!(report.written(), 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.status(), RunStatus::PartialSuccess);
    assert!(matches!(
        report.outcome_of(&broken),
        Some(Outcome::Failed {
            kind: FailureKind::DecodeError,
            ..
        })
    ));
    assert_eq!(
        container.positions("edx").unwrap(),
        vec!["p01", "p02", "p04"]
    );
}

#[test]
fn test_files_are_processed_in_order() {
    let (dir, container_path) = setup();
    let files = vec![
        write_spectrum(dir.path(), "b_p01.yml", 10),
        write_spectrum(dir.path(), "a_p01.yml", 20),
    ];
    let mut container = Container::create(&container_path, &sample()).unwrap();
    let mut seen = vec![];
    Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest_batch_with(&Instrument::Edx, &YamlRecordDecoder, &files, |done, entry| {
            seen.push((done, entry.file.clone()))
        })
        .unwrap();
    assert_eq!(seen, vec![(1, files[0].clone()), (2, files[1].clone())]);

    let node = resolve_path("edx", &PositionKey::Point(1)).unwrap();
    assert_eq!(
        container.source_of(&node).unwrap().as_deref(),
        Some("b_p01.yml")
    );
}

#[test]
fn test_failed_write_leaves_no_node_after_reopen() {
    let (dir, container_path) = setup();
    let decoder = |_: &Path| -> Result<Record, DecodeError> {
        Ok(Record::new()
            .with_array("counts", vec![1_i64, 2, 3])
            .with_array("zz/unwritable", vec![1.0]))
    };
    let raw = dir.path().join("2711_LaCeNdFeB_0009.img");

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let outcome = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Xrd, &decoder, &raw)
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::WriteError,
            ..
        }
    ));
    container.close().unwrap();

    let container = Container::open(&container_path).unwrap();
    let node = resolve_path("xrd", &PositionKey::Scan(9)).unwrap();
    assert!(!container.contains(&node));
    assert!(container.read_record(&node).unwrap().is_none());
    assert!(container.positions("xrd").unwrap().is_empty());
}

#[test]
fn test_interrupted_staging_is_discarded_on_open() {
    let (_dir, container_path) = setup();
    Container::create(&container_path, &sample())
        .unwrap()
        .close()
        .unwrap();

    // What a run killed between staging and commit leaves behind
    {
        let file = hdf5::File::open_rw(&container_path).unwrap();
        let leftover = file
            .create_group(&format!("{STAGING_GROUP}/edx@p01#1"))
            .unwrap();
        leftover
            .new_dataset::<f64>()
            .shape(vec![2])
            .create("energy")
            .unwrap();
    }

    let container = Container::open(&container_path).unwrap();
    assert!(container.instruments().unwrap().is_empty());
    drop(container);
    let file = hdf5::File::open(&container_path).unwrap();
    assert!(file.group(STAGING_GROUP).unwrap().member_names().unwrap().is_empty());
}

#[test]
fn test_paths_are_stable_across_reopen() {
    let (dir, container_path) = setup();
    let file = write_spectrum(dir.path(), "2711_LaCeNdFeB_p7.yml", 1);
    let mut container = Container::create(&container_path, &sample()).unwrap();
    Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Edx, &YamlRecordDecoder, &file)
        .unwrap();
    container.close().unwrap();

    let node = resolve_path("edx", &PositionKey::Point(7)).unwrap();
    assert_eq!(node.to_string(), "/edx/p07");
    let container = Container::open(&container_path).unwrap();
    assert!(container.contains(&node));
    assert_eq!(node, resolve_path("edx", &PositionKey::Point(7)).unwrap());
}

#[test]
fn test_record_round_trip() {
    let (dir, container_path) = setup();
    let file = write_spectrum(dir.path(), "2711_LaCeNdFeB_p01.yml", 3);
    let decoded = YamlRecordDecoder.decode(&file).unwrap();

    let mut container = Container::create(&container_path, &sample()).unwrap();
    Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Edx, &YamlRecordDecoder, &file)
        .unwrap();
    container.close().unwrap();

    let container = Container::open(&container_path).unwrap();
    let node = resolve_path("edx", &PositionKey::Point(1)).unwrap();
    let stored = container.read_record(&node).unwrap().unwrap();
    assert_eq!(stored, decoded);
    assert_eq!(stored.units["counts"], "cps");
    assert_eq!(stored.units["energy"], "keV");
    assert_eq!(stored.metadata["calibration"], MetaValue::Map(Metadata::new()));
    assert_eq!(
        stored.metadata["detector"],
        MetaValue::Map(
            [
                ("Det.Thickness_mm".to_string(), MetaValue::Float(0.45)),
                ("model".to_string(), MetaValue::from("XFlash 6|30")),
                ("temperature".to_string(), MetaValue::Int(-25)),
            ]
            .into_iter()
            .collect()
        )
    );
    assert_eq!(container.sample_metadata().unwrap(), sample());
}

#[test]
fn test_xrd_image_round_trip() {
    let (dir, container_path) = setup();
    let image = Record::new()
        .with_array(
            "image",
            ArrayData::int(&[2, 3], vec![10, 20, 30, 40, 50, 60]).unwrap(),
        )
        .with_meta("exposure_s", 12.5);
    let expected = image.clone();
    let decoder = move |_: &Path| -> Result<Record, DecodeError> { Ok(image.clone()) };

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let outcome = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(
            &Instrument::Xrd,
            &decoder,
            &dir.path().join("2711_LaCeNdFeB_0012_frame.img"),
        )
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Written {
            position: "scan_0012".into(),
            replaced: false
        }
    );
    let node = resolve_path("xrd", &PositionKey::Scan(12)).unwrap();
    assert_eq!(container.read_record(&node).unwrap(), Some(expected));
}

#[test]
fn test_moke_position_from_header() {
    let (dir, container_path) = setup();
    let path = dir.path().join("loop_017.yml");
    std::fs::write(
        &path,
        "arrays:\n  field:\n    values: [-1.0, 0.0, 1.0]\n  kerr_rotation:\n    values: [-0.5, 0.0, 0.5]\nmetadata:\n  x_pos: -20.0\n  y_pos: 10\n",
    )
    .unwrap();

    let mut container = Container::create(&container_path, &sample()).unwrap();
    let outcome = Merger::new(&mut container, ConflictPolicy::Skip)
        .ingest(&Instrument::Moke, &YamlRecordDecoder, &path)
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Written {
            position: "(-20.0,10.0)".into(),
            replaced: false
        }
    );
    assert_eq!(container.instruments().unwrap(), vec!["moke"]);
}

#[test]
fn test_create_refuses_existing_container() {
    let (_dir, container_path) = setup();
    Container::create(&container_path, &sample())
        .unwrap()
        .close()
        .unwrap();
    let mut other = sample();
    other.insert("sample_name".into(), "somebody else".into());
    assert!(matches!(
        Container::create(&container_path, &other),
        Err(ContainerError::AlreadyExists(_))
    ));
    let container = Container::open(&container_path).unwrap();
    assert_eq!(container.sample_metadata().unwrap(), sample());
}

#[test]
fn test_compile_driver() {
    let (dir, container_path) = setup();
    let mut config = Config::default();
    config.container_path = container_path.clone();
    config.sample = sample();
    config.sample.insert("ht_batch".into(), MetaValue::Int(3));
    config.sample.insert("deposition.power_W".into(), MetaValue::Float(80.0));
    config.sample.insert("processing_history".into(), MetaValue::Map(Metadata::new()));
    config.write_reports = true;
    config.instruments.insert(
        Instrument::Edx,
        vec![
            write_spectrum(dir.path(), "2711_LaCeNdFeB (1,1).yml", 1),
            write_spectrum(dir.path(), "2711_LaCeNdFeB (1,2).yml", 2),
            write_spectrum(dir.path(), "2711_LaCeNdFeB_overview.yml", 3),
        ],
    );

    let (tx, rx) = mpsc::channel::<CompileStatus>();
    let reports = compile(&config, &tx).unwrap();
    drop(tx);
    let statuses: Vec<CompileStatus> = rx.iter().collect();
    assert_eq!(statuses.first().map(|s| &s.stage), Some(&Stage::Opening));
    assert_eq!(statuses.last().map(|s| &s.stage), Some(&Stage::Finished));

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.instrument, "edx");
    assert_eq!(report.written(), 2);
    assert!(matches!(
        report.entries[2].outcome,
        Outcome::Failed {
            kind: FailureKind::UnrecognizedFilenameFormat,
            ..
        }
    ));
    let report_path = config.get_report_path(&Instrument::Edx);
    assert_eq!(report_path, dir.path().join("S_edx_report.yml"));
    let report_text = std::fs::read_to_string(report_path).unwrap();
    assert!(report_text.contains("UnrecognizedFilenameFormat"));

    let container = Container::open(&container_path).unwrap();
    assert_eq!(container.sample_metadata().unwrap(), config.sample);
    let first = resolve_path("edx", &PositionKey::Grid { x: 1, y: 1 }).unwrap();
    let second = resolve_path("edx", &PositionKey::Grid { x: 1, y: 2 }).unwrap();
    assert_eq!(
        container.wafer_position(&first).unwrap(),
        Some((-40.0, -40.0))
    );
    assert_eq!(
        container.wafer_position(&second).unwrap(),
        Some((-40.0, -35.0))
    );
    container.close().unwrap();

    // Second run opens the existing container and skips everything it already holds
    let (tx, _rx) = mpsc::channel::<CompileStatus>();
    let reports = compile(&config, &tx).unwrap();
    assert_eq!(reports[0].written(), 0);
    assert_eq!(reports[0].skipped(), 2);
    assert_eq!(reports[0].failed(), 1);
}
