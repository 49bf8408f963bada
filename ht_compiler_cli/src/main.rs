//! # ht_compiler_cli
//!
//! Part of the ht_compiler crate family.
//!
//! Compile the measurements of one sample into its HDF5 container from the command line.
//!
//! ```bash
//! ht_compiler_cli -p job.yml new   # write a template job description
//! ht_compiler_cli -p job.yml       # compile
//! ht_compiler_cli -p job.yml --policy force
//! ```
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use libht_compiler::compile_status::{CompileStatus, Stage};
use libht_compiler::config::Config;
use libht_compiler::merger::ConflictPolicy;
use libht_compiler::process::compile;
use libht_compiler::report::RunStatus;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could not create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("ht_compiler_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_parser(["skip", "force", "strict"])
                .help("Override the conflict policy of the config"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let mut config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(policy) = matches.get_one::<String>("policy") {
        match serde_yaml::from_str::<ConflictPolicy>(policy) {
            Ok(p) => config.policy = p,
            Err(e) => {
                log::error!("Bad conflict policy {policy}: {e}");
                std::process::exit(1);
            }
        }
    }
    log::info!("Config successfully loaded.");
    log::info!("Container Path: {}", config.container_path.to_string_lossy());
    log::info!("Conflict Policy: {:?}", config.policy);
    for (instrument, files) in config.instruments.iter() {
        log::info!("{instrument} files: {}", files.len());
    }

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let (tx, rx) = mpsc::channel::<CompileStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || compile(&config, &tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => {
                if status.stage == Stage::Ingesting {
                    pb.set_message(status.instrument.clone());
                }
                pb.set_position((status.progress * 100.0) as u64);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if handle.is_finished() {
            break;
        }
    }
    pb.finish();

    let mut failed = false;
    match handle.join() {
        Ok(Ok(reports)) => {
            for report in reports.iter() {
                match report.status() {
                    RunStatus::Success => log::info!("{}: success", report.instrument),
                    status => {
                        failed = true;
                        log::warn!(
                            "{}: {:?}, {} of {} file(s) failed",
                            report.instrument,
                            status,
                            report.failed(),
                            report.entries.len()
                        );
                    }
                }
            }
        }
        Ok(Err(e)) => {
            failed = true;
            log::error!("Compilation failed with error: {e}");
        }
        Err(_) => {
            failed = true;
            log::error!("Failed to join compilation task!");
        }
    }

    log::info!("Done.");
    if failed {
        std::process::exit(1);
    }
}
