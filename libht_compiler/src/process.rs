use std::sync::mpsc::Sender;

use super::compile_status::{CompileStatus, Stage};
use super::config::Config;
use super::container::Container;
use super::decoder::YamlRecordDecoder;
use super::error::{ContainerError, ProcessorError};
use super::merger::Merger;
use super::report::{FileOutcome, RunReport};

/// Open the configured container, or create it with the configured sample metadata
pub fn open_or_create(config: &Config) -> Result<Container, ContainerError> {
    if config.container_exists() {
        Container::open(&config.container_path)
    } else {
        log::info!(
            "No container at {}, creating one for this sample",
            config.container_path.display()
        );
        Container::create(&config.container_path, &config.sample)
    }
}

/// The main loop of ht_compiler.
///
/// Compiles every instrument of the config into its container, one batch per
/// instrument, and reports progress through tx. The container is closed whichever way
/// this returns.
pub fn compile(
    config: &Config,
    tx: &Sender<CompileStatus>,
) -> Result<Vec<RunReport>, ProcessorError> {
    config.validate()?;
    tx.send(CompileStatus::new("", 0, config.total_files(), Stage::Opening))?;

    let mut container = open_or_create(config)?;
    let decoder = YamlRecordDecoder;
    let mut reports = Vec::new();

    {
        let mut merger = Merger::new(&mut container, config.policy).with_grid(config.grid);
        for (instrument, files) in config.instruments.iter() {
            if files.is_empty() {
                log::info!("No {instrument} files given, skipping...");
                continue;
            }
            log::info!("Processing {instrument} data...");
            let total = files.len();
            tx.send(CompileStatus::new(
                instrument.name(),
                0,
                total,
                Stage::Ingesting,
            ))?;
            let on_file = |done: usize, _: &FileOutcome| {
                let status = CompileStatus::new(instrument.name(), done, total, Stage::Ingesting);
                if let Err(e) = tx.send(status) {
                    log::warn!("Progress receiver is gone: {e}");
                }
            };
            let report =
                merger.ingest_batch_with(instrument, &decoder, files.as_slice(), on_file)?;

            if config.write_reports {
                let report_path = config.get_report_path(instrument);
                report.write_yaml(&report_path)?;
                log::info!("Wrote {instrument} report to {}", report_path.display());
            }
            log::info!("Done with {instrument} data.");
            reports.push(report);
        }
    }

    container.close()?;
    tx.send(CompileStatus::new(
        "",
        config.total_files(),
        config.total_files(),
        Stage::Finished,
    ))?;
    Ok(reports)
}
