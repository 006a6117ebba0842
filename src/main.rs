use std::process::ExitCode;

use archiso_zfs::config::load_build_configuration;
use archiso_zfs::log_collector::logs_dir;
use archiso_zfs::{LogCollector, Pipeline, SystemImpl};
use owo_colors::OwoColorize;

/// Print a failure the same way whether it came from a stage or a panic.
fn report_failure(stage: &str, error: &dyn std::fmt::Display) {
    log::error!("[Main] [FAILED] stage '{}': {}", stage, error);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let work_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{} cannot determine working directory: {}", "ERROR:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // =========================================================================
    // LOGGING INITIALIZATION - MUST BE FIRST
    // =========================================================================
    let collector = match LogCollector::new(&logs_dir(&work_root)) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = collector.install() {
        eprintln!("[Main] WARNING: {}", e);
    }
    log::info!("[Main] archiso-zfs {} in {}", archiso_zfs::VERSION, work_root.display());
    log::debug!("[Main] Run log: {}", collector.log_path().display());

    // Boundary handler for anything that escapes as a panic
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        report_failure("unexpected", info);
        log::logger().flush();
        default_hook(info);
    }));

    // =========================================================================
    // CONFIGURATION
    // =========================================================================
    let config = match load_build_configuration(&work_root) {
        Ok(config) => config,
        Err(e) => {
            report_failure("configuration", &e);
            let _ = collector.wait_for_empty().await;
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "[Main] Building {} with kernel {} (replacing {})",
        config.iso_name(),
        config.kernel,
        config.default_kernel
    );

    // =========================================================================
    // PIPELINE
    // =========================================================================
    let system = SystemImpl::new();
    let mut pipeline = Pipeline::new(&system, &config);
    let code = match pipeline.run().await {
        Ok(outcome) => {
            if outcome.repository_reused {
                log::info!(
                    "[Main] Reused repository {}",
                    outcome.repository.dir.display()
                );
            }
            log::info!(
                "[Main] [DONE] {} ({}m {}s)",
                outcome.iso.display(),
                outcome.elapsed.as_secs() / 60,
                outcome.elapsed.as_secs() % 60
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_failure(e.stage.stage_name(), &e.source);
            log::info!("[Main] Full log: {}", collector.log_path().display());
            ExitCode::FAILURE
        }
    };

    if let Err(e) = collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: {}", e);
    }
    code
}
