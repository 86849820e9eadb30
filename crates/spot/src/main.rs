use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use spotcore::raster::geotiff::GeoTiffEngine;
use spotcore::{
    ExportSink, FailurePolicy, FileKind, ManifestSink, Orchestrator, RasterEngine, RecordingSink,
    RunReport, SpotConfig,
};

/// Raster library used to open inputs and build mosaics.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    /// Pure-Rust GeoTIFF reader with VRT mosaics.
    Geotiff,
    /// System GDAL (needs a build with the `gdal` feature).
    Gdal,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Engine::Geotiff => "geotiff",
            Engine::Gdal => "gdal",
        };

        f.write_str(s)
    }
}

/// `spot` - ingest a folder of survey rasters and meshes.
///
/// Classifies every top-level file as a DEM, an RGB orthomosaic or a 3D mesh,
/// derives its registry and map ids, measures its area and runs the enabled
/// export pipelines. Sub-folders are first stitched into VRT mosaics.
#[derive(Parser, Debug)]
#[command(name = "spot", version, about, long_about = None)]
struct Args {
    /// JSON configuration file. Built-in defaults apply when omitted.
    #[arg(long, env = "SPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Input folder (overrides `paths.input`).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output folder (overrides `paths.output`).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Stop at the first failing file instead of isolating failures.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    /// Process files on all cores.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    #[arg(long, value_enum, default_value_t = Engine::Geotiff)]
    engine: Engine,

    /// Classify, name and measure, but only log the exports that would run.
    /// Nothing is cleaned, created or written.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Debug logging (RUST_LOG still wins when set).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<SpotConfig> {
    let mut config = match &args.config {
        Some(path) => SpotConfig::from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SpotConfig::default(),
    };

    if let Some(input) = &args.input {
        config.paths.input = input.clone();
    }
    if let Some(output) = &args.output {
        config.paths.output = output.clone();
    }
    if args.fail_fast {
        config.run.failure_policy = FailurePolicy::FailFast;
    }
    if args.parallel {
        config.run.parallel = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn make_engine(engine: Engine) -> Result<Arc<dyn RasterEngine>> {
    match engine {
        Engine::Geotiff => Ok(Arc::new(GeoTiffEngine::new())),
        #[cfg(feature = "gdal")]
        Engine::Gdal => {
            let gdal = spotcore::raster::gdal::GdalEngine::new().context("initializing GDAL")?;
            Ok(Arc::new(gdal))
        }
        #[cfg(not(feature = "gdal"))]
        Engine::Gdal => anyhow::bail!("this build has no GDAL support; rebuild with `--features gdal`"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn summarize(report: &RunReport, elapsed: Duration) {
    for failure in &report.failures {
        error!("FAILED {}: {}", failure.path.display(), failure.error);
    }

    info!(
        "{} processed ({} DEM, {} RGB, {} 3D), {} skipped, {} failed, {} mosaics in {:.1}s{}",
        report.records.len(),
        report.count(FileKind::Dem),
        report.count(FileKind::Rgb),
        report.count(FileKind::Mesh3D),
        report.skipped.len(),
        report.failures.len(),
        report.mosaics.len(),
        elapsed.as_secs_f64(),
        if report.cancelled {
            " (cancelled)"
        } else if report.aborted {
            " (aborted)"
        } else {
            ""
        }
    );
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- 1. Logging and configuration ---
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    info!("spot {} ({} engine)", env!("CARGO_PKG_VERSION"), args.engine);

    let config = load_config(&args)?;
    let engine = make_engine(args.engine)?;

    let recorder = args.dry_run.then(|| Arc::new(RecordingSink::new()));
    let sink: Arc<dyn ExportSink> = match &recorder {
        Some(recorder) => recorder.clone(),
        None => Arc::new(ManifestSink::new(&config)),
    };

    info!(
        "input {} -> output {}",
        config.paths.input.display(),
        config.paths.output.display()
    );

    // --- 2. Run on a blocking thread, Ctrl-C cancels between files ---
    let orchestrator = Orchestrator::new(config, engine, sink).with_dry_run(args.dry_run);
    let cancel = orchestrator.cancel_token();
    let started = Instant::now();

    let mut run = tokio::task::spawn_blocking(move || -> spotcore::Result<RunReport> {
        orchestrator.prepare_output()?;
        let report = orchestrator.run();
        if let Err(e) = orchestrator.finish() {
            warn!("unable to remove scratch folder: {e}");
        }
        report
    });

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = shutdown_signal() => {
            warn!("interrupt received, stopping after the current file");
            cancel.cancel();
            run.await
        }
    };

    let report = joined.context("run task panicked")?.context("run failed")?;

    // --- 3. Report ---
    if let Some(recorder) = recorder {
        for call in recorder.calls() {
            info!(
                "dry run: {} -> {} as {}",
                call.path.display(),
                call.step.name(),
                call.output_filename
            );
        }
    }

    summarize(&report, started.elapsed());
    Ok(ExitCode::from(report.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let args = Args::parse_from([
            "spot",
            "--input",
            "/data/in",
            "--fail-fast",
            "--parallel",
            "--engine",
            "geotiff",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.paths.input, PathBuf::from("/data/in"));
        assert_eq!(config.paths.output, PathBuf::from("output"));
        assert_eq!(config.run.failure_policy, FailurePolicy::FailFast);
        assert!(config.run.parallel);
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spot.json");
        std::fs::write(&path, r#"{ "naming": { "prefix_marker": "_MAP_" } }"#).unwrap();

        let args = Args::parse_from(["spot", "--config", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.naming.prefix_marker, "_MAP_");
    }

    #[test]
    fn missing_config_names_the_file() {
        let args = Args::parse_from(["spot", "--config", "/nonexistent/spot.json"]);
        let err = load_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/spot.json"));
    }

    #[cfg(not(feature = "gdal"))]
    #[test]
    fn gdal_engine_needs_the_feature() {
        assert!(make_engine(Engine::Gdal).is_err());
    }
}
