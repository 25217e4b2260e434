//! touchwatchd - camera phone-touch alert daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, command line)
//! 2. Checks startup preconditions: the alert cue is readable, the camera opens
//! 3. Loads and warms up the detector
//! 4. Serves the annotated camera feed as MJPEG on `GET /`
//! 5. Plays the alert cue (at most once per cooldown) when a person touches a phone

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use touchwatch::config::TouchwatchdConfig;
use touchwatch::ingest::connect_source;
use touchwatch::{
    AlertCue, AlertSink, BackendRegistry, CommandSink, ScriptedBackend, SessionFactory,
    SourcePool, StreamServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML when the extension is .toml, JSON otherwise).
    #[arg(long, env = "TOUCHWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5000.
    #[arg(long)]
    addr: Option<String>,

    /// Source URI: stub://name, http(s)://camera/stream or a V4L2 device path.
    #[arg(long, conflicts_with = "camera")]
    source: Option<String>,

    /// Numbered local camera (/dev/videoN).
    #[arg(long)]
    camera: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = TouchwatchdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.stream.addr = addr;
    }
    if let Some(index) = args.camera {
        cfg.source.camera_index = index;
        cfg.source.uri = None;
    }
    if let Some(source) = args.source {
        cfg.source.uri = Some(source);
    }
    cfg.validate()?;

    log::info!(
        "touchwatchd {} source={} detector={} proximity={} cooldown={:.1}s",
        env!("CARGO_PKG_VERSION"),
        cfg.source.resolved_uri(),
        cfg.detector.backend,
        cfg.alert.proximity,
        cfg.alert.cooldown.as_secs_f64()
    );

    // Startup preconditions: both fatal before any stream is served.
    let cue = AlertCue::load(&cfg.alert.cue_path)?;
    log::info!("alert cue {}", cue.path().display());
    let source = connect_source(&cfg.source_settings())?;

    let registry = build_registry(&cfg)?;
    registry.warm_up_all()?;
    let detector = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;

    let sink: Arc<dyn AlertSink> = Arc::new(CommandSink::new(&cfg.alert.player)?);
    log::info!("alert player {}", cfg.alert.player.join(" "));

    let pool = SourcePool::new();
    pool.park(source);
    let factory = SessionFactory::new(detector, sink, cue, cfg.session_settings(), pool);
    let handle = StreamServer::new(cfg.server_config(), factory).spawn()?;
    log::info!("serving MJPEG on http://{}/", handle.addr);

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("touchwatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutting down ({} active streams)", handle.active_streams());
    handle.stop()?;
    Ok(())
}

fn build_registry(cfg: &TouchwatchdConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match cfg.detector.backend.as_str() {
        "scripted" => {
            log::warn!("scripted detector configured; frames will never be flagged");
            registry.register(ScriptedBackend::default());
        }
        "tract" => register_tract(&mut registry, cfg)?,
        other => {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected 'tract' or 'scripted'",
                other
            ))
        }
    }
    Ok(registry)
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, cfg: &TouchwatchdConfig) -> Result<()> {
    use touchwatch::detect::{TractBackend, TractSettings};

    let settings = TractSettings {
        input_size: cfg.detector.input_size,
        confidence_threshold: cfg.detector.confidence_threshold,
        iou_threshold: cfg.detector.iou_threshold,
    };
    let backend = TractBackend::new(&cfg.detector.model_path, settings)?;
    log::info!("loaded model {}", cfg.detector.model_path.display());
    registry.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _cfg: &TouchwatchdConfig) -> Result<()> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}
