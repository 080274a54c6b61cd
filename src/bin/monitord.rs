//! monitord - on-device monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by MONITOR_CONFIG, then MONITOR_* env)
//! 2. Pulls frames and audio spectra from a capture source
//! 3. Hands each tick to the monitor runner (busy ticks are skipped)
//! 4. Persists alerts and intrusion frames, pruning them by age

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use monitor_kernel::config::MonitordConfig;
use monitor_kernel::sound::{AudioSink, SoundPayload};
use monitor_kernel::{
    now_ms, BackendRegistry, CaptureSource, MonitorRunner, MonitorSession, MonitorStore,
    SecurityStateMachine, SoundId, SoundOrchestrator, SpeechSink, SqliteMonitorStore,
    StubBackend, SyntheticConfig, SyntheticSource, TickInput,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scenario override (pet, baby, elderly, security, general).
    #[arg(long)]
    scenario: Option<String>,
    /// Stop after this many seconds. Runs until Ctrl-C when omitted.
    #[arg(long)]
    seconds: Option<u64>,
    /// Tick interval override in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,
    /// Database path override.
    #[arg(long)]
    db_path: Option<String>,
    /// Arm the security state machine at startup.
    #[arg(long)]
    arm: bool,
    /// ONNX detector model (requires the backend-tract feature).
    #[arg(long, env = "MONITOR_MODEL")]
    model: Option<String>,
    /// Class labels for the model, one per line.
    #[arg(long, env = "MONITOR_MODEL_LABELS")]
    labels: Option<String>,
}

/// Stand-in speaker: playback is logged, not rendered.
struct LogSink;

impl AudioSink for LogSink {
    fn start(&mut self, id: SoundId, payload: SoundPayload<'_>, volume: f32, looping: bool) -> Result<()> {
        let label = match payload {
            SoundPayload::BuiltIn(kind) => kind.as_str().to_string(),
            SoundPayload::Custom { sound_id, bytes } => {
                format!("custom {} ({} bytes)", sound_id, bytes.len())
            }
        };
        log::info!("sound {} start: {} volume={:.2} loop={}", id, label, volume, looping);
        Ok(())
    }

    fn set_volume(&mut self, id: SoundId, volume: f32) -> Result<()> {
        log::debug!("sound {} volume={:.2}", id, volume);
        Ok(())
    }

    fn stop(&mut self, id: SoundId) -> Result<()> {
        log::info!("sound {} stop", id);
        Ok(())
    }
}

struct LogSpeech;

impl SpeechSink for LogSpeech {
    fn speak(&mut self, text: &str) -> Result<()> {
        log::warn!("speaking: {}", text);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitordConfig::load()?;
    if let Some(scenario) = args.scenario.as_deref() {
        cfg = cfg.with_scenario(scenario.parse()?)?;
    }
    if let Some(tick_ms) = args.tick_ms {
        if tick_ms == 0 {
            return Err(anyhow!("--tick-ms must be greater than zero"));
        }
        cfg.tick = Duration::from_millis(tick_ms);
    }
    if let Some(db_path) = args.db_path.clone() {
        cfg.db_path = db_path;
    }

    let store = SqliteMonitorStore::open(&cfg.db_path)?.shared();
    let mut policy = cfg.policy.clone();
    {
        let mut guard = store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        match guard.load_policy_settings(&cfg.stream_id) {
            Ok(Some(saved)) if saved.scenario == cfg.scenario => {
                log::info!("using saved policy settings for {}", cfg.stream_id);
                policy = saved;
            }
            Ok(_) => {}
            Err(err) => log::warn!("saved policy settings unreadable: {}", err),
        }
        if let Some(security) = cfg.security.as_mut() {
            match guard.load_security_settings() {
                Ok(Some(saved)) => *security = saved,
                Ok(None) => {}
                Err(err) => log::warn!("saved security settings unreadable: {}", err),
            }
        }
    }

    let mut orchestrator =
        SoundOrchestrator::new(Box::new(LogSink), cfg.sound.clone()).with_store(store.clone());
    orchestrator.initialize()?;
    let orchestrator = orchestrator.shared();

    let start_ms = now_ms();
    let mut session = MonitorSession::new(&cfg.stream_id, policy, orchestrator.clone(), start_ms)?
        .with_detectors(build_detectors(&args, &cfg)?)
        .with_store(store.clone());
    if let Some(settings) = cfg.security.clone() {
        let mut machine = SecurityStateMachine::new(settings)
            .with_orchestrator(orchestrator.clone())
            .with_speech(Box::new(LogSpeech))
            .with_store(store.clone());
        if args.arm {
            machine.arm(start_ms)?;
        }
        session = session.with_security(machine);
    } else if args.arm {
        log::warn!("--arm ignored: no security settings configured");
    }
    let runner = MonitorRunner::spawn(session)?;

    let mut source = SyntheticSource::new(SyntheticConfig {
        name: format!("synthetic://{}", cfg.stream_id),
        width: cfg.capture.width,
        height: cfg.capture.height,
        sample_rate: cfg.capture.sample_rate,
        fft_size: cfg.capture.fft_size,
        ..SyntheticConfig::default()
    });

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "monitord running: stream={} scenario={} tick={}ms db={}",
        cfg.stream_id,
        cfg.scenario.as_str(),
        cfg.tick.as_millis(),
        cfg.db_path
    );

    let started = Instant::now();
    let mut last_prune = Instant::now();
    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        if args
            .seconds
            .is_some_and(|limit| started.elapsed() >= Duration::from_secs(limit))
        {
            break;
        }
        let now = now_ms();
        let frame = match source.next_frame(now) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame capture failed: {}", err);
                None
            }
        };
        let audio = match source.next_audio(now) {
            Ok(audio) => audio,
            Err(err) => {
                log::warn!("audio capture failed: {}", err);
                None
            }
        };
        runner.submit(TickInput {
            frame,
            audio,
            now_ms: now,
        });

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = source.stats();
            log::info!(
                "capture health={} frames={} audio_windows={} source={} ticks processed={} skipped={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.audio_windows,
                stats.source,
                runner.processed(),
                runner.skipped()
            );
            if let Ok(session) = runner.session().try_lock() {
                for backend in session.detector_health() {
                    log::info!(
                        "detector {} ready={} calls={} failures={} last_error={:?}",
                        backend.name,
                        backend.ready,
                        backend.calls,
                        backend.failures,
                        backend.last_error
                    );
                }
            }
            last_health_log = Instant::now();
        }

        if last_prune.elapsed() > Duration::from_secs(60) {
            let pruned = match store.lock() {
                Ok(mut guard) => guard.enforce_retention(cfg.retention, now),
                Err(_) => Err(anyhow!("store lock poisoned")),
            };
            match pruned {
                Ok(0) => {}
                Ok(count) => log::info!("retention pruned {} records", count),
                Err(err) => log::warn!("retention pruning failed: {}", err),
            }
            last_prune = Instant::now();
        }

        std::thread::sleep(cfg.tick);
    }

    log::info!("shutting down monitord...");
    runner.stop(now_ms())?;
    orchestrator
        .lock()
        .map_err(|_| anyhow!("orchestrator lock poisoned"))?
        .dispose();
    Ok(())
}

#[cfg_attr(not(feature = "backend-tract"), allow(unused_variables))]
fn build_detectors(args: &Args, cfg: &MonitordConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match args.model.as_deref() {
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            let labels_path = args
                .labels
                .as_deref()
                .ok_or_else(|| anyhow!("--labels is required with --model"))?;
            let labels = std::fs::read_to_string(labels_path)
                .map_err(|e| anyhow!("failed to read labels {}: {}", labels_path, e))?
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            registry.register(monitor_kernel::detect::TractBackend::new(
                path,
                labels,
                cfg.capture.width,
                cfg.capture.height,
            )?);
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => {
            log::warn!(
                "model {} ignored: built without the backend-tract feature",
                path
            );
            registry.register(StubBackend::new());
        }
        None => registry.register(StubBackend::new()),
    }
    let ready = registry.warm_up();
    log::info!("{} of {:?} detector backends ready", ready, registry.names());
    Ok(registry)
}
