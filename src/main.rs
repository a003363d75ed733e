use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use display_info::DisplayInfo;
use sysinfo::System;

use spellcast::config::AppConfig;
use spellcast::hotkeys::{start_hotkey_listener, HotkeyMatcher};
use spellcast::input::{KeySimulator, RdevSimulator, RecordingSimulator};
use spellcast::{
    Command, ConfigSource, DetectionCore, DetectionLoop, Event, EventBus, InputDispatcher,
    Matcher, ScreenCapture, TemplateStore,
};

const LOG_TARGET_STARTUP: &str = "spellcast::startup";

/// Key events kept by the dry-run recorder
const DRY_RUN_HISTORY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "spellcast")]
#[command(about = "Presses the bound key when a spell icon appears in a screen region")]
#[command(version)]
struct Cli {
    /// Config file (default: config/config.json next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture and match this many frames, print a latency report and exit
    #[arg(long, value_name = "FRAMES")]
    bench: Option<usize>,

    /// Arm casting right away instead of waiting for the toggle hotkey
    #[arg(long)]
    start: bool,

    /// Record key presses instead of sending them
    #[arg(long)]
    dry_run: bool,
}

/// Initialize tracing with file rotation
///
/// Logs are written to:
/// - macOS: ~/Library/Application Support/SpellCast/logs/
/// - Windows: %APPDATA%/SpellCast/logs/
/// - Linux: ~/.config/SpellCast/logs/
///
/// Daily rotation, files named spellcast.YYYY-MM-DD.log. Debug builds also log
/// to the console.
fn initialize_tracing() {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = dirs::config_dir()
        .map(|dir| dir.join("SpellCast").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let file_appender = rolling::daily(&log_dir, "spellcast.log");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!("Log directory: {}", log_dir.display());
}

fn log_runtime_environment() {
    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());
    let architecture = std::env::consts::ARCH;

    tracing::info!(target: LOG_TARGET_STARTUP, "Starting SpellCast v{} on ({})", version, architecture);
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);

    match DisplayInfo::all() {
        Ok(displays) => {
            tracing::info!(target: LOG_TARGET_STARTUP, "Displays: {} detected", displays.len());
            for (index, disp) in displays.iter().enumerate() {
                tracing::info!(
                    target: LOG_TARGET_STARTUP,
                    "  Display {}: {}x{} at ({}, {}) scale {}{}",
                    index,
                    disp.width,
                    disp.height,
                    disp.x,
                    disp.y,
                    disp.scale_factor,
                    if disp.is_primary { " (primary)" } else { "" }
                );
            }
        }
        Err(e) => tracing::warn!(target: LOG_TARGET_STARTUP, "Could not list displays: {}", e),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing();
    log_runtime_environment();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let app_config = AppConfig::load(&config_path)?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let templates = app_config.load_templates(base_dir)?;
    let settings = app_config.detection_settings()?;
    println!("✓ Configuration loaded from {}", config_path.display());
    println!("  Capture region: {}", settings.region);
    println!("  Templates: {}", templates.len());
    println!("  Keybinds: {}", settings.keybinds.len());
    println!(
        "  Frequency: {} Hz, cooldown {}ms, {:?} matching\n",
        settings.tuning.frequency_hz, settings.tuning.cooldown_ms, settings.tuning.match_method
    );

    let store = Arc::new(TemplateStore::with_templates(templates));
    let tuning = settings.tuning.clone();
    let source = ConfigSource::new(store, settings);

    let capture = ScreenCapture::with_target_window(tuning.target_window.clone());
    let simulator: Box<dyn KeySimulator> = if cli.dry_run {
        println!("Dry run: key presses are recorded, not sent\n");
        Box::new(RecordingSimulator::bounded(DRY_RUN_HISTORY))
    } else {
        Box::new(RdevSimulator)
    };
    let dispatcher = InputDispatcher::new(
        simulator,
        Duration::from_millis(tuning.min_press_interval_ms),
    );

    let bus = EventBus::new();
    let mut core = DetectionCore::new(
        source,
        Box::new(capture),
        Matcher::from_method(tuning.match_method),
        dispatcher,
        bus.clone(),
    );

    if let Some(frames) = cli.bench {
        println!("Running benchmark: {} frames", frames);
        let stats = core.bench(frames).context("Cannot benchmark with this configuration")?;
        stats.print_report(tuning.interval() / 2);
        return Ok(());
    }

    let (events, _subscription) = bus.subscribe();
    let handle = DetectionLoop::spawn(core)?;

    let hotkeys = HotkeyMatcher::from_settings(&app_config.hotkeys).context("Invalid hotkey in config")?;
    start_hotkey_listener(hotkeys, handle.commands(), bus.clone())?;

    let shutdown = handle.commands();
    ctrlc::set_handler(move || {
        println!("\n\nShutting down...");
        let _ = shutdown.send(Command::Shutdown);
    })
    .context("Error setting Ctrl-C handler")?;

    println!("===========================================");
    println!("  Press {} to START/STOP casting", app_config.hotkeys.toggle.to_uppercase());
    println!("  Press Ctrl+C to quit");
    println!("===========================================\n");

    if cli.start {
        handle.start().context("Failed to start casting")?;
    }

    for event in events.iter() {
        match &event {
            Event::StateChanged { to, .. } if !to.is_cooling() => {
                println!("Status: {}", to.description().to_uppercase());
            }
            Event::Actuated { .. } => println!("  {}", event.description()),
            Event::ActuationFailed { .. }
            | Event::Halted { .. }
            | Event::ConfigurationRejected { .. } => eprintln!("✗ {}", event.description()),
            Event::Shutdown => break,
            _ => {}
        }
    }

    let snapshot = handle.telemetry().snapshot();
    handle.shutdown();

    println!("\n===========================================");
    println!("  Detection stopped");
    println!("  Ticks: {} ({} skipped)", snapshot.ticks, snapshot.ticks_skipped);
    println!("  Casts: {}", snapshot.actuations_total);
    println!("===========================================");
    Ok(())
}
