use gatewarden::{
    camera::{CameraSession, FrameSource},
    common::{Config, PanelError, Result},
    core::{DetectionLogger, FaceEncodingProvider, KnownFaceRegistry, OnnxEncodingProvider},
    link::{LineLink, SerialLink},
    panel::{
        gate::{AuthenticationGate, GateOutcome, TerminalPrompt},
        status::{StateBits, StatusSnapshot},
        Panel, PanelEvent, TerminalRenderer,
    },
    protocol::{wire, CameraRecognitionService, Dispatcher},
};

use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, unbounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gatewarden")]
#[command(about = "Access-control panel with camera-based face authorisation")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate the operator and run the dispatch loop
    Run,
    /// Capture one frame and save it to disk
    TestCamera,
    /// Load the authorised-faces directory and list the registry
    CheckRegistry,
    /// Decode a state-feedback word and print the result
    DecodeState { bits: String },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&config_path)?;

    match cli.command {
        Commands::Run => run_panel(config),
        Commands::TestCamera => test_camera(&config),
        Commands::CheckRegistry => check_registry(&config),
        Commands::DecodeState { bits } => decode_state(&bits),
    }
}

fn run_panel(config: Config) -> Result<()> {
    let provider: Arc<dyn FaceEncodingProvider + Send + Sync> =
        Arc::new(OnnxEncodingProvider::new(&config.models)?);
    let registry = Arc::new(KnownFaceRegistry::load_dir(
        provider.as_ref(),
        &config.registry.authorised_dir,
    )?);
    tracing::info!("Registry loaded with {} authorised face(s)", registry.len());

    let log = DetectionLogger::open(
        &config.detection_log.path,
        Duration::from_secs(config.detection_log.debounce_secs),
    )?;

    // The gate runs before the serial write path opens
    let gate = AuthenticationGate::from_config(&config.gate);
    if gate.challenge(&mut TerminalPrompt)? == GateOutcome::Denied {
        return Err(PanelError::AuthenticationDenied);
    }

    let mut link = LineLink::open(&config.link.device)?;
    link.write_line(wire::SYSTEM_START)?;

    let (event_tx, event_rx) = unbounded();
    let (frame_tx, frame_rx) = unbounded();
    let (quit_tx, quit_rx) = bounded(1);

    {
        let quit_tx = quit_tx.clone();
        let event_tx = event_tx.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Interrupt received, shutting down");
            let _ = quit_tx.send(());
            let _ = event_tx.send(PanelEvent::Shutdown);
        })
        .map_err(|e| PanelError::Other(anyhow::anyhow!("Failed to set signal handler: {}", e)))?;
    }

    let recognition = CameraRecognitionService::new(
        config.camera.clone(),
        config.matcher.clone(),
        provider,
        registry,
        log,
        frame_tx,
        quit_rx,
    );

    let mut dispatcher = Dispatcher::new(link, recognition, event_tx.clone());
    std::thread::spawn(move || {
        if let Err(e) = dispatcher.run() {
            tracing::error!("Dispatch loop failed: {}", e);
        }
    });

    // Annotated frames join the panel event stream on the foreground side
    {
        let event_tx = event_tx;
        std::thread::spawn(move || {
            for frame in frame_rx.iter() {
                if event_tx.send(PanelEvent::Frame(frame)).is_err() {
                    break;
                }
            }
        });
    }

    Panel::new(event_rx, TerminalRenderer).run();
    Ok(())
}

fn test_camera(config: &Config) -> Result<()> {
    let mut session = CameraSession::open(&config.camera)?;
    let frame = session.read_frame()?;
    session.release();

    let path = PathBuf::from("test_capture.jpg");
    frame.save(&path)?;
    println!("Saved test image to {:?}", path);
    Ok(())
}

fn check_registry(config: &Config) -> Result<()> {
    let provider = OnnxEncodingProvider::new(&config.models)?;
    let registry = KnownFaceRegistry::load_dir(&provider, &config.registry.authorised_dir)?;

    println!("Registry: {} authorised face(s)", registry.len());
    for name in registry.names() {
        println!("  - {}", name);
    }
    Ok(())
}

fn decode_state(bits: &str) -> Result<()> {
    let bits = StateBits::parse(bits).ok_or_else(|| {
        PanelError::Configuration("State word must be exactly 10 characters of 0/1".into())
    })?;
    let snapshot = StatusSnapshot::decode(bits);
    print!("{}", TerminalRenderer::format_status(&snapshot));
    Ok(())
}

fn setup_logging(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
