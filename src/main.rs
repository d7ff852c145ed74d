//! idscan - command line front end
//!
//! Runs the extraction pipeline against image files with a local Tesseract
//! install (or any program speaking the JSON reply format).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use idscan::capture::{CapturedFrame, ScreenLayout, ScreenRect, StillImageCamera};
use idscan::config::{self, AppConfig};
use idscan::shared::SessionEventKind;
use idscan::vision::{CommandRecognizer, FrameAnalyzer, TesseractRecognizer, TextRecognizer};
use idscan::{CaptureSession, DispatchPolicy, ScanProgress, Scanner};

/// Identity document scanner
#[derive(Parser, Debug)]
#[command(name = "idscan")]
#[command(about = "Extract birth date and document number from ID document photos")]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan an image file and print the extraction result as JSON
    Scan {
        file: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
        /// Print progress tokens to stderr
        #[arg(long)]
        progress: bool,
    },
    /// Drive the live capture path with an image file standing in for the camera
    Live {
        frame: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
        /// Guide rectangle in frame pixels as x,y,width,height (defaults to the whole frame)
        #[arg(long, value_parser = parse_rect)]
        guide: Option<ScreenRect>,
    },
    /// Run the frame quality analyzer on one frame and print the verdict as JSON
    Analyze {
        frame: PathBuf,
        /// Guide rectangle in frame pixels as x,y,width,height (defaults to the whole frame)
        #[arg(long, value_parser = parse_rect)]
        guide: Option<ScreenRect>,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Recognition backend
    #[arg(long, value_enum, default_value_t = Engine::Tesseract)]
    engine: Engine,
    /// Program to run for the `command` engine; the image path is appended
    #[arg(long)]
    program: Option<PathBuf>,
    /// Stop at the first variant that yields a plausible date
    #[arg(long)]
    first_success: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Engine {
    Tesseract,
    Command,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let mut config = config::load_or_default(args.config.as_deref());

    match args.command {
        Command::Scan {
            file,
            engine,
            progress,
        } => {
            let scanner = build_scanner(&mut config, &engine)?;
            let result = if progress {
                let (tx, printer) = spawn_progress_printer(std::io::stderr());
                let result = scanner.with_progress(tx).scan_from_path(&file);
                let _ = printer.join();
                result
            } else {
                scanner.scan_from_path(&file)
            };
            let result = result.with_context(|| format!("Failed to scan {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Live { frame, engine, guide } => {
            let frame = load_frame(&frame)?;
            let layout = layout_for(&frame, guide);
            let session = CaptureSession::open(Box::new(StillImageCamera::new(frame)), layout, &config)?;

            let events = session.events();
            std::thread::spawn(move || {
                for event in events.iter() {
                    match event.kind {
                        SessionEventKind::Guidance(verdict) => {
                            eprintln!("[{}] {}", event.session_id, verdict.state.guidance_key)
                        }
                        other => eprintln!("[{}] {:?}", event.session_id, other),
                    }
                }
            });

            let scanner = build_scanner(&mut config, &engine)?;
            let result = scanner.scan_from_live_capture(session)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Analyze { frame, guide } => {
            let frame = load_frame(&frame)?;
            let layout = layout_for(&frame, guide);
            let verdict = FrameAnalyzer::new(config.analyzer.clone()).analyze(Some(&frame), &layout);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::InitConfig { force } => {
            let path = match args.config {
                Some(path) => path,
                None => config::get_config_dir()?.join("config.toml"),
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::save_config(&AppConfig::default(), &path)?;
            info!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// Write one progress token per line until every sender is dropped
fn spawn_progress_printer<W>(mut out: W) -> (crossbeam_channel::Sender<ScanProgress>, JoinHandle<W>)
where
    W: Write + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded::<ScanProgress>();
    let printer = std::thread::spawn(move || {
        for event in rx.iter() {
            let _ = writeln!(out, "{}", event.token());
        }
        out
    });
    (tx, printer)
}

fn build_scanner(config: &mut AppConfig, engine: &EngineArgs) -> Result<Scanner> {
    if engine.first_success {
        config.recognition.dispatch = DispatchPolicy::FirstSuccess;
    }

    let recognizer: Arc<dyn TextRecognizer> = match engine.engine {
        Engine::Tesseract => Arc::new(TesseractRecognizer::from_settings(&config.recognition)),
        Engine::Command => {
            let program = engine
                .program
                .clone()
                .context("--program is required with --engine command")?;
            Arc::new(CommandRecognizer::new(
                program,
                Vec::new(),
                config.recognition.timeout(),
            ))
        }
    };
    info!(
        "Using {} recognizer, {:?} dispatch",
        recognizer.name(),
        config.recognition.dispatch
    );
    Ok(Scanner::new(config.clone(), recognizer))
}

fn load_frame(path: &Path) -> Result<CapturedFrame> {
    let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(CapturedFrame::from_image(image.to_rgba8()))
}

fn layout_for(frame: &CapturedFrame, guide: Option<ScreenRect>) -> ScreenLayout {
    let guide = guide.unwrap_or_else(|| ScreenRect::new(0.0, 0.0, frame.width as f32, frame.height as f32));
    ScreenLayout::identity(frame.width, frame.height, guide)
}

fn parse_rect(value: &str) -> Result<ScreenRect, String> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in {:?}: {}", value, e))?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0.0 && *h > 0.0 => Ok(ScreenRect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,width,height, got {:?}", value)),
    }
}
