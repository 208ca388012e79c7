//! Replay recorded UI-tree snapshots through the overlay pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recording, translating with a JSON glossary
//! overlay-replay snapshots.jsonl --glossary glossary.json
//!
//! # Use a specific config file and a persistent dictionary
//! overlay-replay snapshots.jsonl --config overlay.toml --dictionary dict.db
//! ```
//!
//! Each input line is `{"timestamp_ms": <u64>, "root": <UiNode>}`. Snapshots
//! are replayed with their recorded spacing. Final status is printed as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use translation_overlay::{
    Config, FrameOutput, ManualClock, NodeError, OverlayPipeline, PassScheduler, PipelineStatus,
    SchedulerStats, SnapshotSource, Theme, TranslationBackend, TranslationError, UiNode,
};

#[derive(Debug, Clone, PartialEq)]
struct ReplayOptions {
    snapshots: PathBuf,
    glossary: Option<PathBuf>,
    config: Option<PathBuf>,
    dictionary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Replay(ReplayOptions),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut snapshots = None;
    let mut glossary = None;
    let mut config = None;
    let mut dictionary = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--glossary" | "-g" => {
                let path = iter.next().ok_or("--glossary requires a file argument")?;
                glossary = Some(PathBuf::from(path));
            }
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config requires a file argument")?;
                config = Some(PathBuf::from(path));
            }
            "--dictionary" | "-d" => {
                let path = iter.next().ok_or("--dictionary requires a file argument")?;
                dictionary = Some(path.clone());
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown argument: {}", flag)),
            path => {
                if snapshots.is_some() {
                    return Err(format!("Unexpected extra argument: {}", path));
                }
                snapshots = Some(PathBuf::from(path));
            }
        }
    }

    match snapshots {
        Some(snapshots) => Ok(Command::Replay(ReplayOptions {
            snapshots,
            glossary,
            config,
            dictionary,
        })),
        None => Ok(Command::Help),
    }
}

fn print_help() {
    println!("overlay-replay - Replay recorded UI snapshots through the translation overlay pipeline");
    println!();
    println!("USAGE:");
    println!("    overlay-replay <SNAPSHOTS.jsonl> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -g, --glossary <FILE>      JSON object mapping source text to translations");
    println!("    -c, --config <FILE>        Config file (default: platform config dir)");
    println!("    -d, --dictionary <FILE>    SQLite dictionary (overrides cache.dictionary_path)");
    println!("    -h, --help                 Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                   Log filter (default: general.log_level from config)");
}

/// Backend that looks translations up in a fixed map
struct GlossaryBackend {
    entries: HashMap<String, String>,
}

impl GlossaryBackend {
    fn load(path: Option<&PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let entries = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => HashMap::new(),
        };
        Ok(Self { entries })
    }
}

#[async_trait::async_trait]
impl TranslationBackend for GlossaryBackend {
    fn is_ready(&self) -> bool {
        !self.entries.is_empty()
    }

    async fn translate(&self, text: &str) -> Result<String, TranslationError> {
        self.entries
            .get(text)
            .cloned()
            .ok_or_else(|| TranslationError::Backend(format!("no glossary entry for {:?}", text)))
    }
}

/// Snapshot source holding the most recently replayed tree
#[derive(Default)]
struct ReplaySource {
    current: RwLock<UiNode>,
}

impl ReplaySource {
    fn set(&self, root: UiNode) {
        match self.current.write() {
            Ok(mut current) => *current = root,
            Err(_) => warn!("Snapshot lock poisoned, keeping previous snapshot"),
        }
    }
}

impl SnapshotSource for ReplaySource {
    type Node = UiNode;

    fn current_root(&self) -> Result<UiNode, NodeError> {
        self.current
            .read()
            .map(|root| root.clone())
            .map_err(|_| NodeError::Unavailable("snapshot lock poisoned".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RecordedSnapshot {
    timestamp_ms: u64,
    root: UiNode,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    snapshots: u64,
    frames: u64,
    scheduler: SchedulerStats,
    pipeline: PipelineStatus,
}

fn init_logging(config: &Config) {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(Command::Replay(options)) => options,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run 'overlay-replay --help' for usage");
            process::exit(1);
        }
    };

    let mut config = match &options.config {
        Some(path) => Config::load_from_path(path.clone()),
        None => Config::load(),
    };
    if options.dictionary.is_some() {
        config.cache.dictionary_path = options.dictionary.clone();
    }

    init_logging(&config);

    if !config.general.enabled {
        info!("Overlay is disabled in configuration, exiting");
        return Ok(());
    }

    let backend = Arc::new(GlossaryBackend::load(options.glossary.as_ref())?);
    info!("Loaded {} glossary entries", backend.entries.len());

    let pipeline = Arc::new(OverlayPipeline::from_config(&config, backend)?);
    let source = Arc::new(ReplaySource::default());
    let clock = Arc::new(ManualClock::new(0));
    let (_theme_tx, theme_rx) = watch::channel(Theme::from(&config.theme));
    let (frame_tx, mut frame_rx) = mpsc::channel::<FrameOutput>(config.output.frame_channel_capacity.max(1));

    let mut scheduler = PassScheduler::new(
        pipeline.clone(),
        source.clone(),
        clock.clone(),
        theme_rx,
        frame_tx,
        config.timing.debounce_interval_ms,
    );

    // Stand-in for the renderer side
    let renderer = tokio::spawn(async move {
        let mut frames = 0u64;
        while let Some(frame) = frame_rx.recv().await {
            frames += 1;
            info!(
                "Frame @{}ms: {} elements, light background: {}",
                frame.timestamp_ms,
                frame.len(),
                frame.background_is_light
            );
            for item in &frame.text_items {
                debug!("  {:?} at {:?} size {:.1}", item.text, item.rect, item.font_size);
            }
        }
        frames
    });

    let file = tokio::fs::File::open(&options.snapshots).await?;
    let mut lines = BufReader::new(file).lines();
    let mut snapshots = 0u64;
    let mut previous_ms: Option<u64> = None;

    info!("Replaying {:?}", options.snapshots);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping replay");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let recorded: RecordedSnapshot = match serde_json::from_str(&line) {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!("Skipping malformed snapshot line: {}", e);
                continue;
            }
        };

        if let Some(previous) = previous_ms {
            let gap = recorded.timestamp_ms.saturating_sub(previous);
            tokio::time::sleep(Duration::from_millis(gap)).await;
        }
        previous_ms = Some(recorded.timestamp_ms);

        source.set(recorded.root);
        clock.set(recorded.timestamp_ms);
        scheduler.notify(recorded.timestamp_ms);
        snapshots += 1;
    }

    scheduler.drain().await;
    let scheduler_stats = scheduler.stats();
    drop(scheduler);

    let frames = renderer.await?;

    let report = ReplayReport {
        snapshots,
        frames,
        scheduler: scheduler_stats,
        pipeline: pipeline.status(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("overlay-replay")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_no_args_shows_help() {
        assert_eq!(parse_args(&args(&[])), Ok(Command::Help));
    }

    #[test]
    fn test_parse_replay_options() {
        let command = parse_args(&args(&["rec.jsonl", "-g", "glossary.json", "--dictionary", "d.db"]));
        assert_eq!(
            command,
            Ok(Command::Replay(ReplayOptions {
                snapshots: PathBuf::from("rec.jsonl"),
                glossary: Some(PathBuf::from("glossary.json")),
                config: None,
                dictionary: Some("d.db".to_string()),
            }))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["rec.jsonl", "--glossary"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["a.jsonl", "b.jsonl"])).is_err());
    }

    #[tokio::test]
    async fn test_glossary_backend() {
        let backend = GlossaryBackend {
            entries: HashMap::from([("设置".to_string(), "Settings".to_string())]),
        };
        assert!(backend.is_ready());
        assert_eq!(backend.translate("设置").await.unwrap(), "Settings");
        assert!(backend.translate("帮助").await.is_err());
    }
}
