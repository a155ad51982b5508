//! Waymark main entry point
//!
//! The command surface over the scheduling core: batch runs for the three
//! workflows, manual enqueue, the approval gate, maintenance removal, and
//! stats. The heavy lifting lives in the library; this wires configuration,
//! storage, and the external collaborator commands together.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use waymark::config::{load_config_with_hash, Config};
use waymark::gateway::ArchiveGateway;
use waymark::monitor::TrafficMonitor;
use waymark::state::Stage;
use waymark::storage::{open_datastore, RecordingRecord, RetryingStore, Storage};
use waymark::tasks::{
    enqueue_url, remove_snapshot, Capture, CaptureError, PublishError, PublishTarget,
    PublishTask, RecordTask, Renderer, ScoutTask,
};

/// Claims older than this belong to a crashed process and are released at
/// startup.
const STALE_CLAIM_SECS: i64 = 3600;

/// Waymark: a perpetual crawler for an archived web
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(version = "1.0.0")]
#[command(about = "Crawl scheduler for an archived web", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Visit pending snapshots: fetch, score, and extract links
    Scout {
        /// Override the configured batch size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Capture scouted snapshots through the external renderer
    Record {
        /// Override the configured batch size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Post recorded snapshots through the external publish target
    Publish {
        /// Override the configured batch size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Manually queue a URL for a stage, ahead of ranked rows
    Enqueue {
        /// Target stage: scout, record, or publish
        stage: String,

        /// The original URL to queue
        url: String,

        /// 14-digit capture timestamp; defaults to now (nearest capture wins)
        timestamp: Option<String>,
    },

    /// Approve a recording for publication
    Approve {
        #[arg(value_name = "RECORDING_ID")]
        recording_id: i64,
    },

    /// Remove a snapshot, its descendants' edges, and its media file
    Delete {
        #[arg(value_name = "SNAPSHOT_ID")]
        snapshot_id: i64,
    },

    /// Show datastore statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Every storage call waits out transient lock contention from sibling
    // workflow processes.
    let mut store = RetryingStore::new(
        open_datastore(Path::new(&config.datastore.path))
            .with_context(|| format!("opening datastore {}", config.datastore.path))?,
        config.datastore.clone(),
    );

    let released = store.release_stale_claims(STALE_CLAIM_SECS)?;
    if released > 0 {
        tracing::warn!(released, "released stale claims from a previous run");
    }

    // Stats is read-only; everything else is a run worth recording.
    if matches!(cli.command, Command::Stats) {
        return print_stats(&store);
    }

    let (run_id, previous_hash) = store.create_run(&config_hash)?;
    if let Some(previous) = previous_hash {
        if previous != config_hash {
            tracing::warn!("configuration changed since the previous run");
        }
    }

    let outcome = run_command(&cli.command, &mut store, &config).await;
    store.complete_run(run_id)?;
    outcome
}

async fn run_command(
    command: &Command,
    store: &mut impl Storage,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Scout { limit } => {
            let gateway = ArchiveGateway::new(config.gateway.clone())?;
            let mut task = ScoutTask::new(store, &gateway, config)?;
            let report = task.run(*limit).await?;
            println!("scout: {}", report);
        }

        Command::Record { limit } => {
            let Some(capture_command) = config.record.capture_command.clone() else {
                bail!("record requires capture-command in the [record] section");
            };
            let gateway = ArchiveGateway::new(config.gateway.clone())?;
            let mut renderer =
                CommandRenderer::new(capture_command, PathBuf::from(&config.record.output_dir));
            let mut task = RecordTask::new(store, &gateway, &mut renderer, config)?;
            let report = task.run(*limit).await?;
            println!("record: {}", report);
        }

        Command::Publish { limit } => {
            let Some(publish_command) = config.publish.publish_command.clone() else {
                bail!("publish requires publish-command in the [publish] section");
            };
            let mut target = CommandPublisher::new(publish_command);
            let mut task = PublishTask::new(store, &mut target, config);
            let report = task.run(*limit).await?;
            println!("publish: {}", report);
        }

        Command::Enqueue {
            stage,
            url,
            timestamp,
        } => {
            let Some(stage) = Stage::from_str(stage) else {
                bail!("unknown stage '{}', expected scout, record, or publish", stage);
            };
            let timestamp = timestamp
                .clone()
                .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
            let id = enqueue_url(store, config, url, &timestamp, stage)?;
            println!("enqueued snapshot {} for {}", id, stage.as_str());
        }

        Command::Approve { recording_id } => {
            store.approve_recording(*recording_id)?;
            println!("recording {} approved", recording_id);
        }

        Command::Delete { snapshot_id } => {
            remove_snapshot(store, *snapshot_id)?;
            println!("snapshot {} removed", snapshot_id);
        }

        Command::Stats => unreachable!("handled before run bookkeeping"),
    }

    Ok(())
}

fn print_stats(store: &impl Storage) -> anyhow::Result<()> {
    let stats = store.stats()?;

    println!("Snapshots: {}", stats.total_snapshots);
    for (state, count) in &stats.by_state {
        println!("  {:<13} {}", state.to_string(), count);
    }
    println!(
        "Recordings: {} ({} unpublished)",
        stats.total_recordings, stats.unpublished_recordings
    );

    if let Some(run) = store.latest_run()? {
        match run.finished_at {
            Some(finished) => println!("Last run: {} .. {}", run.started_at, finished),
            None => println!("Last run: {} (still running or interrupted)", run.started_at),
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("waymark=info,warn"),
            1 => EnvFilter::new("waymark=debug,info"),
            2 => EnvFilter::new("waymark=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Drives an external capture program as the rendering collaborator.
///
/// The program gets the playback URL and an output path; it owns the
/// browser, the plugins, and the encoder. Its exit status is the capture
/// verdict.
struct CommandRenderer {
    command: String,
    output_dir: PathBuf,
    child: Option<tokio::process::Child>,
    output_path: Option<String>,
}

impl CommandRenderer {
    fn new(command: String, output_dir: PathBuf) -> Self {
        Self {
            command,
            output_dir,
            child: None,
            output_path: None,
        }
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn load(
        &mut self,
        url: &str,
        _monitor: &TrafficMonitor,
    ) -> std::result::Result<(), CaptureError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| CaptureError::Other(e.to_string()))?;

        let filename = format!(
            "capture-{}.mp4",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let output = self.output_dir.join(filename);

        let child = tokio::process::Command::new(&self.command)
            .arg(url)
            .arg(&output)
            .spawn()
            .map_err(|e| {
                CaptureError::Other(format!("failed to start {}: {}", self.command, e))
            })?;

        self.child = Some(child);
        self.output_path = Some(output.to_string_lossy().into_owned());
        Ok(())
    }

    async fn capture(&mut self) -> std::result::Result<Capture, CaptureError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::Other("capture called before load".to_string()))?;
        let status = child
            .wait()
            .await
            .map_err(|e| CaptureError::Other(e.to_string()))?;
        if !status.success() {
            return Err(CaptureError::Other(format!(
                "capture command exited with {}",
                status
            )));
        }

        let path = self
            .output_path
            .take()
            .ok_or_else(|| CaptureError::Other("no output path".to_string()))?;
        Ok(Capture {
            path,
            has_audio: true,
        })
    }
}

/// Drives an external posting program as the publish target.
struct CommandPublisher {
    command: String,
}

impl CommandPublisher {
    fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PublishTarget for CommandPublisher {
    async fn publish(
        &mut self,
        recording: &RecordingRecord,
        caption: &str,
        sensitive: bool,
    ) -> std::result::Result<Option<String>, PublishError> {
        let mut command = tokio::process::Command::new(&self.command);
        command.arg(&recording.path).arg(caption);
        if sensitive {
            command.arg("--sensitive");
        }

        let output = command
            .output()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PublishError::Rejected(format!(
                "publish command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty()))
    }
}
