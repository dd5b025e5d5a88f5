use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;
use media_relay::{
    AppConfig, AudioRequest, DownloadLink, DownloadOrchestrator, FileSink, VideoRequest,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "media-relay", version, about = "Adaptive media download relay")]
struct Cli {
    /// Configuration file (JSON). Defaults to the per-user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a video, picking the best candidate link for current conditions
    Video {
        #[command(flatten)]
        source: SourceArgs,
        /// Media duration in seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Download an audio track
    Audio {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Estimate network bandwidth
    Probe {
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Direct media URL; skips link selection
    #[arg(long)]
    url: Option<String>,
    /// Candidate link as LABEL=URL, repeatable
    #[arg(long = "link", value_parser = parse_link)]
    links: Vec<DownloadLink>,
    #[arg(long, default_value = "media")]
    title: String,
    /// Output file or directory
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

impl SourceArgs {
    fn links(&self) -> Option<Vec<DownloadLink>> {
        if self.links.is_empty() {
            None
        } else {
            Some(self.links.clone())
        }
    }
}

fn parse_link(raw: &str) -> Result<DownloadLink, String> {
    match raw.split_once('=') {
        Some((label, url)) if !url.is_empty() => Ok(DownloadLink::new(url, label)),
        _ => Err(format!("expected LABEL=URL, got '{}'", raw)),
    }
}

fn load_config(path: Option<&PathBuf>) -> AppConfig {
    let loaded = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    match loaded {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    }
}

async fn download(
    orchestrator: &DownloadOrchestrator,
    command: Command,
) -> anyhow::Result<()> {
    let (mut sink, result) = match command {
        Command::Video { source, duration } => {
            let request = VideoRequest {
                video_url: source.url.clone(),
                download_links: source.links(),
                title: source.title.clone(),
                duration,
            };
            let mut sink = FileSink::new(&source.out);
            let result = orchestrator.download_video(&request, &mut sink).await;
            (sink, result)
        }
        Command::Audio { source } => {
            let request = AudioRequest {
                audio_url: source.url.clone(),
                download_links: source.links(),
                title: source.title.clone(),
            };
            let mut sink = FileSink::new(&source.out);
            let result = orchestrator.download_audio(&request, &mut sink).await;
            (sink, result)
        }
        _ => bail!("not a download command"),
    };

    let path = sink.finish().await.context("closing output file")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.performance_report())?
    );
    println!("{}", serde_json::to_string_pretty(&orchestrator.queue_status())?);

    match result {
        Ok(outcome) => {
            info!(
                "Saved {} bytes to {:?}",
                outcome.bytes_written,
                path.unwrap_or_default()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(error) = sink.last_error() {
                println!("{}", serde_json::to_string_pretty(error)?);
            }
            Err(anyhow::Error::new(e).context("download failed"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Probe { url } => {
            let orchestrator = DownloadOrchestrator::new(&config)?;
            let mbps = orchestrator.probe_network(url.as_deref()).await;
            println!("{}", serde_json::json!({ "speedMbps": mbps }));
        }
        command => {
            info!("Starting media relay");
            let orchestrator = DownloadOrchestrator::new(&config)?;
            download(&orchestrator, command).await?;
        }
    }

    Ok(())
}
