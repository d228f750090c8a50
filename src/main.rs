mod app;
mod cache;
mod config;
mod db;
mod event;
mod lifecycle;
mod net;
mod outbox;
mod router;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::app::App;
use crate::cache::CacheSource;
use crate::event::{ChannelSync, EventHandler};
use crate::net::{AbortController, HttpNetwork, Request};
use crate::router::Outcome;

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline-resilient caching and write queuing in front of a web origin")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to serve, overriding the config file
  #[arg(short, long)]
  origin: Option<String>,

  /// Log at debug level
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest and activate the configured version
  Install,
  /// Fetch a path (or absolute URL) through the router
  Get {
    target: String,
    /// Treat the request as a full document navigation
    #[arg(long)]
    navigate: bool,
  },
  /// POST a JSON body to the outbox-protected endpoint
  Send { json: String },
  /// Run one replay pass over the outbox
  Replay,
  /// Show cache generations and pending outbox items
  Status,
  /// Run the background sync worker until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, with the command-line origin taking precedence
  let config = config::Config::load(args.config.as_deref(), args.origin)?;

  let _guard = init_tracing(args.verbose, &config)?;
  let network = HttpNetwork::new(&config)?;

  match args.command {
    Command::Run => {
      let events = EventHandler::new(Duration::from_secs(config.outbox.replay_interval_secs));
      let app = App::new(config, network, Arc::new(events.background_sync()))?;
      app.run(events).await
    }
    command => {
      let app = App::new(config.clone(), network, Arc::new(ChannelSync::detached()))?;
      run_command(&app, &config, command).await
    }
  }
}

async fn run_command(app: &App<HttpNetwork>, config: &config::Config, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      let deleted = app.install().await?;
      println!("Activated {}", config.cache.static_name());
      for name in deleted {
        println!("Deleted {}", name);
      }
    }
    Command::Get { target, navigate } => {
      let url = resolve_target(config, &target)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      print_outcome(fetch_abortable(app, &request).await?);
    }
    Command::Send { json } => {
      serde_json::from_str::<serde_json::Value>(&json)
        .map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
      let request = Request::post_json(config.resolve(&config.outbox.endpoint)?, json.into_bytes());
      print_outcome(fetch_abortable(app, &request).await?);
    }
    Command::Replay => {
      let summary = app.replay().await?;
      println!(
        "Delivered {} of {} queued writes",
        summary.delivered, summary.attempted
      );
    }
    Command::Status => {
      let status = app.status()?;
      println!("Cache generations:");
      for generation in status.generations {
        let marker = if generation.active { " (active)" } else { "" };
        println!("  {}{}: {} entries", generation.name, marker, generation.entries);
      }
      println!("Outbox: {} pending", status.outbox.len());
      for item in status.outbox {
        println!("  {} {} {} {}", item.id, item.method, item.url, item.enqueued_at);
      }
    }
    Command::Run => return Err(eyre!("The sync worker is started from main")),
  }
  Ok(())
}

/// Route a request, aborting it if ctrl-c arrives first.
async fn fetch_abortable(app: &App<HttpNetwork>, request: &Request) -> Result<Outcome> {
  let controller = AbortController::new();
  let signal = controller.signal();

  tokio::select! {
    outcome = app.fetch(request, &signal) => outcome,
    _ = tokio::signal::ctrl_c() => {
      controller.abort();
      Ok(Outcome::Aborted)
    }
  }
}

fn resolve_target(config: &config::Config, target: &str) -> Result<Url> {
  match Url::parse(target) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => config.resolve(target),
    Err(e) => Err(eyre!("Invalid target '{}': {}", target, e)),
  }
}

fn print_outcome(outcome: Outcome) {
  match outcome {
    Outcome::Respond(result) => {
      let source = match result.source {
        CacheSource::Network => "network",
        CacheSource::Offline => "offline cache",
        CacheSource::RootDocument => "cached root document",
        CacheSource::Synthesized => "offline placeholder",
        CacheSource::Queued => "queued for replay",
      };
      println!(
        "{} {} ({})",
        result.data.status, result.data.status_text, source
      );
      if let Some(cached_at) = result.cached_at {
        println!("cached at {}", cached_at);
      }
      println!("{}", result.data.text());
    }
    Outcome::NotFound => println!("Not found: network unavailable and nothing cached"),
    Outcome::Ignored => println!("Ignored: not a network request"),
    Outcome::Aborted => println!("Aborted"),
  }
}

/// Log to stderr, or to a daily rolling file when `log_dir` is set.
fn init_tracing(verbose: bool, config: &config::Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("outpost=debug")
    } else {
      EnvFilter::new("outpost=info")
    }
  });

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "outpost.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}
