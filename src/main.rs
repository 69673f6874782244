mod cache;
mod config;
mod event;
mod http;
mod logging;
mod proxy;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use url::Url;

use cache::{CacheStorage, SqliteStorage};
use config::Config;
use event::{EventSource, HostEvent};
use http::{Request, Response};
use proxy::{Dispatched, Fetched, HttpNetwork, Network, Outcome, ProxyWorker, TerminalHost};

type Worker = ProxyWorker<SqliteStorage, HttpNetwork, TerminalHost>;

#[derive(Parser, Debug)]
#[command(name = "offline-proxy")]
#[command(about = "An offline-first request interceptor for single-page apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-proxy/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application scope URL (overrides the config file)
  #[arg(long)]
  origin: Option<Url>,

  /// Cache generation to run as
  #[arg(short, long)]
  generation: Option<String>,

  /// Cache database path
  #[arg(long, conflicts_with = "ephemeral")]
  database: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// More logging (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the current generation
  Start,
  /// Route one request through the proxy
  Fetch {
    /// Absolute URL, or a path relative to the scope
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a top-level page load
    #[arg(long)]
    navigate: bool,
  },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Click a notification
  NotificationClick {
    #[arg(long)]
    tag: Option<String>,
  },
  /// Deliver a background sync event
  Sync { tag: String },
  /// List stored cache generations
  Generations,
  /// Replay JSON-lines host events from a file (default: stdin)
  Replay { file: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, command line wins
  let mut config = Config::load(args.config.as_deref(), args.origin)?;
  if let Some(generation) = args.generation {
    config.generation = generation;
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  let _guard = logging::init(args.verbose, config.log_file.as_deref())?;

  let storage = Arc::new(match &config.database {
    _ if args.ephemeral => SqliteStorage::in_memory()?,
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  });
  let network = Arc::new(HttpNetwork::new(config.fetch_timeout())?);
  let mut worker: Worker = ProxyWorker::new(
    &config,
    storage.clone(),
    network.clone(),
    Arc::new(TerminalHost),
  )?;

  let result = match args.command {
    Command::Start => {
      let state = worker.start().await?;
      println!("{} {}", worker.generation(), state);
      Ok(())
    }
    Command::Fetch {
      url,
      method,
      navigate,
    } => {
      let request = build_request(&config, &url, &method, navigate)?;
      fetch(&mut worker, &network, &request).await
    }
    Command::Push { payload } => worker.dispatch(HostEvent::Push(payload)).await.map(|_| ()),
    Command::NotificationClick { tag } => worker
      .dispatch(HostEvent::NotificationClick(tag))
      .await
      .map(|_| ()),
    Command::Sync { tag } => {
      if let Dispatched::Sync { recognized: false } =
        worker.dispatch(HostEvent::Sync(tag.clone())).await?
      {
        eprintln!("unknown sync tag '{}'", tag);
      }
      Ok(())
    }
    Command::Generations => list_generations(&storage, &config.generation),
    Command::Replay { file } => replay(&mut worker, &config, file).await,
  };

  worker.drain().await;
  result
}

fn build_request(config: &Config, url: &str, method: &str, navigate: bool) -> Result<Request> {
  let url = config.resolve(url)?;
  let method = event::parse_method(method)?;

  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  Ok(request.with_method(method))
}

async fn fetch(worker: &mut Worker, network: &HttpNetwork, request: &Request) -> Result<()> {
  let fetched = worker.fetch(request).await;

  let response = match fetched.response {
    Some(response) => response,
    // Not intercepted: the request goes out untouched
    None => network.fetch(request).await?,
  };

  print_response(&response, fetched.outcome)
}

/// Status line to stderr, body to stdout.
fn print_response(response: &Response, outcome: Outcome) -> Result<()> {
  eprintln!(
    "{} {} ({})",
    response.status,
    response.reason,
    outcome.as_str()
  );
  if let Some(content_type) = response.header("content-type") {
    eprintln!("content-type: {}", content_type);
  }

  std::io::stdout()
    .write_all(&response.body)
    .map_err(|e| eyre!("Failed to write response body: {}", e))?;

  Ok(())
}

fn list_generations(storage: &SqliteStorage, current: &str) -> Result<()> {
  let generations = storage.describe()?;
  if generations.is_empty() {
    println!("no cache generations");
  }

  for info in generations {
    let marker = if info.name == current { "*" } else { " " };
    println!(
      "{} {:<24} {:<10} {:>6} entries  {}",
      marker,
      info.name,
      info.state.as_str(),
      info.entries,
      info.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }

  Ok(())
}

async fn replay(worker: &mut Worker, config: &Config, file: Option<PathBuf>) -> Result<()> {
  let mut events = match file {
    Some(path) => {
      let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| eyre!("Failed to open {}: {}", path.display(), e))?;
      EventSource::new(tokio::io::BufReader::new(file), config.scope.clone())
    }
    None => EventSource::new(
      tokio::io::BufReader::new(tokio::io::stdin()),
      config.scope.clone(),
    ),
  };

  while let Some(event) = events.next().await {
    let event = event?;
    let label = match &event {
      HostEvent::Fetch(request) => format!("{} {}", request.method, request.url),
      _ => String::new(),
    };

    // Failures go to the host, which keeps delivering events
    match worker.dispatch(event).await {
      Ok(Dispatched::Lifecycle(state)) => println!("{} {}", worker.generation(), state),
      Ok(Dispatched::Fetch(Fetched { outcome, response })) => match response {
        Some(response) => println!(
          "{} -> {} {} ({})",
          label,
          response.status,
          response.reason,
          outcome.as_str()
        ),
        None => println!("{} -> ({})", label, outcome.as_str()),
      },
      Ok(Dispatched::Notified) => {}
      Ok(Dispatched::Sync { recognized }) => {
        println!("sync {}", if recognized { "handled" } else { "ignored" })
      }
      Err(e) => error!("{:#}", e),
    }
  }

  Ok(())
}
