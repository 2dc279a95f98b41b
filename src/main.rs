mod cache;
mod config;
mod db;
mod event;
mod logging;
mod net;
mod notify;
mod strategy;
mod sync;
mod worker;

#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::debug;
use std::sync::Arc;
use url::Url;

use config::Config;
use db::Database;
use event::{EventOutcome, WorkerEvent, WorkerHost};
use net::{HttpFetcher, Request};
use notify::LogNotifier;
use worker::{ControlMessage, LifecycleController, WorkerStorage};

#[derive(Parser, Debug)]
#[command(name = "libsys-worker")]
#[command(about = "Offline request interception and sync for the library management front end")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/libsys-worker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Application origin; overrides the config file or runs without one
  #[arg(short, long, global = true)]
  origin: Option<Url>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the application shell, then activate unless waiting is configured
  Install,
  /// Activate an installed worker that is waiting
  Activate,
  /// Route a request through the worker
  Fetch {
    /// Absolute URL or path on the origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Issue the request from a page open at this URL
    #[arg(long)]
    page: Option<String>,
    /// Request header as name:value
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Post a control message, e.g. '{"type":"CLEAR_CACHE"}'
  Message { json: String },
  /// Store a write for later replay
  Enqueue {
    queue: String,
    url: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay the queue registered for a sync tag
  Sync { tag: String },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Interact with the default notification
  Click {
    #[arg(long)]
    action: Option<String>,
  },
  /// Show worker versions, caches and pending queues
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration; --origin alone is enough to run
  let config = match args.origin.clone() {
    Some(origin) => match Config::discover(args.config.as_deref())? {
      Some(config) => Config { origin, ..config },
      None => Config::for_origin(origin),
    },
    None => Config::load(args.config.as_deref())?,
  };
  config.validate()?;

  let _guard = logging::init(&config, args.verbose)?;

  let storage = Arc::new(Database::open(&config.database_path()?)?);
  let fetcher = Arc::new(HttpFetcher::new(&config)?);
  let worker = Arc::new(LifecycleController::new(
    &config,
    fetcher,
    storage,
    Arc::new(LogNotifier),
  )?);

  worker.resume().await?;

  let mut page = None;
  let event = match args.command {
    Command::Status => return print_status(worker.as_ref()).await,
    Command::Install => WorkerEvent::Install,
    Command::Activate => WorkerEvent::Activate,
    Command::Fetch {
      url,
      method,
      navigate,
      page: page_url,
      headers,
      data,
    } => {
      let request = build_request(&config, &method, &url, &headers, data)?;
      let request = if navigate {
        request.with_mode(net::RequestMode::Navigate)
      } else {
        request
      };
      if let Some(page_url) = page_url {
        page = Some(worker.open_page(config.resolve(&page_url)?).await);
      }
      WorkerEvent::Fetch {
        request,
        client_id: page.as_ref().map(|p| p.id.clone()),
      }
    }
    Command::Message { json } => WorkerEvent::Message(ControlMessage::parse(&json)?),
    Command::Enqueue {
      queue,
      url,
      method,
      headers,
      data,
    } => WorkerEvent::Enqueue {
      queue,
      request: build_request(&config, &method, &url, &headers, data)?,
    },
    Command::Sync { tag } => WorkerEvent::Sync { tag },
    Command::Push { payload } => WorkerEvent::Push { payload },
    Command::Click { action } => WorkerEvent::NotificationClick {
      notification: worker.compose_notification(None),
      action,
    },
  };

  let host = WorkerHost::spawn(Arc::clone(&worker));
  let outcome = host.send(event).await?;
  if let Some(page) = page {
    worker.close_page(&page.id).await;
  }
  report(outcome).await
}

fn build_request(
  config: &Config,
  method: &str,
  url: &str,
  headers: &[String],
  data: Option<String>,
) -> Result<Request> {
  let mut request = Request::new(method, config.resolve(url)?);
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected name:value", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(data) = data {
    request = request.with_body(data);
  }
  Ok(request)
}

async fn report(outcome: EventOutcome) -> Result<()> {
  match outcome {
    EventOutcome::Completed(state) => println!("Worker {}", state),
    EventOutcome::Failed(message) => return Err(eyre!(message)),
    EventOutcome::Passthrough => println!("Not intercepted"),
    EventOutcome::Responded(outcome) => {
      let source = outcome.source;
      let strategy = outcome.strategy;
      if outcome.has_pending_write() {
        debug!("Waiting for cache write");
      }
      // Let the cache write land before the process exits
      let response = outcome.settle().await;
      println!(
        "{} {} ({:?} via {})",
        response.status, response.status_text, source, strategy
      );
      for (name, value) in response.headers.iter() {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", response.text());
    }
    EventOutcome::Enqueued(id) => println!("Queued as #{}", id),
    EventOutcome::Synced(report) => println!(
      "{}: {} delivered, {} retained",
      report.queue, report.delivered, report.retained
    ),
    EventOutcome::SyncSkipped => println!("Nothing to sync"),
    EventOutcome::Notified(notification) => {
      println!("{}: {}", notification.title, notification.body)
    }
    EventOutcome::WindowOpened(client) => println!("Opened {} ({})", client.url, client.id),
    EventOutcome::Dismissed => println!("Dismissed"),
  }
  Ok(())
}

async fn print_status<F, S>(worker: &LifecycleController<F, S>) -> Result<()>
where
  F: net::Fetcher + 'static,
  S: WorkerStorage + 'static,
{
  let status = worker.status().await?;

  println!("Version: {} ({})", status.version, status.state);
  println!(
    "Active:  {}",
    status.active_version.as_deref().unwrap_or("(none)")
  );
  println!("Caches:");
  if status.caches.is_empty() {
    println!("  (none)");
  }
  for cache in &status.caches {
    let marker = if cache.current { "" } else { " (stale)" };
    println!("  {:<32} {:>6} entries{}", cache.name, cache.entries, marker);
  }
  println!("Queues:");
  for queue in &status.queues {
    print!("  {:<32} {:>6} pending", queue.name, queue.pending);
    if queue.dead_letters > 0 {
      print!(", {} unreadable", queue.dead_letters);
    }
    println!();
  }
  Ok(())
}
