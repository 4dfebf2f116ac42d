mod agent;
mod backend;
mod cache;
mod classify;
mod clients;
mod config;
mod db;
mod discovery;
mod lifecycle;
mod logging;
mod net;
mod reconcile;
mod router;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::Agent;
use crate::clients::{ClientEvent, ClientKind};
use crate::router::InterceptedRequest;

#[derive(Parser, Debug)]
#[command(name = "kiosk-cache")]
#[command(about = "An offline-first resource cache agent for kiosk content")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kiosk-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Backend content server URL
  #[arg(short, long, global = true)]
  backend: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate and keep the cache in step with the backend
  Run,
  /// Route a single request through the cache and print the body
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Show what is stored
  Status,
  /// Delete blob namespaces left behind by earlier generations
  Evict,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override backend if specified on command line
  let config = if let Some(backend_url) = args.backend {
    config::Config {
      backend_url,
      ..config
    }
  } else {
    config
  };

  let _logging = logging::init_logging(&config.data_dir()?.join("logs"), "kiosk-cache.log")?;

  let agent = Agent::open(&config)?;

  match args.command {
    Command::Run => run(&agent).await,
    Command::Fetch { url, navigate } => fetch(&agent, url, navigate).await,
    Command::Status => status(&agent),
    Command::Evict => {
      let report = agent.activate()?;
      println!("evicted: {}", report.evicted.join(", "));
      Ok(())
    }
  }
}

async fn run(agent: &Agent<net::ReqwestFetcher>) -> Result<()> {
  // Log-only view so notifications show up somewhere
  let mut view = agent.clients().register(ClientKind::Worker, "kiosk-cache:log");
  let view_id = view.id;
  tokio::spawn(async move {
    while let Some(event) = view.next().await {
      if let ClientEvent::Message(message) = event {
        let payload = serde_json::to_string(&message).unwrap_or_default();
        info!(%payload, "client notification");
      }
    }
  });

  let (warmed, activated) = agent.start().await?;
  info!(
    stored = warmed.stored,
    failed = warmed.failed,
    evicted = activated.evicted.len(),
    controlled = agent.clients().is_controlled(view_id),
    "agent ready"
  );

  let shutdown = CancellationToken::new();
  let handle = agent.spawn_reconciliation(shutdown.clone());

  tokio::signal::ctrl_c().await?;
  shutdown.cancel();
  handle.await?;
  Ok(())
}

async fn fetch(agent: &Agent<net::ReqwestFetcher>, url: String, navigate: bool) -> Result<()> {
  let request = if navigate {
    InterceptedRequest::navigation(url)
  } else {
    InterceptedRequest::new(url)
  };

  let routed = agent.handle(&request).await;
  eprintln!("{} ({:?})", routed.response.status, routed.source);
  std::io::stdout().write_all(&routed.response.body)?;
  Ok(())
}

fn status(agent: &Agent<net::ReqwestFetcher>) -> Result<()> {
  let store = agent.store();
  let version = store
    .version_get()?
    .map(|v| v.to_string())
    .unwrap_or_else(|| "-".to_string());

  println!("namespace: {}", store.namespace());
  println!("blobs:     {}", store.blob_count()?);
  println!("records:   {}", store.struct_count()?);
  println!("version:   {}", version);
  Ok(())
}
