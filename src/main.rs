use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{info, warn};

use wrapsync::config::Config;
use wrapsync::outbox::Outbox;
use wrapsync::remote::{Backend, RestBackend};
use wrapsync::store::Store;
use wrapsync::sync::{DrainReport, PullReport, SyncEvent};
use wrapsync::{logging, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "wrapsync")]
#[command(about = "Local-first cache and sync engine for wrap shop data")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/wrapsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh the local cache from the server
  Pull,
  /// Push queued local changes to the server
  Push,
  /// Show connectivity, last pull and outbox counts
  Status,
  /// List queued local changes
  Outbox,
  /// Re-enable every dead-lettered outbox entry
  Revive,
  /// Keep syncing in the background until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = logging::init()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let db_path = match &config.database {
    Some(path) => path.clone(),
    None => Store::default_path()?,
  };
  info!(db = %db_path.display(), command = ?args.command, "starting");

  // Outbox maintenance works on the local database alone
  match args.command {
    Command::Outbox => return print_outbox(&local_outbox(&db_path)?),
    Command::Revive => {
      let revived = local_outbox(&db_path)?.revive_all()?;
      println!("revived {} entries", revived.len());
      return Ok(());
    }
    _ => {}
  }

  let backend: Arc<dyn Backend> = Arc::new(RestBackend::from_config(&config)?);
  let ctx = SyncContext::open(&db_path, backend, config.sync.clone())?;

  match args.command {
    Command::Pull => {
      probe(&ctx).await;
      let report = ctx.engine().sync_from_server().await?;
      print_pull(&report);
    }
    Command::Push => {
      probe(&ctx).await;
      let report = ctx.engine().sync_pending_changes().await?;
      print_drain(&report);
    }
    Command::Status => {
      probe(&ctx).await;
      let status = ctx.engine().status()?;
      println!("online:        {}", status.online);
      println!("last pull:     {}", format_millis(status.last_sync));
      println!("pending:       {}", status.pending);
      println!("dead-lettered: {}", status.dead_lettered);
    }
    Command::Run => run(&ctx).await?,
    Command::Outbox | Command::Revive => {}
  }

  ctx.shutdown();
  Ok(())
}

fn local_outbox(db_path: &Path) -> Result<Outbox> {
  Ok(Outbox::new(Arc::new(Store::open(db_path)?)))
}

fn print_outbox(outbox: &Outbox) -> Result<()> {
  let entries = outbox.list_pending()?;
  if entries.is_empty() {
    println!("outbox is empty");
  }
  for e in entries {
    println!(
      "#{:<5} {:<10} {:<7} {:<24} retries={} status={:?} queued={}{}",
      e.id,
      e.collection,
      e.action,
      e.record_key,
      e.retries,
      e.status,
      format_millis(Some(e.enqueued_at)),
      e.last_error.map(|err| format!(" error={}", err)).unwrap_or_default(),
    );
  }
  Ok(())
}

/// Ping once so one-shot commands know whether they may talk to the server.
async fn probe(ctx: &SyncContext) {
  let timeout = ctx.engine().config().request_timeout();
  let online = ctx.engine().probe(timeout).await;
  if !online {
    warn!("server unreachable, working offline");
    println!("server unreachable, working offline");
  }
}

async fn run(ctx: &SyncContext) -> Result<()> {
  probe(ctx).await;
  let report = ctx.engine().sync_from_server().await?;
  print_pull(&report);

  let mut events = ctx.engine().subscribe();
  ctx.start();
  println!("syncing in the background, press Ctrl-C to stop");

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.recv() => match event {
        Ok(SyncEvent::NeedsAttention { entry_id, collection, error }) => {
          println!("outbox entry #{} ({}) needs attention: {}", entry_id, collection, error);
        }
        Ok(SyncEvent::DrainCompleted { pushed, failed, .. }) if pushed + failed > 0 => {
          println!("pushed {} change(s), {} failed", pushed, failed);
        }
        Ok(_) => {}
        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
    }
  }

  ctx.shutdown();
  println!("stopped");
  Ok(())
}

fn print_pull(report: &PullReport) {
  if report.skipped {
    println!("pull skipped (offline)");
    return;
  }
  for (collection, stats) in &report.cached {
    println!(
      "{:<10} written={} removed={} kept_pending={}",
      collection, stats.written, stats.removed, stats.kept_pending
    );
  }
  for (collection, error) in &report.failed {
    println!("{:<10} failed: {}", collection, error);
  }
}

fn print_drain(report: &DrainReport) {
  if let Some(reason) = report.skipped {
    println!("push skipped ({:?})", reason);
    return;
  }
  println!(
    "attempted={} pushed={} failed={} dead_lettered={} exhausted={} deferred={}",
    report.attempted,
    report.pushed.len(),
    report.failed.len(),
    report.dead_lettered.len(),
    report.exhausted.len(),
    report.deferred.len(),
  );
}

fn format_millis(millis: Option<i64>) -> String {
  millis
    .and_then(DateTime::<Utc>::from_timestamp_millis)
    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string())
}
