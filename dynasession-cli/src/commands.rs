use crate::cli::Commands;
use crate::config::apply_gc_overrides;
use anyhow::{Result, bail};
use dynasession::SessionStore;
use dynasession_core::{SessionConfig, SessionId};
use dynasession_store::ItemStore;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// Execute one subcommand against `backend`, writing human-readable output to `out`.
pub async fn run<W: Write>(
    command: Commands,
    config: SessionConfig,
    backend: Arc<dyn ItemStore>,
    out: &mut W,
) -> Result<()> {
    match command {
        Commands::Gc { max_age_secs, max_stale_secs, batch_size } => {
            let config = apply_gc_overrides(config, max_age_secs, max_stale_secs, batch_size);
            let store = SessionStore::new(config, backend)?;
            let deleted = store.garbage_collector().collect_from_config().await?;
            writeln!(out, "deleted {deleted} expired session(s)")?;
        }
        Commands::Show { id } => {
            let id = SessionId::parse(id)?;
            let store = SessionStore::new(config, backend)?;
            let Some(record) = store.table().read(&id).await? else {
                bail!("session {id} not found");
            };
            let stamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
                at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
            };
            writeln!(out, "id:               {}", record.id)?;
            writeln!(out, "locked:           {}", record.lock.locked)?;
            writeln!(out, "lock_acquired_at: {}", stamp(record.lock.acquired_at))?;
            writeln!(out, "created_at:       {}", stamp(record.created_at))?;
            writeln!(out, "updated_at:       {}", stamp(record.updated_at))?;
            writeln!(out, "data_bytes:       {}", record.data.map_or(0, |d| d.len()))?;
        }
        Commands::Delete { id } => {
            let id = SessionId::parse(id)?;
            let store = SessionStore::new(config, backend)?;
            if store.table().delete(&id).await? {
                info!(session_id = %id, "session deleted");
                writeln!(out, "deleted session {id}")?;
            } else {
                writeln!(out, "session {id} not found")?;
            }
        }
    }
    Ok(())
}
