use crate::Config;
use anyhow::Context;
use host::{now_ms, Storage};
use models::{is_valid, PoolState};
use std::sync::Arc;
use std::time::Duration;
use store::{StateStore, STATE_KEY};

/// How the service came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Migration ran (when needed), lifecycle listeners belong on.
    Full,
    /// Feature flag off: only the message router is wired. The router
    /// contract is identical, so observers cannot tell.
    Minimal,
}

#[derive(Debug, Clone, Copy)]
pub struct InitOutcome {
    pub mode: Mode,
    pub migrated: bool,
}

/// Single-flight bootstrap guard. The first caller runs the sequence;
/// concurrent and later callers share its outcome. A contending migration
/// attempt re-detects the stored format after taking the lock, so exactly
/// one migration acts on any given blob.
pub struct InitBarrier {
    cell: tokio::sync::OnceCell<InitOutcome>,
    migration_lock: tokio::sync::Mutex<()>,
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl InitBarrier {
    pub fn new() -> Self {
        Self {
            cell: tokio::sync::OnceCell::new(),
            migration_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn ready(
        &self,
        store: &StateStore,
        storage: &Arc<dyn Storage>,
        config: &Config,
    ) -> anyhow::Result<InitOutcome> {
        let ceiling = Duration::from_millis(config.init_barrier_timeout_ms);
        let outcome = tokio::time::timeout(
            ceiling,
            self.cell
                .get_or_try_init(|| self.initialize(store, storage, config)),
        )
        .await
        .with_context(|| format!("init did not complete within {ceiling:?}"))??;
        Ok(*outcome)
    }

    async fn initialize(
        &self,
        store: &StateStore,
        storage: &Arc<dyn Storage>,
        config: &Config,
    ) -> anyhow::Result<InitOutcome> {
        if !config.use_quick_tabs_v2 {
            tracing::info!("quick tabs v2 disabled, starting in minimal mode");
            return Ok(InitOutcome {
                mode: Mode::Minimal,
                migrated: false,
            });
        }

        let raw = storage
            .get(STATE_KEY)
            .await
            .context("loading raw state during init")?;

        let mut migrated = false;
        if let Some(raw) = raw {
            if migrate::parse(&raw, now_ms()).needs_write {
                migrated = self.run_migration(store, storage).await?;
            }
        }

        // Whatever is stored now must be servable; otherwise start clean.
        let state = store.read_state().await;
        if !is_valid(&state) {
            tracing::warn!("stored state invalid after init, resetting to empty");
            let outcome = store
                .write_state_with_validation(&PoolState::empty(), &format!(
                    "init-reset-{}",
                    protocol::new_correlation_id()
                ))
                .await;
            if !outcome.success {
                anyhow::bail!("could not reset invalid state during init");
            }
        }

        tracing::info!(migrated, "coordinator initialized");
        Ok(InitOutcome {
            mode: Mode::Full,
            migrated,
        })
    }

    async fn run_migration(
        &self,
        store: &StateStore,
        storage: &Arc<dyn Storage>,
    ) -> anyhow::Result<bool> {
        let _guard = self.migration_lock.lock().await;

        // Re-detect under the lock: a contender may have migrated already.
        let Some(raw) = storage
            .get(STATE_KEY)
            .await
            .context("re-reading state under migration lock")?
        else {
            return Ok(false);
        };

        let migration = migrate::parse(&raw, now_ms());
        if !migration.needs_write {
            return Ok(false);
        }

        tracing::info!(
            strategy = ?migration.report.strategy,
            dropped = migration.report.dropped_entries,
            hybrid = migration.report.hybrid_format,
            "migrating stored state"
        );
        let correlation_id = format!("init-migration-{}", protocol::new_correlation_id());
        let outcome = store
            .write_state_with_validation(&migration.state, &correlation_id)
            .await;
        if !outcome.success {
            anyhow::bail!("migration write failed");
        }
        Ok(true)
    }
}
