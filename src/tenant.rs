use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch;
use crate::engine::Engine;
use crate::limits::*;
use crate::messaging::Messenger;
use crate::notify::NotifyHub;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// dispatcher + compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    dispatch_interval: Duration,
    messenger: Arc<dyn Messenger>,
    shutdown: CancellationToken,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        dispatch_interval: Duration,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            dispatch_interval,
            messenger,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled by `shutdown`; background tasks watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every tenant's background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        validate_tenant(tenant)?;

        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Creation runs under the map entry so two connections racing on a new
        // tenant never open the same WAL twice.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{tenant}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(tenant, wal_path, notify)?);

                let token = self.shutdown.child_token();
                tokio::spawn(dispatch::run_dispatcher(
                    engine.clone(),
                    self.messenger.clone(),
                    self.dispatch_interval,
                    token.clone(),
                ));
                tokio::spawn(dispatch::run_compactor(
                    engine.clone(),
                    self.compact_threshold,
                    COMPACT_CHECK_INTERVAL,
                    token,
                ));
                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant, "tenant loaded");
        Ok(engine)
    }
}

/// The tenant name doubles as the WAL file stem, so it must already be one:
/// alphanumerics, `_` and `-` only. Rewriting it instead would let two
/// databases share a log.
fn validate_tenant(tenant: &str) -> std::io::Result<()> {
    if tenant.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    if !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid tenant name {tenant:?}: use letters, digits, '_' or '-'"),
        ));
    }
    Ok(())
}
