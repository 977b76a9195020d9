use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use llmux_provider_core::{
    CredentialPool, CredentialStatus, EventHub, ModelRegistry, ProviderFamily, Selector,
    UpstreamExecutor,
};
use llmux_store::{ChangeEvent, CredentialStore};
use llmux_transform::TranslatorRegistry;

use crate::config::Config;

/// Shared process state. Hot-swapped pieces (config, registry) sit behind
/// `ArcSwap`; everything else is internally synchronized.
pub struct AppState {
    pub config: ArcSwap<Config>,
    pub store: Arc<dyn CredentialStore>,
    pub pool: Arc<CredentialPool>,
    pub registry: ArcSwap<ModelRegistry>,
    pub selector: Arc<Selector>,
    pub translators: Arc<TranslatorRegistry>,
    pub executors: HashMap<ProviderFamily, Arc<dyn UpstreamExecutor>>,
    pub events: EventHub,
}

impl AppState {
    /// Load every stored credential into the pool, seed config-declared API
    /// keys, and build the first registry projection.
    pub async fn bootstrap(
        config: Config,
        store: Arc<dyn CredentialStore>,
        executors: HashMap<ProviderFamily, Arc<dyn UpstreamExecutor>>,
    ) -> anyhow::Result<Arc<Self>> {
        let events = EventHub::new(256);
        let pool = Arc::new(CredentialPool::new(events.clone()));

        for record in config.static_credentials() {
            store.save(record).await?;
        }
        for record in store.list().await? {
            pool.upsert(record).await;
        }

        let registry = ModelRegistry::build(
            &pool.list().await,
            &config.registry_options(),
        );

        let state = Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            store,
            pool,
            registry: ArcSwap::from_pointee(registry),
            selector: Arc::new(Selector::new()),
            translators: Arc::new(TranslatorRegistry::new()),
            executors,
            events,
        });
        state.spawn_store_watcher();
        Ok(state)
    }

    /// Fan the store's change feed into the pool, registry, and selector.
    /// Events arrive in commit order; a lagged receiver falls back to a full
    /// reload.
    fn spawn_store_watcher(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let mut rx = state.store.watch();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent::Saved(record)) => {
                        if record.status != CredentialStatus::Active {
                            state.selector.forget_credential(&record.id);
                        }
                        state.pool.upsert(record).await;
                    }
                    Ok(ChangeEvent::Removed(id)) => {
                        state.selector.forget_credential(&id);
                        state.pool.remove(&id).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "store change feed lagged; reloading");
                        if let Ok(records) = state.store.list().await {
                            for record in records {
                                state.pool.upsert(record).await;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
                state.rebuild_registry().await;
            }
        });
    }

    /// Recompute the model projection from the current pool contents.
    pub async fn rebuild_registry(&self) {
        let records = self.pool.list().await;
        let options = self.config.load().registry_options();
        let registry = ModelRegistry::build(&records, &options);
        self.registry.store(Arc::new(registry));
    }
}
