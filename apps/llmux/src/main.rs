use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use llmux_core::client::UpstreamClientConfig;
use llmux_core::{AccessGate, AppState, Config, Engine, RefreshWorker, WreqUpstreamClient};
use llmux_provider_core::{ProviderFamily, TokenRefresher};
use llmux_store::FileStore;

mod admin_ui;
mod cli;
mod sink;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let text = std::fs::read_to_string(&args.config)
        .map_err(|err| anyhow::anyhow!("reading {}: {err}", args.config))?;
    let mut config = Config::from_yaml(&text)
        .map_err(|err| anyhow::anyhow!("parsing {}: {err}", args.config))?;
    if let Some(listen) = args.listen {
        config.listen_addr = Some(listen);
    }

    let auth_dir = config.auth_dir.clone().unwrap_or_else(|| "auths".to_string());
    let store = Arc::new(FileStore::open(&auth_dir).await?);
    let executors = llmux_provider_impl::build_executors();

    let refreshers: HashMap<ProviderFamily, Arc<dyn TokenRefresher>> = executors
        .iter()
        .filter_map(|(family, executor)| {
            executor.refresher().map(|_| {
                let executor = executor.clone();
                (
                    *family,
                    Arc::new(ExecutorRefresher { executor }) as Arc<dyn TokenRefresher>,
                )
            })
        })
        .collect();

    let bind = config.bind_addr();
    let gate = Arc::new(AccessGate::from_config(&config));
    let proxy_url = config.proxy_url.clone();
    let state = AppState::bootstrap(config, store.clone(), executors).await?;
    state.events.add_sink(Arc::new(sink::LogSink)).await;

    let worker = Arc::new(RefreshWorker::new(
        store,
        refreshers,
        state.events.clone(),
    ));
    worker.spawn();

    let client = Arc::new(WreqUpstreamClient::with_proxy_resolver(
        UpstreamClientConfig {
            proxy: proxy_url.clone(),
            ..Default::default()
        },
        move || proxy_url.clone(),
    )?);
    let engine = Arc::new(Engine::new(state, client));

    let app = axum::Router::new()
        .merge(llmux_router::proxy_router(engine.clone(), gate.clone()))
        .merge(llmux_router::management_router(engine, gate))
        .route("/management.html", axum::routing::get(admin_ui::management_page));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| anyhow::anyhow!("binding {bind}: {err}"))?;
    tracing::info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Adapts an executor's refresher reference into an owned `TokenRefresher`
/// the worker can hold.
struct ExecutorRefresher {
    executor: Arc<dyn llmux_provider_core::UpstreamExecutor>,
}

#[async_trait::async_trait]
impl TokenRefresher for ExecutorRefresher {
    async fn refresh(
        &self,
        record: &llmux_provider_core::CredentialRecord,
    ) -> Result<llmux_provider_core::RefreshedToken, llmux_provider_core::RefreshError> {
        let Some(refresher) = self.executor.refresher() else {
            return Err(llmux_provider_core::RefreshError::Terminal(
                "family has no refresher".to_string(),
            ));
        };
        refresher.refresh(record).await
    }
}
