use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use trusty_tally::api::{self, AppState};
use trusty_tally::kv::{KvStore, MemoryKv};
use trusty_tally::notify::BroadcastNotifier;
use trusty_tally::tasks::sweeper::sweep_expired_keys_task;
use trusty_tally::{
    BatchProcessor, Collaborators, Config, Database, PollCache, RateLimiter, ResultsAggregator,
    VoteCoordinator,
};

#[tokio::main]
async fn main() {
    // Load .env and initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    // Read configuration from the environment
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    // Initialize database
    let database = match Database::connect(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    // Cache and rate limits share one key-value store
    let store = key_value_store(&config).await;
    let notifier = Arc::new(BroadcastNotifier::default());

    // Wire the coordinator to its collaborators
    let coordinator = VoteCoordinator::new(
        Collaborators {
            polls: database.clone(),
            cache: PollCache::new(Arc::clone(&store), config.poll_cache_ttl),
            limiter: RateLimiter::new(Arc::clone(&store), config.rate_limit),
            ledger: database.clone(),
            results: ResultsAggregator::new(database.clone()),
            notifier,
        },
        config.retry,
    );

    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set, bulk vote import is disabled");
    }

    let state = Arc::new(AppState {
        coordinator,
        batch: BatchProcessor::new(database.clone(), config.batch_chunk_size),
        admin_token: config.admin_token.clone(),
    });

    // Bind and serve until Ctrl+C or SIGTERM
    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };
    info!("Listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
}

#[cfg(feature = "redis-store")]
async fn redis_store(config: &Config) -> Option<Arc<dyn KvStore>> {
    let url = config.redis_url.as_deref()?;
    match trusty_tally::kv::RedisKv::connect(url).await {
        Ok(redis) => {
            info!("Using Redis for the poll cache and rate limits");
            Some(Arc::new(redis))
        }
        Err(e) => {
            warn!("Could not connect to Redis, using in-memory store: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "redis-store"))]
async fn redis_store(config: &Config) -> Option<Arc<dyn KvStore>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but this build has no Redis support, using in-memory store");
    }
    None
}

async fn key_value_store(config: &Config) -> Arc<dyn KvStore> {
    if let Some(store) = redis_store(config).await {
        return store;
    }

    // In-process store, swept in the background
    let memory = Arc::new(MemoryKv::new());
    tokio::spawn(sweep_expired_keys_task(
        Arc::clone(&memory),
        config.sweep_interval,
    ));
    memory
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down");
}
