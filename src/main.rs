use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gameroom::auth::JwtTokenValidator;
use gameroom::cache::{CacheBackend, InMemoryCache, RedisCache};
use gameroom::room::cleanup_task::start_cleanup_task;
use gameroom::room::postgres::PostgresRoomRepository;
use gameroom::room::repository::{InMemoryRoomRepository, RoomRepository};
use gameroom::{
    build_router, AppConfig, AppError, AppState, CacheLockManager, ConnectionHub, EventBus,
    EventDispatcher, HubEventForwarder, PresenceTracker, RoomCacheMirror, RoomService,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gameroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(AppConfig::from_env()).await {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    info!("Starting game room server");
    let config = Arc::new(config);

    let cache: Arc<dyn CacheBackend> = match &config.storage.redis_url {
        Some(url) => {
            info!("Using Redis cache backend");
            Arc::new(RedisCache::connect(url).await?)
        }
        None => {
            warn!("REDIS_URL not set, using in-memory cache");
            Arc::new(InMemoryCache::new())
        }
    };

    let room_repository: Arc<dyn RoomRepository> = match &config.storage.database_url {
        Some(url) => {
            info!("Using Postgres room store");
            let pool = sqlx::PgPool::connect(url)
                .await
                .map_err(|e| AppError::internal(format!("Failed to connect to database: {}", e)))?;
            Arc::new(PostgresRoomRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory room store");
            Arc::new(InMemoryRoomRepository::new())
        }
    };

    let event_bus = EventBus::new(Arc::clone(&cache));
    let room_service = Arc::new(RoomService::new(
        room_repository,
        RoomCacheMirror::new(Arc::clone(&cache), config.room.default_timeout),
        Arc::new(CacheLockManager::new(Arc::clone(&cache))),
        event_bus.clone(),
        config.room.clone(),
        config.events.channel.clone(),
    ));
    let presence = Arc::new(PresenceTracker::new(
        Arc::clone(&cache),
        config.session.timeout,
    ));
    let hub = ConnectionHub::spawn(config.hub.outbound_capacity);

    let mut dispatcher = EventDispatcher::new(event_bus.clone(), config.events.channel.clone());
    dispatcher.add_handler(Arc::new(HubEventForwarder::new(
        Arc::clone(&room_service),
        Arc::new(hub.clone()),
    )));
    let dispatcher_task = dispatcher.start_listening().await?;

    let cleanup = tokio::spawn(start_cleanup_task(
        Arc::clone(&room_service),
        config.room.cleanup_interval,
    ));

    let state = AppState::new(
        room_service,
        presence,
        hub,
        event_bus,
        Arc::new(JwtTokenValidator::new(&config.auth)),
        Arc::clone(&config),
    );
    let app = build_router(state);

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind: {}", e)))?;
    info!(addr = %config.server.bind_addr, "Server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal(e.to_string()));

    cleanup.abort();
    dispatcher_task.abort();
    info!("Server stopped");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
