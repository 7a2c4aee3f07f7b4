use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::RngCore;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chathub::cache::ReplicaCache;
use chathub::connections::service::ConnectionConfigService;
use chathub::connections::store::ConnectionStore;
use chathub::connections::ProviderKind;
use chathub::probe::Prober;
use chathub::secrets::SecretCodec;
use chathub::store::postgres::PgStore;
use chathub::{api, cli, config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chathub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Commands::GenKey) => {
            let mut key = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut key);
            println!("{}", hex::encode(key));
            Ok(())
        }
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        None => run_server(cfg, None).await,
    }
}

async fn run_server(cfg: config::Config, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(cfg.port);

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let mode = cfg.encryption_mode();
    tracing::info!("Secret persistence mode: {:?}", mode);
    let codec = Arc::new(SecretCodec::new(mode, cfg.encryption_key.as_deref())?);

    let redis = match &cfg.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            let client = redis::Client::open(url.as_str())?;
            Some(redis::aio::ConnectionManager::new(client).await?)
        }
        None => {
            tracing::info!("No REDIS_URL set, replica cache runs single-tier");
            None
        }
    };
    let cache = ReplicaCache::new(redis);

    let registry = Arc::new(ConnectionStore::new(Arc::new(db), codec.clone()));
    registry.hydrate().await?;

    let prober = Prober::new(cache.clone(), Duration::from_secs(cfg.probe_timeout_secs));
    let service = ConnectionConfigService::new(
        registry,
        codec,
        cache.clone(),
        prober,
        cfg.allowed_urls(ProviderKind::Openai).to_vec(),
        cfg.allowed_urls(ProviderKind::Ollama).to_vec(),
    );

    let state = Arc::new(AppState {
        service,
        config: cfg,
    });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api/v1", api::api_router())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    // Periodic sweep of locally-expired cache entries.
    {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    tracing::debug!("evicted {} expired cache entries", evicted);
                }
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("chathub listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response so
/// clients can correlate errors with backend logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response. `Cache-Control:
/// no-store` keeps masked descriptors out of intermediary caches.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}
