use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitacare_server::api::{build_routes, common};
use vitacare_server::core::scheduler;
use vitacare_server::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    #[arg(short, long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory containing static frontend files (for production)
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let state = if let Some(dir) = args.data_dir {
        AppState::with_data_dir(dir)
            .await
            .expect("Failed to init state")
    } else {
        AppState::new().await.expect("Failed to init state")
    };

    let app_state = Arc::new(state);

    // 后台巡检：把过期窗口的钱包回满，不依赖用户主动读取
    scheduler::start_scheduler(app_state.clone());

    // Add CORS (preflight OPTIONS answered with permissive headers)
    let cors = CorsLayer::permissive();

    let api_routes = build_routes(app_state.clone());

    let app = axum::Router::new()
        .merge(api_routes)
        .layer(cors)
        .layer(axum::middleware::from_fn(common::request_logger));

    // Add static file serving if STATIC_DIR is provided (production mode)
    let app = if let Some(static_dir) = &args.static_dir {
        let index_path = static_dir.join("index.html");
        if static_dir.exists() && index_path.exists() {
            tracing::info!("Serving static files from {:?}", static_dir);
            // ServeDir with fallback to index.html for SPA routing
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_path));
            app.fallback_service(serve_dir)
        } else {
            tracing::warn!("Static directory {:?} or index.html not found", static_dir);
            app
        }
    } else {
        app
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .await
        .unwrap();
}
