use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use socketioxide::SocketIo;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use bracketd::api::{self, AppState};
use bracketd::advance::Advancer;
use bracketd::events::EventBus;
use bracketd::presence::{PresenceTracker, ONLINE_WINDOW_SECS};
use bracketd::reconcile::Reconciler;
use bracketd::store::PgDatabase;
use bracketd::AppError;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        panic!("Error trying to run the server: {}", e);
    }
}

async fn run() -> Result<(), AppError> {
    // Load the .env file only in the development environment (bypassed with the --release flag)
    #[cfg(debug_assertions)]
    dotenv::dotenv().ok();

    setup_tracing()?;

    let admin_key =
        std::env::var("ADMIN_KEY").expect("Expected ADMIN_KEY as an environment variable");
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

    let db = Arc::new(PgDatabase::connect().await?);
    db.migrate().await?;

    let events = EventBus::default();
    let presence = Arc::new(PresenceTracker::new());
    let state = AppState {
        db,
        reconciler: Arc::new(Reconciler::new()),
        advancer: Arc::new(Advancer::new()),
        presence: presence.clone(),
        events: events.clone(),
        admin_key,
    };

    let (socket_layer, io) = SocketIo::new_layer();
    api::register_presence(&io, presence.clone());
    api::spawn_event_forwarder(io, &events);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(ONLINE_WINDOW_SECS as u64));
        loop {
            ticker.tick().await;
            presence.sweep().await;
        }
    });

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(CorsLayer::permissive())
            .layer(socket_layer),
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Sets up the tracing subscriber for the server.
fn setup_tracing() -> Result<(), AppError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("bracketd=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("debug.log")?;

    // Set up tracing with a filter that only logs errors in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
