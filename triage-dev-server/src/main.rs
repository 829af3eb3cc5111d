use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use triage_dev_server::{AppState, build_router};
use triage_flow::{InMemoryBackend, Role};

/// `PORT` when set, 5000 otherwise.
fn listen_port(raw: Option<String>) -> anyhow::Result<u16> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{raw}'")),
        None => Ok(5000),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let port = listen_port(std::env::var("PORT").ok())?;

    let backend = Arc::new(InMemoryBackend::new());
    if std::env::var("TRIAGE_SEED_DEMO").is_ok() {
        for (name, role) in [("Demo Patient", Role::Patient), ("Demo Doctor", Role::Doctor)] {
            let identity = backend.register(name, role).await?;
            info!(user_id = %identity.id, %role, "Seeded demo account (password \"secret\")");
        }
    }

    let app = build_router(AppState::new(backend));
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let addr = listener.local_addr()?;

    info!("Triage dev server listening on {}", addr);
    info!("API root: http://{}/api", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
