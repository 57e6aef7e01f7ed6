use serde::Deserialize;
use snapfeed_common::{
    model::{
        post::LikePolicy,
        user::{InvalidUserNameError, User, UserName},
    },
    snowflake::{ProcessId, WorkerId},
};
use snapfeed_db::{
    DbError, Store,
    client::DbClient,
    memory::{IssueTokenError, MemoryDb},
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;
mod service;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("DATABASE_URL must be set when STORAGE is postgres")]
    MissingDatabaseUrl,
    #[error("Error setting up storage: {0}")]
    Db(#[from] DbError),
    #[error("Invalid seed user name: {0}")]
    SeedUserName(#[from] InvalidUserNameError),
    #[error("Error issuing seed token: {0}")]
    SeedToken(#[from] IssueTokenError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default)]
    storage: StorageBackend,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
    #[serde(default)]
    like_policy: LikePolicy,
    #[serde(default)]
    memory_seed_users: Vec<String>,
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snapfeed_api=debug,\
                snapfeed_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

/// Creates the configured users in a fresh in-memory store. All of them
/// follow each other and their tokens are logged, so the API can be tried
/// out without a database.
fn seed_memory(db: &MemoryDb, names: &[String]) -> Result<(), InitError> {
    let users = names
        .iter()
        .map(|name| Ok(db.insert_user(UserName::new(name.clone())?)?))
        .collect::<Result<Vec<User>, InitError>>()?;

    for follower in &users {
        for followee in users.iter().filter(|user| user.id != follower.id) {
            db.follow(follower.id, followee.id)?;
        }
    }

    for user in &users {
        let token = db.issue_token(user.id, None)?;
        info!(user_id = %user.id, name = user.name.get(), token = token.as_token_str(), "Seeded user");
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(err) => {
                warn!(%err, "Could not install SIGTERM handler");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(%err, "Could not listen for ctrl-c");
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "Could not listen for ctrl-c");
            return;
        }
    }

    info!("Shutdown requested");
    shutdown.cancel();
}

async fn serve<S: Store>(store: Arc<S>, env: &Env) -> Result<(), InitError> {
    let state = server::ServerState::new(store, env.like_policy);
    let app = server::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, like_policy = ?env.like_policy, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    match env.storage {
        StorageBackend::Postgres => {
            let database_url = env
                .database_url
                .as_deref()
                .ok_or(InitError::MissingDatabaseUrl)?;
            let db = Arc::new(
                DbClient::connect(
                    database_url,
                    env.database_max_connections,
                    env.worker_id,
                    env.process_id,
                )
                .await?,
            );
            db.migrate().await?;

            let served = serve(Arc::clone(&db), &env).await;
            db.close().await;
            served
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, nothing will be persisted");
            let db = Arc::new(MemoryDb::new(env.worker_id, env.process_id));
            seed_memory(&db, &env.memory_seed_users)?;

            serve(db, &env).await
        }
    }
}
