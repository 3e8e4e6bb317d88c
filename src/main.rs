use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use classroom_signaling::api;
use classroom_signaling::collaborators::{self, DirectoryAuthorizer};
use classroom_signaling::{ClassroomServer, Config, Result};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Classroom signaling server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;

    let directory = collaborators::load_directory(&config.collaborators)?;
    let authorizer = Arc::new(DirectoryAuthorizer::from_directory(&directory));
    let events = collaborators::event_queue_from_config(&config.collaborators)?;

    let server = Arc::new(ClassroomServer::new(
        config.classroom.clone(),
        authorizer,
        events.clone(),
    ));
    for session in directory.sessions {
        if let Err(e) = server.register_session(session) {
            tracing::warn!(error = %e, "Skipping session from directory");
        }
    }

    let monitor = server.clone().start_heartbeat_monitor();
    let routes = api::routes(server, config.ice.clone());

    let address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Classroom signaling server listening"
    );

    let (_, serving) = warp::serve(routes).bind_with_graceful_shutdown(address, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    });
    serving.await;

    tracing::info!("Shutting down");
    monitor.abort();
    events.flush().await;
    Ok(())
}
