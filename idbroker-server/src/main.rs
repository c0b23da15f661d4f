use std::path::PathBuf;

use idbroker_server::config::ServerConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logger - reads RUST_LOG environment variable
    // Examples: RUST_LOG=info, RUST_LOG=debug, RUST_LOG=idbroker_server=debug
    // Defaults to info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::var("IDBROKER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));
    let config = ServerConfig::from_toml_file(&config_path)?;
    let port = config.port;

    let app_state = idbroker_server::build_state(config).await?;
    log::info!("signing key provisioned, starting server");

    idbroker_server::spawn_key_rotator(app_state.clone());
    idbroker_server::spawn_garbage_collector(app_state.clone());

    let app = idbroker_server::api::router().with_state(app_state);

    let ip_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&ip_addr).await?;

    log::info!("Starting server on {ip_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
