use relay_backend::{app, init_logging, AppState, Config};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::from_env();
    init_logging(&config.log_file)?;
    for key in &config.invalid_keys {
        warn!(key = %key, "invalid value ignored, using default");
    }

    let addr = config.listen_addr();
    info!(
        %addr,
        log_file = %config.log_file.display(),
        max_players = config.max_players,
        "starting relay server"
    );
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await
}
