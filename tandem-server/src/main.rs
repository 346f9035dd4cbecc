mod config;

use log::{error, info, warn};
use tandem_collab::{ServerConfig, SyncServer};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Tandem sync server...");

    let config = config::load().unwrap_or_else(|_| {
        warn!("Using default configuration");
        ServerConfig::default()
    });
    if config.allow_external {
        warn!("External connections are allowed");
    }

    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Server on {} stopped: {e}", server.bind_addr());
        std::process::exit(1);
    }
}
