use std::sync::Arc;

use log::{error, info};
use smn_file_service::{
    sys_config::core::ServerConfig,
    sys_core::core::run_server,
    sys_fileapi::core::FileApi,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig::from_env()?;
    let api = FileApi::new(&config.api)?;
    info!(
        "serving {} (read-only: {}, allow-delete: {}, max file size: {} bytes)",
        api.root().as_path().display(),
        config.api.read_only,
        config.api.allow_delete,
        api.max_file_size(),
    );

    // Run the server until Ctrl-C.
    run_server(config.addr, Arc::new(api)).await?;
    Ok(())
}
