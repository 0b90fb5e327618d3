use color_eyre::eyre::{Result, WrapErr};
use tcpsim::{SimulatorConfig, TcpSimServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: tcpsim [CONFIG.json]

Without a config file one echo listener is started on 127.0.0.1:8080.
Set RUST_LOG to change verbosity (default: tcpsim=info).";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tcpsim=info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1).map(String::as_str) {
        Some("-h" | "--help") => {
            println!("{USAGE}");
            return Ok(());
        }
        Some(path) => SimulatorConfig::load_from_file(path)
            .wrap_err_with(|| format!("Failed to load config from {path}"))?,
        None => SimulatorConfig::default(),
    };

    info!(
        host_label = %config.host_label,
        bind_host = %config.bind_host,
        listeners = config.listeners.len(),
        "Starting TCP simulator"
    );

    let server = TcpSimServer::new(&config);
    for listener in config.listeners {
        let port = listener.port;
        server
            .add_listener(listener)
            .await
            .wrap_err_with(|| format!("Failed to start listener on port {port}"))?;
    }

    server.run().await.wrap_err("Failed to run TCP simulator")?;
    Ok(())
}
