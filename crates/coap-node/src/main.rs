use std::path::PathBuf;

use clap::Parser;

use coap_node::{Node, NodeConfig};

#[derive(Parser)]
#[command(name = "coap-node", about = "CoAP server node over UDP")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/coap-node/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    // Initialize logging
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        coap_node::logging::init_json(&config.logging.level);
    } else {
        coap_node::logging::init(&config.logging.level);
    }

    let mut node = match Node::new(config) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("failed to build node: {e}");
            std::process::exit(1);
        }
    };
    let handle = node.shutdown_handle();

    // Spawn signal handler
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    if let Err(e) = node.start().await {
        tracing::error!("failed to start node: {e}");
        std::process::exit(1);
    }

    node.run().await;
    node.shutdown().await;
}
