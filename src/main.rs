use rust_edge_router::config::RouterConfig;
use rust_edge_router::dispatcher::Dispatcher;
use rust_edge_router::listener::Listener;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Rust Edge Router");

    if let Err(e) = run().await {
        error!("fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = RouterConfig::load()?;
    info!(
        "config: listen={}, protocol={:?}, origins={}, availability={}",
        config.listen_addr,
        config.protocol,
        config.origins.all_origins().len(),
        config.availability.name()
    );

    let dispatcher = Arc::new(Dispatcher::from_config(&config));
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    let listener =
        Listener::bind_with_protocol(&config.listen_addr, dispatcher, config.protocol).await?;
    info!("router listening on {}", listener.local_addr());

    let mut router_task = tokio::spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            if let Err(e) = listener.serve(shutdown_rx).await {
                error!("router listener error: {}", e);
            }
        }
    });

    let mut router_finished = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, initiating graceful shutdown");
        }
        res = &mut router_task => {
            router_finished = true;
            match res {
                Ok(()) => info!("router task completed"),
                Err(err) => error!("router task join error: {}", err),
            }
        }
    }

    let _ = shutdown_tx.send(());

    if !router_finished {
        match router_task.await {
            Ok(()) => info!("router task completed"),
            Err(err) => error!("router task join error: {}", err),
        }
    }

    info!("shutdown complete");
    Ok(())
}
