use std::sync::Arc;
use tracing::{error, info};
use vigil::{config::VigilConfig, error::VigilError, logging, system::SystemBuilder};
use vigil_gateway::{credentials::StaticToken, mock::MockGateway, rest::RestClient};
use vigil_store::Store;

/// Risk-enforcement daemon entry point.
///
/// `vigild <config.json>` supervises the configured accounts until SIGINT or
/// SIGTERM. With `--paper`, the brokerage boundary is the in-memory gateway
/// (no external connections) - useful for drills and local verification.
#[tokio::main]
async fn main() {
    logging::init_logging();

    if let Err(error) = run().await {
        error!(%error, "vigild failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), VigilError> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut paper = false;
    for arg in &mut args {
        match arg.as_str() {
            "--paper" => paper = true,
            path => config_path = Some(path.to_string()),
        }
    }
    let config_path = config_path.ok_or_else(|| {
        VigilError::config("<args>", "usage: vigild [--paper] <config.json>")
    })?;

    let config = VigilConfig::load(&config_path)?;
    info!(
        accounts = config.accounts.len(),
        config = %config_path,
        paper,
        "vigild starting"
    );

    let store = Arc::new(Store::open(&config.store_path)?);

    if paper {
        let gateway = MockGateway::new();
        let system = SystemBuilder::new(
            config,
            gateway.clone(),
            Arc::new(gateway.clone()),
            Arc::new(gateway),
            store,
        )
        .start()
        .await?;

        wait_for_signal().await;
        return system.stop().await;
    }

    // Live mode: REST over HTTP; the realtime hubs plug in behind the
    // UserHub/MarketHub traits. The bundled transport is the paper gateway
    // until a SignalR transport crate is wired in deployment builds.
    let rest_url = config
        .gateway
        .rest_url
        .parse()
        .map_err(|error: url::ParseError| {
            VigilError::config("gateway.rest_url", error.to_string())
        })?;
    let token = std::env::var("VIGIL_GATEWAY_TOKEN").map_err(|_| {
        VigilError::config(
            "gateway",
            "VIGIL_GATEWAY_TOKEN must be set for live mode",
        )
    })?;
    let _rest = RestClient::new(
        rest_url,
        StaticToken::new(token.as_str()),
        std::time::Duration::from_secs(10),
    )?;

    Err(VigilError::config(
        "gateway",
        "no realtime transport configured in this build; run with --paper",
    ))
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => info!("SIGINT received"),
                    _ = term.recv() => info!("SIGTERM received"),
                }
            }
            Err(error) => {
                error!(%error, "failed to install SIGTERM handler, SIGINT only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("shutdown signal received");
    }
}
