//! Stream one market and log best prices as snapshots arrive.
//!
//! Usage:
//!   BETFAIR_SESSION_TOKEN=... cargo run --example stream_market -- config.json 1.23456789
//!
//! The config file holds the application key and the client certificate
//! paths; the session token comes from a prior login and is usually passed
//! through the environment.

use betfair_stream::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.json".to_string());
    let market_id = args.next().ok_or("usage: stream_market <config.json> <market id>")?;

    // File values can be overridden with BETFAIR_* variables
    let config = ExchangeConfig::load(&config_path)?;
    let session_token = config
        .session_token
        .clone()
        .ok_or("set BETFAIR_SESSION_TOKEN or session_token in the config file")?;
    let mut client = BetfairStreamClient::from_config(&config, StreamConfig::default())?;
    tracing::info!("Connecting to {}", client.endpoint());

    let mut outputs = client.start(&session_token).await?;
    let id = client
        .subscribe_to_markets(MarketFilter::markets([market_id]), MarketDataFilter::default())
        .await?;
    tracing::info!("Subscription {} sent", id);

    loop {
        tokio::select! {
            Some(book) = outputs.market_updates.recv() => {
                for runner in &book.runners {
                    let back = runner.ex.best_back();
                    let lay = runner.ex.best_lay();
                    tracing::info!(
                        "{} pt={} runner {}: back {:?} lay {:?} ltp {}",
                        book.market_id,
                        book.publish_time,
                        runner.selection_id,
                        back.map(|l| (l.price, l.size)),
                        lay.map(|l| (l.price, l.size)),
                        runner.last_price_traded,
                    );
                }
            }
            Some(response) = outputs.subscriptions.recv() => {
                tracing::info!("Subscribed to {:?}", response.subscribed_market_ids);
            }
            Some(status) = outputs.status.recv() => {
                tracing::info!("Status: {:?}", status);
            }
            Some(error) = outputs.errors.recv() => {
                tracing::error!("Stream error: {}", error);
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    client.stop();
    Ok(())
}
