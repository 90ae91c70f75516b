use crate::{config::ServerConfig, repository::JsonAlertRepository, telegram::TelegramNotifier};
use std::sync::Arc;
use tidehunter_data::{
    Tidehunter,
    exchange::binance::BinanceSpot,
    notify::{LogNotifier, NotificationSink, Notifier},
};
use tracing::{error, info, warn};

mod config;
mod repository;
mod telegram;

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();
    init_logging(config.log_json);

    // tokio-tungstenite & reqwest share rustls, which needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!(?config, "starting tidehunter");

    let notifier: Arc<dyn Notifier> = match config.telegram.clone() {
        Some(telegram) => Arc::new(TelegramNotifier::new(telegram)),
        None => {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID unset, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let (sink, notify_worker) = NotificationSink::spawn(notifier, config.engine.notify_retry);

    let mut binance = BinanceSpot::new();
    if let Some(url) = &config.binance_rest_url {
        binance = binance.with_rest_url(url);
    }
    if let Some(url) = &config.binance_ws_url {
        binance = binance.with_ws_url(url);
    }

    let engine = Arc::new(Tidehunter::new(config.engine, sink).with_exchange(Arc::new(binance)));

    let repository = JsonAlertRepository::new(&config.alerts_path);
    if let Err(error) = engine.load_from(&repository).await {
        error!(
            ?error,
            path = %config.alerts_path.display(),
            "failed to load stored alerts, starting empty"
        );
    }

    let handles = engine.start();
    info!("\n{}", engine.stats_message());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(error) => error!(?error, "failed to listen for shutdown signal"),
    }

    info!("\n{}", engine.stats_message());
    engine.shutdown(&handles);
    notify_worker.abort();
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
