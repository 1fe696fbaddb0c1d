use std::process;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use amazon_crawler::crawling::{Crawler, CrawlerOptions};
use amazon_crawler::infrastructure::sink::SearchIndexOptions;
use amazon_crawler::infrastructure::{
    logging, Config, Frontier, PgFrontier, SearchIndexSink, Sink, StdoutSink,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = logging::init(&config.log_level) {
        eprintln!("failed to initialize logging: {err}");
        process::exit(1);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let sink = match build_sink(&config).await {
        Ok(sink) => sink,
        Err(err) => {
            error!("failed to create sink: {err:#}");
            process::exit(1);
        }
    };

    let frontier: Arc<dyn Frontier> = match PgFrontier::connect(&config.postgres_url).await {
        Ok(frontier) => Arc::new(frontier),
        Err(err) => {
            error!("failed to create postgres frontier: {err:#}");
            process::exit(1);
        }
    };

    let crawler = match Crawler::start(CrawlerOptions {
        frontier: Arc::clone(&frontier),
        sink: Arc::clone(&sink),
        seed_urls: config.seed_urls.clone(),
        poll_interval: config.poll_interval,
        proxy: config.proxy.clone(),
        proxy_username: config.proxy_username.clone(),
        proxy_password: config.proxy_password.clone(),
        browser_command: config.browser_command.clone(),
        browser_port: config.browser_port,
        browser_ws_path: config.browser_ws_path.clone(),
        cancel: cancel.clone(),
    })
    .await
    {
        Ok(crawler) => crawler,
        Err(err) => {
            error!("failed to create crawler: {err:#}");
            process::exit(1);
        }
    };

    if let Err(err) = crawler.run().await {
        error!("exited with error: {err:#}");
    }

    crawler.close().await;
    sink.close().await;
    frontier.close().await;
}

async fn build_sink(config: &Config) -> Result<Arc<dyn Sink>> {
    if config.sink_addresses.is_empty() {
        info!("printing crawled products to stdout");
        return Ok(Arc::new(StdoutSink));
    }

    let sink = SearchIndexSink::connect(SearchIndexOptions {
        addresses: config.sink_addresses.clone(),
        username: config.sink_username.clone(),
        password: config.sink_password.clone(),
    })
    .await?;
    Ok(Arc::new(sink))
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
