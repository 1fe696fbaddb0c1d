//! Crawl engine: worker pool and dispatcher.
//!
//! The dispatcher is the only component leasing URLs from the frontier. It
//! feeds a bounded job channel consumed by a fixed pool of workers, so a
//! stalled pool stalls polling instead of queueing unbounded work in memory;
//! the durable frontier is the only unbounded store. Workers drive the
//! browser through the middleware pipeline, emit product records for detail
//! pages, and publish discovered links back through a bounded channel that a
//! drain task folds into the frontier.
//!
//! Everything observes one shared cancellation token. It is tripped by the
//! process signal handler, by the failure controller, or by the browser
//! subprocess exiting; workers finish their in-flight browser close and
//! exit, the dispatcher stops polling, and `run` returns.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::crawling::extract::{AmazonExtractor, ProductExtractor, RenderedPage};
use crate::crawling::failure::{FailureController, DEFAULT_ERROR_THRESHOLD};
use crate::crawling::middleware::{
    CaptchaMiddleware, JsDisabledMiddleware, LogMiddleware, RequestMiddleware, ResponseMiddleware,
    RobotsMiddleware,
};
use crate::crawling::urls::{asin_from_url, is_relevant_url, product_url, with_base_url};
use crate::infrastructure::browser::{BrowserDriver, BrowserOptions, JobPage};
use crate::infrastructure::frontier::Frontier;
use crate::infrastructure::robots::RobotsOptions;
use crate::infrastructure::sink::Sink;

const NUM_WORKERS: usize = 10;
const JOB_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CrawlerOptions {
    pub frontier: Arc<dyn Frontier>,
    pub sink: Arc<dyn Sink>,
    pub seed_urls: Vec<String>,
    pub poll_interval: Duration,
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub browser_command: Option<String>,
    pub browser_port: u16,
    pub browser_ws_path: String,
    pub cancel: CancellationToken,
}

/// State shared by the dispatcher and every worker.
struct CrawlContext {
    frontier: Arc<dyn Frontier>,
    sink: Arc<dyn Sink>,
    extractor: Box<dyn ProductExtractor>,
    browser: BrowserDriver,
    request_middlewares: Vec<Box<dyn RequestMiddleware>>,
    response_middlewares: Vec<Box<dyn ResponseMiddleware>>,
    failures: FailureController,
    links_tx: mpsc::Sender<Vec<String>>,
    cancel: CancellationToken,
}

pub struct Crawler {
    ctx: Arc<CrawlContext>,
    jobs_tx: flume::Sender<String>,
    jobs_rx: flume::Receiver<String>,
    links_rx: std::sync::Mutex<Option<mpsc::Receiver<Vec<String>>>>,
    seed_urls: Vec<String>,
    poll_interval: Duration,
}

impl Crawler {
    /// Starts the browser and assembles the pipeline. Fails when the browser
    /// subprocess can't be spawned or connected to.
    pub async fn start(opts: CrawlerOptions) -> Result<Self> {
        let browser_opts = BrowserOptions {
            command: opts.browser_command,
            port: opts.browser_port,
            ws_path: opts.browser_ws_path,
            proxy: opts.proxy.clone(),
            proxy_username: opts.proxy_username.clone(),
            proxy_password: opts.proxy_password.clone(),
        };
        let browser = BrowserDriver::start(&browser_opts, opts.cancel.clone()).await?;

        let request_middlewares: Vec<Box<dyn RequestMiddleware>> =
            vec![Box::new(RobotsMiddleware::new(RobotsOptions {
                proxy: opts.proxy,
                proxy_username: opts.proxy_username,
                proxy_password: opts.proxy_password,
            }))];
        let response_middlewares: Vec<Box<dyn ResponseMiddleware>> = vec![
            Box::new(LogMiddleware),
            Box::new(CaptchaMiddleware),
            Box::new(JsDisabledMiddleware),
        ];

        // 2N buffers polled work while all workers are busy
        let (jobs_tx, jobs_rx) = flume::bounded(NUM_WORKERS * 2);
        // each worker publishes one link set per job
        let (links_tx, links_rx) = mpsc::channel(NUM_WORKERS * 2);

        let ctx = CrawlContext {
            frontier: opts.frontier,
            sink: opts.sink,
            extractor: Box::new(AmazonExtractor::new()?),
            browser,
            request_middlewares,
            response_middlewares,
            failures: FailureController::new(DEFAULT_ERROR_THRESHOLD, opts.cancel.clone()),
            links_tx,
            cancel: opts.cancel,
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            jobs_tx,
            jobs_rx,
            links_rx: std::sync::Mutex::new(Some(links_rx)),
            seed_urls: opts.seed_urls,
            poll_interval: opts.poll_interval,
        })
    }

    /// Runs the crawl until the cancellation token trips: spawns the worker
    /// pool and the link drain, submits the seed URLs, then polls the
    /// frontier at a jittered cadence.
    pub async fn run(&self) -> Result<()> {
        for id in 0..NUM_WORKERS {
            let ctx = Arc::clone(&self.ctx);
            let jobs = self.jobs_rx.clone();
            tokio::spawn(worker(ctx, jobs, id));
        }
        self.start_link_drain()?;

        info!(
            "polling every {:?} for queued urls",
            self.poll_interval
        );
        info!("using {} seed urls", self.seed_urls.len());

        for url in &self.seed_urls {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            self.submit(url.clone()).await;
            self.sleep_with_jitter().await;
        }

        loop {
            if self.ctx.cancel.is_cancelled() {
                info!("polling stopped");
                return Ok(());
            }

            match self.ctx.frontier.next_url().await {
                Ok(Some(queued)) => self.submit(queued.url).await,
                Ok(None) => {}
                Err(err) => error!("{err:#}"),
            }
            self.sleep_with_jitter().await;
        }
    }

    pub async fn close(&self) {
        self.ctx.browser.close().await;
    }

    /// Consumes published link sets and folds them into the frontier.
    /// Insert failures are logged, not retried: the next visit of the source
    /// page rediscovers the same links.
    fn start_link_drain(&self) -> Result<()> {
        let mut links_rx = self
            .links_rx
            .lock()
            .expect("link receiver lock")
            .take()
            .context("crawler is already running")?;

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    links = links_rx.recv() => match links {
                        Some(links) => {
                            if let Err(err) = ctx.frontier.add_urls(&links).await {
                                error!("{err:#}");
                            }
                        }
                        None => break,
                    }
                }
            }
        });
        Ok(())
    }

    /// Hands the URL to the worker pool; blocks when the pool is saturated.
    async fn submit(&self, url: String) {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = self.jobs_tx.send_async(url) => {}
        }
    }

    async fn sleep_with_jitter(&self) {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(jittered(self.poll_interval)) => {}
        }
    }
}

/// Uniform jitter in [0.5 · base, 1.5 · base] keeps the fleet's request
/// cadence from synchronizing.
fn jittered(base: Duration) -> Duration {
    base.mul_f64(0.5 + rand::random::<f64>())
}

async fn worker(ctx: Arc<CrawlContext>, jobs: flume::Receiver<String>, id: usize) {
    info!("created worker {id}, waiting on urls...");
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                info!("worker {id} shutting down");
                return;
            }
            job = jobs.recv_async() => match job {
                Ok(url) => process_job(&ctx, &url).await,
                Err(_) => return,
            }
        }
    }
}

async fn process_job(ctx: &CrawlContext, url: &str) {
    let outcome = tokio::select! {
        // Abandoning the job drops its future; the job page's drop guard
        // closes the browsing context. The lease TTL returns the URL to the
        // frontier.
        _ = ctx.cancel.cancelled() => return,
        outcome = tokio::time::timeout(JOB_TIMEOUT, process_url(ctx, url)) => outcome,
    };

    match outcome {
        Ok(Ok(links)) => {
            ctx.failures.record_success();

            // links are handed over before the row is marked done; add_urls
            // is idempotent so the commit order beyond that doesn't matter
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                _ = ctx.links_tx.send(links) => {}
            }

            if let Err(err) = ctx.frontier.mark_done(url).await {
                error!("mark done error: {err:#}");
            }
        }
        Ok(Err(err)) => on_error(ctx, url, &format!("{err:#}")).await,
        Err(_) => on_error(ctx, url, "job deadline exceeded").await,
    }
}

/// Fetches the URL through a fresh browsing context and returns the
/// discovered relevant links.
async fn process_url(ctx: &CrawlContext, url: &str) -> Result<Vec<String>> {
    let job = ctx.browser.new_job_page().await?;
    let outcome = run_job(ctx, &job, url).await;
    job.close().await;
    outcome
}

async fn run_job(ctx: &CrawlContext, job: &JobPage, url: &str) -> Result<Vec<String>> {
    for middleware in &ctx.request_middlewares {
        middleware.process(url, job.page()).await?;
    }

    let response = job.navigate(url).await?;

    for middleware in &ctx.response_middlewares {
        middleware.process(url, job.page(), &response).await?;
    }

    let html = job.content().await?;

    if url.contains("/dp/") {
        let page = RenderedPage {
            url: url.to_string(),
            html: html.clone(),
        };
        let product = ctx
            .extractor
            .extract(&page)
            .context("failed to parse product")?;
        ctx.sink
            .consume(product)
            .await
            .context("failed to consume product")?;
    }

    Ok(relevant_links(&html))
}

async fn on_error(ctx: &CrawlContext, url: &str, reason: &str) {
    error!(url, "{reason}");
    if let Err(err) = ctx.frontier.mark_failed(url, reason).await {
        error!("{err:#}");
    }
    ctx.failures.record_failure();
}

static ANCHOR_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static PAGINATION_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a.s-pagination-next, a#apb-desktop-browse-search-see-all")
        .expect("valid pagination selector")
});

/// Collects the links worth queueing from a rendered page: product-detail
/// URLs (canonicalized to `/dp/<ASIN>`), search/category pages, and the
/// pagination anchors. Deduplicated within the page.
fn relevant_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    for anchor in doc.select(&ANCHOR_SEL) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        if let Some(asin) = asin_from_url(href) {
            push_unique(&mut links, product_url(&asin));
        }
        if is_relevant_url(href) {
            push_unique(&mut links, with_base_url(href));
        }
    }

    for anchor in doc.select(&PAGINATION_SEL) {
        if let Some(href) = anchor.value().attr("href") {
            push_unique(&mut links, with_base_url(href));
        }
    }

    debug!("found {} relevant links", links.len());
    links
}

fn push_unique(links: &mut Vec<String>, link: String) {
    if !link.is_empty() && !links.contains(&link) {
        links.push(link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_half_base_either_way() {
        let base = Duration::from_secs(6);
        for _ in 0..1000 {
            let delay = jittered(base);
            assert!(delay >= Duration::from_secs(3), "delay {delay:?}");
            assert!(delay <= Duration::from_secs(9), "delay {delay:?}");
        }
    }

    #[test]
    fn link_discovery_canonicalizes_and_deduplicates() {
        let html = r#"<html><body>
            <a href="/Coogam-Educational/dp/B09Q82N7DN?psc=1">product</a>
            <a href="/dp/B09Q82N7DN">same product</a>
            <a href="/s?k=lego&junk=1">search</a>
            <a href="/-/es/s?k=lego">locale search</a>
            <a href="/gp/help/customer">help</a>
            <a class="s-pagination-next" href="/s?k=lego&page=2">next</a>
        </body></html>"#;

        let links = relevant_links(html);
        assert_eq!(
            links,
            vec![
                "https://amazon.com/dp/B09Q82N7DN".to_string(),
                "https://amazon.com/s?k=lego".to_string(),
                "https://amazon.com/s?k=lego&page=2".to_string(),
            ]
        );
    }

    #[test]
    fn see_all_anchor_is_collected() {
        let html = r#"<html><body>
            <a id="apb-desktop-browse-search-see-all" href="/b/ref=SHCC/?node=23528055011">see all</a>
        </body></html>"#;

        assert_eq!(
            relevant_links(html),
            vec!["https://amazon.com/b?node=23528055011".to_string()]
        );
    }

    #[test]
    fn empty_pages_publish_empty_link_sets() {
        assert!(relevant_links("<html><body></body></html>").is_empty());
    }
}
