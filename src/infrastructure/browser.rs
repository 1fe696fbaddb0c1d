//! Stealth browser driver.
//!
//! Owns the browser subprocess and the WebSocket connection to it. The
//! subprocess is an external stealth browser server (fingerprint/UA
//! spoofing, headless rendering, WebGL) reached at
//! `ws://localhost:<port>/<path>`; if it ever exits, the crawler cannot do
//! useful work, so the monitor task trips the shared cancellation token and
//! the whole process shuts down.
//!
//! Each job gets its own short-lived browsing context with one page.
//! Per-context isolation covers cookies, storage and request interception,
//! and lets the upstream proxy be applied per context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resource types aborted before they leave the browser.
const BLOCKED_RESOURCES: [ResourceType; 6] = [
    ResourceType::Stylesheet,
    ResourceType::Font,
    ResourceType::Media,
    ResourceType::Image,
    ResourceType::Other,
    ResourceType::Xhr,
];

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_secs(2);

// The served user agent is randomized per run so restarts don't present a
// stable fingerprint.
const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0",
    "Mozilla/5.0 (Windows NT 10.0; WOW64; rv:130.0) Gecko/20100101 Firefox/130.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
];

#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    /// Full command line overriding the built-in stealth browser launch.
    pub command: Option<String>,
    pub port: u16,
    pub ws_path: String,
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

/// The navigation outcome handed to response middlewares.
#[derive(Debug, Clone, Copy)]
pub struct NavigationResponse {
    pub status: i64,
}

pub struct BrowserDriver {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    proxy: Option<String>,
}

impl BrowserDriver {
    /// Spawns the browser subprocess and connects to it with backoff.
    ///
    /// The returned driver is ready to hand out job pages. `cancel` is
    /// tripped when the subprocess exits, however it exits.
    pub async fn start(opts: &BrowserOptions, cancel: CancellationToken) -> Result<Self> {
        let user_agent = random_user_agent();
        info!("using User-Agent {user_agent}");

        spawn_browser_process(opts, &user_agent, cancel)?;

        let ws_url = format!("ws://localhost:{}/{}", opts.port, opts.ws_path);
        let (browser, mut handler) = connect_with_backoff(&ws_url).await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(%err, "browser connection event");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler_task,
            proxy: opts.proxy.clone(),
        })
    }

    /// Opens a fresh, isolated browsing context with a single page and
    /// resource blocking installed.
    pub async fn new_job_page(&self) -> Result<JobPage> {
        let mut context_params = CreateBrowserContextParams::default();
        context_params.proxy_server = self.proxy.clone();

        let context_id = self
            .browser
            .execute(context_params)
            .await
            .context("creating browsing context")?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|err| anyhow!("building page target: {err}"))?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(err) => {
                dispose_context(&self.browser, &context_id).await;
                return Err(err).context("opening page");
            }
        };

        let (status_tx, status_rx) = watch::channel(None);
        let intercept_task = match install_interception(&page, status_tx).await {
            Ok(task) => task,
            Err(err) => {
                let _ = page.clone().close().await;
                dispose_context(&self.browser, &context_id).await;
                return Err(err);
            }
        };

        Ok(JobPage {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            status_rx,
            intercept_task,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Closes the browser itself; the subprocess exits in response.
    pub async fn close(&self) {
        use chromiumoxide::cdp::browser_protocol::browser::CloseParams;

        if let Err(err) = self.browser.execute(CloseParams::default()).await {
            debug!(%err, "closing browser");
        }
        self.handler_task.abort();
    }
}

/// One job's browsing context and page.
///
/// Closed exactly once: either explicitly via [`JobPage::close`] (normal and
/// cancelled jobs) or by the drop guard when the job future is abandoned by
/// its timeout.
pub struct JobPage {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    status_rx: watch::Receiver<Option<i64>>,
    intercept_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl JobPage {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigates and waits for the document to settle. Non-2xx statuses are
    /// job errors.
    pub async fn navigate(&self, url: &str) -> Result<NavigationResponse> {
        self.page.goto(url).await.context("navigation failed")?;
        self.page
            .wait_for_navigation()
            .await
            .context("page did not settle")?;

        match *self.status_rx.borrow() {
            Some(status) if (200..300).contains(&status) => Ok(NavigationResponse { status }),
            Some(status) => bail!("response status {status}"),
            None => bail!("no document response received"),
        }
    }

    /// Snapshot of the rendered document.
    pub async fn content(&self) -> Result<String> {
        self.page.content().await.context("reading page content")
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.intercept_task.abort();
        if let Err(err) = self.page.clone().close().await {
            debug!(%err, "closing job page");
        }
        dispose_context(&self.browser, &self.context_id).await;
    }
}

impl Drop for JobPage {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The owning future was dropped (job timeout). Clean up out of band.
        self.intercept_task.abort();
        let page = self.page.clone();
        let browser = Arc::clone(&self.browser);
        let context_id = self.context_id.clone();
        tokio::spawn(async move {
            let _ = page.close().await;
            dispose_context(&browser, &context_id).await;
        });
    }
}

async fn dispose_context(browser: &Browser, context_id: &BrowserContextId) {
    let params = DisposeBrowserContextParams::new(context_id.clone());
    if let Err(err) = browser.execute(params).await {
        debug!(%err, "disposing browsing context");
    }
}

/// Installs Fetch-domain interception on the page: blocked resource types
/// are aborted, everything else continues, and the main document's response
/// status is captured on the way through.
async fn install_interception(
    page: &Page,
    status_tx: watch::Sender<Option<i64>>,
) -> Result<JoinHandle<()>> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("installing request interception")?;

    let intercept_page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request_id = event.request_id.clone();

            if let Some(status) = event.response_status_code {
                // Response stage: only the document pattern pauses here.
                if event.resource_type == ResourceType::Document {
                    let _ = status_tx.send(Some(status));
                }
                let _ = intercept_page
                    .execute(ContinueRequestParams::new(request_id))
                    .await;
            } else if BLOCKED_RESOURCES.contains(&event.resource_type) {
                let _ = intercept_page
                    .execute(FailRequestParams::new(
                        request_id,
                        ErrorReason::BlockedByClient,
                    ))
                    .await;
            } else {
                let _ = intercept_page
                    .execute(ContinueRequestParams::new(request_id))
                    .await;
            }
        }
    });

    let patterns = vec![
        RequestPattern::builder()
            .url_pattern("*")
            .request_stage(RequestStage::Request)
            .build(),
        RequestPattern::builder()
            .url_pattern("*")
            .resource_type(ResourceType::Document)
            .request_stage(RequestStage::Response)
            .build(),
    ];
    page.execute(EnableParams::builder().patterns(patterns).build())
        .await
        .context("enabling request interception")?;

    Ok(task)
}

async fn connect_with_backoff(ws_url: &str) -> Result<(Browser, chromiumoxide::Handler)> {
    let mut delay = CONNECT_INITIAL_DELAY;
    for attempt in 0..CONNECT_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        match Browser::connect(ws_url.to_string()).await {
            Ok(connection) => {
                info!("connected to browser at {ws_url}");
                return Ok(connection);
            }
            Err(err) => debug!(attempt, %err, "browser connect attempt failed"),
        }
    }
    bail!("failed to connect to {ws_url}")
}

/// Starts the stealth browser server and monitors it. The crawler is shut
/// down when the subprocess exits, cleanly or not.
fn spawn_browser_process(
    opts: &BrowserOptions,
    user_agent: &str,
    cancel: CancellationToken,
) -> Result<()> {
    info!("starting stealth browser server");

    let mut command = match &opts.command {
        Some(line) => {
            let mut parts = line.split_whitespace();
            let program = parts.next().context("BROWSER_COMMAND is empty")?;
            let mut command = Command::new(program);
            command.args(parts);
            command
        }
        None => {
            let script = launch_script(opts, user_agent);
            // xvfb gives the headless browser a virtual display so WebGL works
            // inside containers.
            let mut command = Command::new("xvfb-run");
            command.args(["-a", "-e", "/dev/stdout", "python3", "-c", &script]);
            command
        }
    };

    command
        .env("CRAWLER_USER_AGENT", user_agent)
        .env("CRAWLER_BROWSER_PORT", opts.port.to_string())
        .env("CRAWLER_BROWSER_WS_PATH", &opts.ws_path);
    if let Some(proxy) = &opts.proxy {
        info!("using proxy {proxy}");
        command.env("CRAWLER_PROXY", proxy);
    }

    let mut child = command.spawn().context("failed to start stealth browser")?;

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => warn!("browser subprocess exited cleanly"),
            Ok(status) => error!(%status, "browser subprocess exited"),
            Err(err) => error!(%err, "waiting on browser subprocess"),
        }
        // the crawler must not keep polling without a browser
        cancel.cancel();
    });

    Ok(())
}

/// Python launch line for the default stealth browser server.
fn launch_script(opts: &BrowserOptions, user_agent: &str) -> String {
    let proxy_line = match &opts.proxy {
        Some(server) => format!(
            "geoip=True,\n    proxy={{'server': {server:?}, 'username': {user:?}, 'password': {pw:?}}},",
            user = opts.proxy_username.as_deref().unwrap_or(""),
            pw = opts.proxy_password.as_deref().unwrap_or(""),
        ),
        None => String::new(),
    };

    format!(
        r#"
from camoufox.server import launch_server
from browserforge.fingerprints import Screen

launch_server(
    screen=Screen(max_width=1920, max_height=1080),
    headless="virtual",
    os="windows",
    config={{"mediaDevices:enabled": True, "navigator.userAgent": {user_agent:?}}},
    block_images=True,
    locale="en-US",
    port={port},
    ws_path={ws_path:?},
    i_know_what_im_doing=True,
    {proxy_line}
)"#,
        port = opts.port,
        ws_path = opts.ws_path,
    )
}

fn random_user_agent() -> String {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .expect("user agent list is non-empty")
        .to_string()
}
