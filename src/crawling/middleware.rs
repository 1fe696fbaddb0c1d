//! Per-job middleware pipeline.
//!
//! Request middlewares run after the page exists but before navigation;
//! response middlewares run after a successful navigation and additionally
//! see the navigation response. In both phases the first rejection aborts
//! the job with its reason. Middlewares never touch the frontier.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chromiumoxide::page::Page;
use tracing::info;

use crate::infrastructure::browser::NavigationResponse;
use crate::infrastructure::robots::{RobotsCache, RobotsOptions};

/// Runs before the URL is requested.
#[async_trait]
pub trait RequestMiddleware: Send + Sync {
    async fn process(&self, url: &str, page: &Page) -> Result<()>;
}

/// Runs after the URL was requested.
#[async_trait]
pub trait ResponseMiddleware: Send + Sync {
    async fn process(&self, url: &str, page: &Page, response: &NavigationResponse) -> Result<()>;
}

/// Rejects jobs the host's robots.txt forbids for our live user agent.
pub struct RobotsMiddleware {
    robots: RobotsCache,
}

impl RobotsMiddleware {
    pub fn new(opts: RobotsOptions) -> Self {
        Self {
            robots: RobotsCache::new(opts),
        }
    }
}

#[async_trait]
impl RequestMiddleware for RobotsMiddleware {
    async fn process(&self, url: &str, page: &Page) -> Result<()> {
        // The user agent the site will see is whatever the stealth browser
        // serves, so read it from the page itself.
        let user_agent = match page.evaluate("navigator.userAgent").await {
            Ok(result) => match result.into_value::<String>() {
                Ok(user_agent) => user_agent,
                Err(_) => return Ok(()),
            },
            // If the user agent can't be read, let the request pass.
            Err(_) => return Ok(()),
        };

        if !self.robots.is_allowed(url, &user_agent).await {
            bail!("forbidden by robots.txt");
        }
        Ok(())
    }
}

/// Logs every completed navigation.
pub struct LogMiddleware;

#[async_trait]
impl ResponseMiddleware for LogMiddleware {
    async fn process(&self, url: &str, _page: &Page, response: &NavigationResponse) -> Result<()> {
        info!(status = response.status, "{url}");
        Ok(())
    }
}

const CAPTCHA_VISIBLE_JS: &str = r#"
(() => {
    const el = document.querySelector('input#captchacharacters, div#challenge-container');
    return el !== null && el.offsetParent !== null;
})()
"#;

/// Rejects pages that replaced the content with a captcha challenge.
pub struct CaptchaMiddleware;

#[async_trait]
impl ResponseMiddleware for CaptchaMiddleware {
    async fn process(&self, _url: &str, page: &Page, _response: &NavigationResponse) -> Result<()> {
        if evaluate_flag(page, CAPTCHA_VISIBLE_JS).await {
            bail!("blocked with captcha");
        }
        Ok(())
    }
}

const JS_DISABLED_JS: &str = r#"
(() => Array.from(document.querySelectorAll('noscript'))
    .some((el) => (el.textContent || '').toLowerCase().includes('javascript is disabled')))()
"#;

/// Rejects pages served in the "javascript is disabled" degraded mode.
pub struct JsDisabledMiddleware;

#[async_trait]
impl ResponseMiddleware for JsDisabledMiddleware {
    async fn process(&self, _url: &str, page: &Page, _response: &NavigationResponse) -> Result<()> {
        if evaluate_flag(page, JS_DISABLED_JS).await {
            bail!("js is disabled");
        }
        Ok(())
    }
}

/// Evaluates a boolean page expression; evaluation failures count as false
/// so detector errors never reject a job on their own.
async fn evaluate_flag(page: &Page, expression: &str) -> bool {
    match page.evaluate(expression).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}
