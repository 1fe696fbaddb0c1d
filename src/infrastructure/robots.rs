//! Per-host robots.txt cache.
//!
//! One instance per crawl process. The cache only ever says "forbidden" when
//! a fetched policy explicitly disallows the path for the given user agent;
//! every failure mode (bad URL, network error, unparsable body) is resolved
//! as allowed, so the crawler keeps making progress.

use std::collections::HashMap;

use robotstxt::DefaultMatcher;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RobotsOptions {
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

/// Memoized robots.txt decisions, keyed by host.
pub struct RobotsCache {
    client: reqwest::Client,
    /// host -> raw robots.txt body ("" means no restrictions).
    policies: RwLock<HashMap<String, String>>,
}

impl RobotsCache {
    pub fn new(opts: RobotsOptions) -> Self {
        let mut builder = reqwest::Client::builder();

        if let Some(server) = &opts.proxy {
            debug!(host = %server, "robots cache using proxy");
            match reqwest::Proxy::all(server) {
                Ok(mut proxy) => {
                    if let (Some(user), Some(pw)) = (&opts.proxy_username, &opts.proxy_password) {
                        proxy = proxy.basic_auth(user, pw);
                    }
                    builder = builder.proxy(proxy);
                }
                Err(err) => warn!(host = %server, %err, "failed to parse proxy"),
            }
        }

        Self {
            client: builder.build().unwrap_or_default(),
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched as `user_agent` according to the host's
    /// robots.txt.
    pub async fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str().map(str::to_string) else {
            return true;
        };

        {
            let policies = self.policies.read().await;
            if let Some(body) = policies.get(&host) {
                return Self::matches(body, url, user_agent);
            }
        }

        let Some(body) = self.fetch_policy(&parsed, &host).await else {
            return true;
        };

        // Concurrent misses may race here; the last fetch wins, which is
        // harmless because the policy content is stable within a run.
        let allowed = Self::matches(&body, url, user_agent);
        self.policies.write().await.insert(host, body);
        allowed
    }

    fn matches(body: &str, url: &str, user_agent: &str) -> bool {
        if body.is_empty() {
            return true;
        }
        DefaultMatcher::default().one_agent_allowed_by_robots(body, user_agent, url)
    }

    /// Fetches the host's robots.txt. Returns `None` when the request itself
    /// failed (the decision then falls back to allowed without caching).
    async fn fetch_policy(&self, url: &url::Url, host: &str) -> Option<String> {
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%robots_url, %err, "reading robots.txt");
                return None;
            }
        };

        let status = response.status();
        info!(%robots_url, status = status.as_u16(), "fetched robots.txt");

        if status.is_success() {
            match response.text().await {
                Ok(body) => Some(body),
                Err(err) => {
                    warn!(%robots_url, %err, "reading robots.txt body");
                    None
                }
            }
        } else {
            // Missing or broken robots.txt imposes no restrictions.
            Some(String::new())
        }
    }
}
