//! Product sinks.
//!
//! A sink receives extracted product records. Delivery is at-least-once; the
//! receiving system deduplicates by ASIN (the search index uses it as the
//! document id). Two variants ship: a console sink printing one JSON
//! document per line, and a search-index sink batching records into bulk
//! requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::product::Product;

/// Destination for extracted product records.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Accepts a record. Implementations may buffer; the call must not block
    /// on the external system beyond enqueueing.
    async fn consume(&self, product: Product) -> Result<()>;

    /// Flushes whatever is buffered and releases resources.
    async fn close(&self);
}

/// Prints each record to stdout as a single JSON line.
pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    async fn consume(&self, product: Product) -> Result<()> {
        let line = serde_json::to_string(&product).context("serializing product")?;
        println!("{line}");
        Ok(())
    }

    async fn close(&self) {}
}

const INDEX_NAME: &str = "amzn-products";
const FLUSH_SIZE: usize = 10;
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

const INDEX_MAPPINGS: &str = r#"{
    "mappings": {
        "properties": {
            "asin":                     { "type": "keyword" },
            "title":                    { "type": "text" },
            "description":              { "type": "text" },
            "aboutItem":                { "type": "text" },
            "brand":                    { "type": "keyword" },
            "manufacturer":             { "type": "keyword" },
            "ageRange":                 { "type": "keyword" },
            "weight":                   { "type": "text" },
            "material":                 { "type": "text" },
            "color":                    { "type": "text" },
            "origin":                   { "type": "keyword" },
            "dimensions":               { "type": "text" },
            "sustainabilityFeatures":   { "type": "keyword" },
            "averageRating":            { "type": "float" },
            "ratings":                  { "type": "integer" },
            "isAmazonChoice":           { "type": "boolean" },
            "images":                   { "type": "keyword" },
            "boughtTogetherAsins":      { "type": "keyword" },
            "categories":               { "type": "keyword" },
            "listPrice":                { "type": "float" },
            "discountedPrice":          { "type": "float" },
            "currency":                 { "type": "keyword" },
            "sellerId":                 { "type": "keyword" },
            "firstAvailableAt":         { "type": "date" },
            "boughtPastMonth":          { "type": "integer" },
            "bestSellers": {
                "properties": {
                    "category":         { "type": "keyword" },
                    "rank":             { "type": "integer" }
                }
            }
        }
    }
}"#;

#[derive(Debug, Clone, Default)]
pub struct SearchIndexOptions {
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone)]
struct IndexClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl IndexClient {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.request(
            method,
            format!("{}/{}", self.base_url.trim_end_matches('/'), path),
        );
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        request
    }
}

/// Buffered sink over an OpenSearch-compatible bulk API.
///
/// Records accumulate until [`FLUSH_SIZE`] is reached or the background
/// ticker fires, then go out in one `_bulk` request with the ASIN as `_id`.
/// A crash can lose at most one flush interval of buffered records.
pub struct SearchIndexSink {
    client: IndexClient,
    buffer: Arc<Mutex<Vec<Product>>>,
    flush_task: JoinHandle<()>,
}

impl SearchIndexSink {
    /// Connects, verifies the cluster is reachable, creates the product
    /// index when missing and starts the background flush ticker.
    pub async fn connect(opts: SearchIndexOptions) -> Result<Self> {
        let Some(base_url) = opts.addresses.first().cloned() else {
            bail!("no sink addresses configured");
        };
        info!(addresses = ?opts.addresses, "initializing search-index sink");

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .context("building sink http client")?;

        let client = IndexClient {
            http,
            base_url,
            username: opts.username,
            password: opts.password,
        };

        client
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .context("search index is not reachable")?
            .error_for_status()
            .context("search index ping failed")?;

        ensure_index(&client).await?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let flush_task = start_flush_ticker(client.clone(), Arc::clone(&buffer));

        Ok(Self {
            client,
            buffer,
            flush_task,
        })
    }
}

#[async_trait]
impl Sink for SearchIndexSink {
    async fn consume(&self, product: Product) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(product);
            buffer.len() >= FLUSH_SIZE
        };

        if should_flush {
            flush(&self.client, &self.buffer).await;
        }
        Ok(())
    }

    async fn close(&self) {
        info!("closing sink, flushing buffered products");
        self.flush_task.abort();
        flush(&self.client, &self.buffer).await;
    }
}

async fn ensure_index(client: &IndexClient) -> Result<()> {
    let exists = client
        .request(reqwest::Method::HEAD, INDEX_NAME)
        .send()
        .await
        .context("checking product index")?
        .status()
        .is_success();

    if exists {
        info!(index = INDEX_NAME, "product index exists");
        return Ok(());
    }

    info!(index = INDEX_NAME, "creating product index");
    client
        .request(reqwest::Method::PUT, INDEX_NAME)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(INDEX_MAPPINGS)
        .send()
        .await
        .context("creating product index")?
        .error_for_status()
        .context("product index creation rejected")?;
    Ok(())
}

fn start_flush_ticker(client: IndexClient, buffer: Arc<Mutex<Vec<Product>>>) -> JoinHandle<()> {
    info!("flushing sink every {FLUSH_INTERVAL:?}");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            flush(&client, &buffer).await;
        }
    })
}

async fn flush(client: &IndexClient, buffer: &Mutex<Vec<Product>>) {
    let products = {
        let mut buffer = buffer.lock().await;
        std::mem::take(&mut *buffer)
    };
    if products.is_empty() {
        return;
    }

    let body = bulk_body(&products);
    info!(products = products.len(), "performing bulk request");

    let result = client
        .request(reqwest::Method::POST, "_bulk")
        .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) => {
            if !response.status().is_success() {
                warn!(status = response.status().as_u16(), "bulk request rejected");
                return;
            }
            match response.json::<serde_json::Value>().await {
                Ok(body) if body["errors"].as_bool() == Some(true) => {
                    warn!("got error items on bulk request");
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "reading bulk response"),
            }
        }
        Err(err) => warn!(%err, "failed to perform bulk request"),
    }
}

/// Builds the NDJSON `_bulk` payload: one action line and one document line
/// per product, indexed by ASIN.
fn bulk_body(products: &[Product]) -> String {
    let mut body = String::new();
    for product in products {
        let meta = serde_json::json!({
            "index": { "_index": INDEX_NAME, "_id": product.asin }
        });
        let Ok(doc) = serde_json::to_string(product) else {
            debug!(asin = %product.asin, "failed to serialize product");
            continue;
        };
        body.push_str(&meta.to_string());
        body.push('\n');
        body.push_str(&doc);
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(asin: &str) -> Product {
        Product {
            asin: asin.to_string(),
            title: "Laminator".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn bulk_body_pairs_action_and_document_lines() {
        let body = bulk_body(&[product("B0D6PQDNQS"), product("B07984JN3L")]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], INDEX_NAME);
        assert_eq!(action["index"]["_id"], "B0D6PQDNQS");

        let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["asin"], "B0D6PQDNQS");
        assert_eq!(doc["title"], "Laminator");
    }

    #[test]
    fn bulk_body_ends_with_newline() {
        // The bulk API requires a trailing newline after the last line.
        let body = bulk_body(&[product("B0D6PQDNQS")]);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn index_mappings_are_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(INDEX_MAPPINGS).unwrap();
        assert!(parsed["mappings"]["properties"]["asin"].is_object());
        assert_eq!(
            parsed["mappings"]["properties"]["sustainabilityFeatures"]["type"],
            "keyword"
        );
    }
}
