//! Polite, persistent crawler for a large e-commerce catalog.
//!
//! The crate is organized in three layers:
//! - `domain`: the product record emitted to the sink
//! - `infrastructure`: frontier storage, robots cache, browser driver,
//!   sinks, configuration and logging
//! - `crawling`: the crawl control plane (workers, dispatcher, middleware,
//!   link canonicalization, product extraction, failure accounting)

pub mod domain {
    //! Core data carried through the pipeline.
    pub mod product;

    pub use product::{BestSellerRank, Product};
}

pub mod infrastructure {
    //! External collaborators: database, network, browser, sinks.
    pub mod browser;
    pub mod config;
    pub mod frontier;
    pub mod logging;
    pub mod robots;
    pub mod sink;

    pub use config::Config;
    pub use frontier::{Frontier, PgFrontier, QueuedUrl, UrlStatus};
    pub use robots::RobotsCache;
    pub use sink::{SearchIndexSink, Sink, StdoutSink};
}

pub mod crawling {
    //! The crawl control plane.
    pub mod engine;
    pub mod extract;
    pub mod failure;
    pub mod middleware;
    pub mod urls;

    pub use engine::{Crawler, CrawlerOptions};
    pub use extract::{AmazonExtractor, ProductExtractor, RenderedPage};
}
