//! Frontier integration tests against a real Postgres.
//!
//! These exercise the lease contract: dedup on insert, exclusive leases
//! under concurrency, TTL reclamation of dead workers' rows, and the
//! failure backoff schedule. They need a database and skip themselves when
//! `TEST_POSTGRES_URL` is not set. Point the variable at a throwaway
//! database: every test truncates `url_queue`.

use once_cell::sync::Lazy;
use sqlx::PgPool;
use tokio::sync::Mutex;

use amazon_crawler::infrastructure::frontier::{Frontier, PgFrontier, UrlStatus};

// The tests share one table, so they run one at a time.
static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

async fn setup() -> Option<(PgFrontier, PgPool)> {
    let url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) if !url.is_empty() => url,
        _ => {
            eprintln!("skipping: TEST_POSTGRES_URL not set");
            return None;
        }
    };

    let frontier = PgFrontier::connect(&url)
        .await
        .expect("connect test frontier");
    let pool = PgPool::connect(&url).await.expect("connect test pool");
    sqlx::query("TRUNCATE url_queue")
        .execute(&pool)
        .await
        .expect("truncate url_queue");

    Some((frontier, pool))
}

async fn backdate(pool: &PgPool, column: &str, url: &str, interval: &str) {
    let sql = format!("UPDATE url_queue SET {column} = now() - interval '{interval}' WHERE url = $1");
    sqlx::query(&sql)
        .bind(url)
        .execute(pool)
        .await
        .expect("backdate row");
}

#[tokio::test]
async fn duplicate_urls_collapse_onto_one_row() {
    let _guard = DB_LOCK.lock().await;
    let Some((frontier, pool)) = setup().await else {
        return;
    };

    let u = "https://amazon.com/s?k=lego".to_string();
    let u2 = "https://amazon.com/dp/B0D6PQDNQS".to_string();
    frontier
        .add_urls(&[u.clone(), u.clone(), u2.clone()])
        .await
        .unwrap();
    frontier.add_urls(&[u.clone()]).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM url_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(frontier.queue_size().await.unwrap(), 2);

    // empty input is a no-op success
    frontier.add_urls(&[]).await.unwrap();
}

#[tokio::test]
async fn concurrent_leases_hand_out_distinct_urls() {
    let _guard = DB_LOCK.lock().await;
    let Some((frontier, _pool)) = setup().await else {
        return;
    };

    let u = "https://amazon.com/s?k=ipad".to_string();
    frontier.add_urls(&[u.clone()]).await.unwrap();

    let (a, b) = tokio::join!(frontier.next_url(), frontier.next_url());
    let a = a.unwrap();
    let b = b.unwrap();

    // exactly one caller gets the row, the other sees an empty queue
    let leased: Vec<_> = [&a, &b].into_iter().flatten().collect();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].url, u);
    assert_eq!(leased[0].status, UrlStatus::Processing);

    // the leased row is invisible until it is finished or expires
    assert!(frontier.next_url().await.unwrap().is_none());
}

#[tokio::test]
async fn stale_processing_rows_are_reclaimed() {
    let _guard = DB_LOCK.lock().await;
    let Some((frontier, pool)) = setup().await else {
        return;
    };

    let u = "https://amazon.com/b?node=165793011".to_string();
    frontier.add_urls(&[u.clone()]).await.unwrap();
    assert!(frontier.next_url().await.unwrap().is_some());

    // fresh lease is exclusive
    assert!(frontier.next_url().await.unwrap().is_none());

    // a worker that died mid-job leaves started_at behind; after the TTL the
    // row is leasable again
    backdate(&pool, "started_at", &u, "6 minutes").await;
    let stolen = frontier.next_url().await.unwrap().expect("stale row re-leased");
    assert_eq!(stolen.url, u);
}

#[tokio::test]
async fn failed_rows_come_back_with_exponential_backoff() {
    let _guard = DB_LOCK.lock().await;
    let Some((frontier, pool)) = setup().await else {
        return;
    };

    let u = "https://amazon.com/dp/B07984JN3L".to_string();
    frontier.add_urls(&[u.clone()]).await.unwrap();
    assert!(frontier.next_url().await.unwrap().is_some());

    // first failure: invisible for BASE_BACKOFF
    frontier.mark_failed(&u, "response status 503").await.unwrap();
    assert!(frontier.next_url().await.unwrap().is_none());
    backdate(&pool, "failed_at", &u, "1 minute").await;
    assert!(frontier.next_url().await.unwrap().is_none(), "1min < 5min backoff");
    backdate(&pool, "failed_at", &u, "5 minutes").await;
    assert!(frontier.next_url().await.unwrap().is_some(), "re-leased after backoff");

    // second failure: backoff doubles to 10 minutes
    frontier.mark_failed(&u, "response status 503").await.unwrap();
    backdate(&pool, "failed_at", &u, "6 minutes").await;
    assert!(frontier.next_url().await.unwrap().is_none(), "6min < 10min backoff");
    backdate(&pool, "failed_at", &u, "11 minutes").await;
    assert!(frontier.next_url().await.unwrap().is_some());

    // third failure exhausts the retry budget for good
    frontier.mark_failed(&u, "response status 503").await.unwrap();
    backdate(&pool, "failed_at", &u, "10 years").await;
    assert!(frontier.next_url().await.unwrap().is_none(), "never re-leased");

    let (retry_count, reason): (i32, Option<String>) =
        sqlx::query_as("SELECT retry_count, reason FROM url_queue WHERE url = $1")
            .bind(&u)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(retry_count, 3);
    assert_eq!(reason.as_deref(), Some("response status 503"));
}

#[tokio::test]
async fn done_rows_are_terminal() {
    let _guard = DB_LOCK.lock().await;
    let Some((frontier, pool)) = setup().await else {
        return;
    };

    let u = "https://amazon.com/s?k=headphones".to_string();
    frontier.add_urls(&[u.clone()]).await.unwrap();
    assert!(frontier.next_url().await.unwrap().is_some());
    frontier.mark_done(&u).await.unwrap();

    assert!(frontier.next_url().await.unwrap().is_none());
    assert_eq!(frontier.queue_size().await.unwrap(), 0);

    let (status, done_at): (String, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as("SELECT status, done_at FROM url_queue WHERE url = $1")
            .bind(&u)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "done");
    assert!(done_at.is_some());
}
