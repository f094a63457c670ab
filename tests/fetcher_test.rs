use paper_aggregator::types::{AggregatorError, FetchConfig, SourceConfig, SourceKind};
use paper_aggregator::Fetcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> FetchConfig {
    FetchConfig {
        user_agent: "paper-aggregator-test/0.1".to_string(),
        timeout_seconds: 5,
        max_retries: 2,
        retry_delay_ms: 10,
        max_concurrent_fetches: 4,
        min_host_interval_ms: 0,
        max_payload_bytes: 1024 * 1024,
    }
}

fn source(name: &str, endpoint: String) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind: SourceKind::RssAtom,
        endpoint,
        category_hints: Default::default(),
        poll_interval_secs: 0,
    }
}

const FEED_BODY: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
    <title>Test Journal</title>
    <item><title>A Paper</title><link>https://j.example/1</link></item>
</channel></rss>"#;

#[tokio::test]
async fn transient_failure_is_retried_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let payload = fetcher
        .fetch_source(&source("flaky", format!("{}/feed.xml", server.uri())))
        .await
        .unwrap();
    assert!(payload.body.contains("Test Journal"));
    assert_eq!(payload.source_name, "flaky");
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher
        .fetch_source(&source("gone", format!("{}/gone.xml", server.uri())))
        .await;

    assert!(matches!(
        result,
        Err(AggregatorError::FetchPermanent { ref source_name, .. }) if source_name == "gone"
    ));
    // The mock's expect(1) verifies on drop that no retry happened.
}

#[tokio::test]
async fn retries_exhaust_into_transient_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down.xml"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // initial attempt + max_retries
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher
        .fetch_source(&source("down", format!("{}/down.xml", server.uri())))
        .await;

    assert!(matches!(result, Err(ref e) if e.is_transient()));
}

#[tokio::test]
async fn politeness_wait_does_not_hold_an_in_flight_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.max_concurrent_fetches = 1;
    config.min_host_interval_ms = 600;
    let fetcher = Arc::new(Fetcher::new(config).unwrap());

    // Same mock, two host names, so the per-host spacing only binds the first.
    let by_ip = format!("{}/feed.xml", server.uri());
    let by_name = format!("{}/feed.xml", server.uri().replace("127.0.0.1", "localhost"));

    // Prime the host slot, then start a second fetch that has to wait it out.
    fetcher.fetch_source(&source("first", by_ip.clone())).await.unwrap();
    let waiting = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch_source(&source("second", by_ip)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The other host gets the single slot while that fetch is still sleeping.
    let started = Instant::now();
    fetcher.fetch_source(&source("other-host", by_name)).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));

    waiting.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let server = MockServer::start().await;

    let mut config = test_config();
    config.max_payload_bytes = 64;
    Mock::given(method("GET"))
        .and(path("/big.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(1000)))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(config).unwrap();
    let result = fetcher
        .fetch_source(&source("big", format!("{}/big.xml", server.uri())))
        .await;

    assert!(matches!(result, Err(AggregatorError::FetchPermanent { .. })));
}
