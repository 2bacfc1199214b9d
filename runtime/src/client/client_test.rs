use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{Client, ClientCache, ClientProvider, DefaultClientProvider};
use crate::config::{DatasourceSettings, HttpMethod};
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::testing::{mock_client, test_query, MockTransport};

const EMPTY_MATRIX: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;

#[tokio::test]
async fn test_query_range_get() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query_range", 200, EMPTY_MATRIX));
    let client = mock_client(transport.clone(), HttpMethod::Get);
    let query = test_query("up", 1664816826, 1664820426, Duration::from_secs(10));

    client
        .query_range(&query, &CancellationToken::new())
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "GET");
    assert_eq!(req.url.path(), "/api/v1/query_range");
    assert_eq!(req.param("query").as_deref(), Some("up"));
    assert_eq!(req.param("start").as_deref(), Some("1664816820"));
    assert_eq!(req.param("end").as_deref(), Some("1664820420"));
    assert_eq!(req.param("step").as_deref(), Some("10"));
    assert_eq!(req.body, "");
}

#[tokio::test]
async fn test_query_range_post() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query_range", 200, EMPTY_MATRIX));
    let client = mock_client(transport.clone(), HttpMethod::Post)
        .with_custom_params(vec![("dedup".to_string(), "false".to_string())]);
    let query = test_query("rate(x[5m])", 1664816826, 1664820426, Duration::from_millis(1500));

    client
        .query_range(&query, &CancellationToken::new())
        .await
        .unwrap();

    let req = &transport.requests()[0];
    assert_eq!(req.method, "POST");
    assert_eq!(
        req.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(req.url.query(), Some("dedup=false"));
    assert_eq!(
        req.body,
        "query=rate%28x%5B5m%5D%29&start=1664816826&end=1664820426&step=1.5"
    );
}

#[tokio::test]
async fn test_query_instant_uses_unaligned_end() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query", 200, EMPTY_MATRIX));
    let client = mock_client(transport.clone(), HttpMethod::Get);
    let query = test_query("up", 1664816826, 1664820426, Duration::from_secs(60));

    client
        .query_instant(&query, &CancellationToken::new())
        .await
        .unwrap();

    let req = &transport.requests()[0];
    assert_eq!(req.url.path(), "/api/v1/query");
    assert_eq!(req.param("time").as_deref(), Some("1664820426"));
    assert_eq!(req.param("step").as_deref(), Some("60"));
    assert_eq!(req.param("start"), None);
}

#[tokio::test]
async fn test_query_exemplars_has_no_step() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query_exemplars", 200, "[]"));
    let client = mock_client(transport.clone(), HttpMethod::Get);
    let query = test_query("up", 1664816826, 1664820426, Duration::from_secs(60));

    client
        .query_exemplars(&query, &CancellationToken::new())
        .await
        .unwrap();

    let req = &transport.requests()[0];
    assert_eq!(req.url.path(), "/api/v1/query_exemplars");
    assert_eq!(req.param("start").as_deref(), Some("1664816820"));
    assert_eq!(req.param("end").as_deref(), Some("1664820420"));
    assert_eq!(req.param("step"), None);
}

#[tokio::test]
async fn test_base_url_with_prefix() {
    let transport = Arc::new(MockTransport::new().route("api/v1/labels", 200, "[]"));
    let base = Url::parse("http://localhost:9090/prometheus/").unwrap();
    let client = Client::new(transport.clone(), base, HttpMethod::Get);
    let params = vec![("match[]".to_string(), "up".to_string())];

    client
        .query_resource(HttpMethod::Get, "/api/v1/labels", &params, &CancellationToken::new())
        .await
        .unwrap();

    let req = &transport.requests()[0];
    assert_eq!(req.url.path(), "/prometheus/api/v1/labels");
    assert_eq!(req.param("match[]").as_deref(), Some("up"));
}

#[tokio::test]
async fn test_bad_request_message() {
    let transport = Arc::new(
        MockTransport::new()
            .route("api/v1/query_range", 400, r#"{"message": "parse error at char 4"}"#)
            .route(
                "api/v1/query",
                422,
                r#"{"status":"error","errorType":"execution","error":"too many samples"}"#,
            )
            .route("api/v1/query_exemplars", 400, "plain failure\n"),
    );
    let client = mock_client(transport, HttpMethod::Post);
    let query = test_query("up", 0, 3600, Duration::from_secs(15));
    let token = CancellationToken::new();

    match client.query_range(&query, &token).await {
        Err(RuntimeError::BadRequest { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "parse error at char 4");
        }
        other => panic!("unexpected result {other:?}"),
    }
    match client.query_instant(&query, &token).await {
        Err(RuntimeError::BadRequest { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "too many samples");
        }
        other => panic!("unexpected result {other:?}"),
    }
    match client.query_exemplars(&query, &token).await {
        Err(RuntimeError::BadRequest { message, .. }) => assert_eq!(message, "plain failure"),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_upstream_status() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query_range", 503, "overloaded"));
    let client = mock_client(transport, HttpMethod::Get);
    let query = test_query("up", 0, 3600, Duration::from_secs(15));

    let err = client
        .query_range(&query, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        RuntimeError::UpstreamStatus { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout() {
    let transport =
        Arc::new(MockTransport::new().slow_route("api/v1/query_range", Duration::from_secs(120)));
    let client = mock_client(transport, HttpMethod::Get).with_timeout(Some(Duration::from_secs(30)));
    let query = test_query("up", 0, 3600, Duration::from_secs(15));

    let err = client
        .query_range(&query, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout(d) if d == Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation() {
    let transport =
        Arc::new(MockTransport::new().slow_route("api/v1/query_range", Duration::from_secs(120)));
    let client = mock_client(transport, HttpMethod::Get);
    let query = test_query("up", 0, 3600, Duration::from_secs(15));
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });
    let err = client.query_range(&query, &token).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
}

struct CountingProvider {
    builds: AtomicUsize,
    fail_first: bool,
}

impl CountingProvider {
    fn new(fail_first: bool) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            fail_first,
        }
    }
}

impl ClientProvider for CountingProvider {
    fn build(&self, _headers: &HashMap<String, String>) -> RuntimeResult<Client> {
        let n = self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && n == 0 {
            return Err(RuntimeError::ClientConstruction("boom".to_string()));
        }
        Ok(mock_client(Arc::new(MockTransport::new()), HttpMethod::Get))
    }
}

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_cache_reuses_client() {
    let cache = ClientCache::new(Box::new(CountingProvider::new(false)));
    let first = cache
        .get_client(&headers(&[("Authorization", "Bearer a"), ("X-Scope-OrgID", "1")]))
        .unwrap();
    let second = cache
        .get_client(&headers(&[("X-Scope-OrgID", "1"), ("Authorization", "Bearer a")]))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = cache
        .get_client(&headers(&[("Authorization", "Bearer b")]))
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.requests(), 3);
    assert_eq!(cache.misses(), 2);
}

#[test]
fn test_cache_key_ignores_header_names() {
    let cache = ClientCache::new(Box::new(CountingProvider::new(false)));
    let first = cache
        .get_client(&headers(&[("Authorization", "token"), ("X-Tenant", "acme")]))
        .unwrap();
    let second = cache
        .get_client(&headers(&[("X-Other", "acme"), ("Cookie", "token")]))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.misses(), 1);
}

#[test]
fn test_cache_does_not_store_failures() {
    let cache = ClientCache::new(Box::new(CountingProvider::new(true)));
    let h = headers(&[("Authorization", "Bearer a")]);
    assert!(matches!(
        cache.get_client(&h),
        Err(RuntimeError::ClientConstruction(_))
    ));
    assert!(cache.is_empty());
    assert!(cache.get_client(&h).is_ok());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.misses(), 2);
}

#[test]
fn test_default_provider_rejects_invalid_header() {
    let settings = DatasourceSettings {
        url: "http://localhost:9090".to_string(),
        ..Default::default()
    };
    let provider = DefaultClientProvider::new(&settings).unwrap();
    assert!(provider.build(&headers(&[("Authorization", "Bearer a")])).is_ok());
    assert!(matches!(
        provider.build(&headers(&[("bad header", "x")])),
        Err(RuntimeError::ClientConstruction(_))
    ));
}
