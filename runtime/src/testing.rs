use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::client::{Client, ClientProvider, HttpTransport};
use crate::config::HttpMethod;
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{DataQuery, Query, QueryFormat, RequestTimeRange};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: Url,
    pub body: String,
    pub content_type: Option<String>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<String> {
        let from_url = self
            .url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned());
        from_url.or_else(|| {
            url::form_urlencoded::parse(self.body.as_bytes())
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        })
    }
}

/// Chunks of a streamed body. The body ends when the sender is dropped.
pub type BodySender = UnboundedSender<io::Result<String>>;

enum RouteBody {
    Fixed(String),
    Stream(Mutex<Option<UnboundedReceiver<io::Result<String>>>>),
}

struct Route {
    path: String,
    status: u16,
    body: RouteBody,
    delay: Option<Duration>,
}

/// In-memory backend answering by path suffix. Unknown paths get a 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Vec<Route>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, path: &str, status: u16, body: &str) -> Self {
        self.add_route(path, status, RouteBody::Fixed(body.to_string()), None)
    }

    pub fn delayed_route(self, path: &str, status: u16, body: &str, delay: Duration) -> Self {
        self.add_route(path, status, RouteBody::Fixed(body.to_string()), Some(delay))
    }

    pub fn slow_route(self, path: &str, delay: Duration) -> Self {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        self.delayed_route(path, 200, body, delay)
    }

    /// Answers `path` once with a 200 whose body is fed through the returned sender.
    pub fn stream_route(self, path: &str) -> (Self, BodySender) {
        let (tx, rx) = unbounded();
        let route = self.add_route(path, 200, RouteBody::Stream(Mutex::new(Some(rx))), None);
        (route, tx)
    }

    fn add_route(
        mut self,
        path: &str,
        status: u16,
        body: RouteBody,
        delay: Option<Duration>,
    ) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            status,
            body,
            delay,
        });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let recorded = RecordedRequest {
            method: request.method().to_string(),
            url: request.url().clone(),
            body,
            content_type: request
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        let path = recorded.url.path().to_string();
        self.requests.lock().push(recorded);

        let route = self.routes.iter().find(|r| path.ends_with(&r.path));
        let (status, body) = match route {
            Some(route) => {
                if let Some(delay) = route.delay {
                    tokio::time::sleep(delay).await;
                }
                let body = match &route.body {
                    RouteBody::Fixed(body) => reqwest::Body::from(body.clone()),
                    RouteBody::Stream(rx) => {
                        let rx = rx.lock().take().expect("streamed route answered twice");
                        reqwest::Body::wrap_stream(rx)
                    }
                };
                (route.status, body)
            }
            None => (404, reqwest::Body::from("not found")),
        };
        let response = http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        Ok(reqwest::Response::from(response))
    }
}

pub fn mock_client(transport: Arc<MockTransport>, method: HttpMethod) -> Client {
    let base = Url::parse("http://localhost:9090").unwrap();
    Client::new(transport, base, method)
}

pub fn unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn test_query(expr: &str, start: i64, end: i64, step: Duration) -> Query {
    Query {
        expr: expr.to_string(),
        step,
        legend_format: String::new(),
        start: unix(start),
        end: unix(end),
        ref_id: "A".to_string(),
        instant: false,
        range: true,
        exemplar: false,
        utc_offset_sec: 0,
        format: QueryFormat::TimeSeries,
    }
}

/// Hands out clients backed by a shared [MockTransport], or fails every build.
pub struct MockProvider {
    pub transport: Option<Arc<MockTransport>>,
    pub method: HttpMethod,
    pub timeout: Option<Duration>,
}

impl MockProvider {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self {
            transport: Some(transport),
            method: HttpMethod::Post,
            timeout: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            transport: None,
            method: HttpMethod::Post,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl ClientProvider for MockProvider {
    fn build(&self, _headers: &HashMap<String, String>) -> RuntimeResult<Client> {
        match &self.transport {
            Some(transport) => {
                Ok(mock_client(Arc::clone(transport), self.method).with_timeout(self.timeout))
            }
            None => Err(RuntimeError::ClientConstruction("no transport".to_string())),
        }
    }
}

pub fn data_query(ref_id: &str, json: &str, start: i64, end: i64) -> DataQuery {
    DataQuery {
        ref_id: ref_id.to_string(),
        json: json.as_bytes().to_vec(),
        time_range: RequestTimeRange::new(unix(start), unix(end)),
        interval: Duration::from_secs(15),
        max_data_points: 1500,
    }
}

/// Waits until the receiving side of a streamed body has been dropped.
pub async fn wait_closed(tx: &BodySender) {
    let closed = async {
        while !tx.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("body stream still held");
}

/// Collects formatted `tracing` output for assertions on emitted events.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Installs a subscriber writing into this buffer for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter(Arc::clone(&self.0))
    }
}
