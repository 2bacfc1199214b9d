use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Request, Response};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{field, trace_span, Instrument, Span};
use url::Url;

use promsource_common::time::format_epoch_seconds;

use crate::client::HttpTransport;
use crate::config::HttpMethod;
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::Query;

pub const QUERY_RANGE_PATH: &str = "api/v1/query_range";
pub const QUERY_INSTANT_PATH: &str = "api/v1/query";
pub const QUERY_EXEMPLARS_PATH: &str = "api/v1/query_exemplars";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Issues queries against the HTTP API of a Prometheus compatible backend.
///
/// Every call returns the raw response once its status has been checked; the body is left
/// for the decoder to stream.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    method: HttpMethod,
    custom_params: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: Url, method: HttpMethod) -> Self {
        Self {
            transport,
            base_url,
            method,
            custom_params: vec![],
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_custom_params(mut self, params: Vec<(String, String)>) -> Self {
        self.custom_params = params;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Limit applied to sending a request and, separately, to reading its body.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn query_range(
        &self,
        query: &Query,
        token: &CancellationToken,
    ) -> RuntimeResult<Response> {
        let tr = query.time_range();
        let params = vec![
            ("query", query.expr.clone()),
            ("start", format_epoch_seconds(tr.start)),
            ("end", format_epoch_seconds(tr.end)),
            ("step", tr.step.as_secs_f64().to_string()),
        ];
        let request = self.build_request(self.method, QUERY_RANGE_PATH, &params);
        let span = trace_span!("range_query", expr = %query.expr, status = field::Empty);
        self.send(request, token).instrument(span).await
    }

    /// Evaluates the expression at the end of the query window. The timestamp is sent as is,
    /// aligning it to the step would move the evaluation point.
    pub async fn query_instant(
        &self,
        query: &Query,
        token: &CancellationToken,
    ) -> RuntimeResult<Response> {
        let mut params = vec![
            ("query", query.expr.clone()),
            ("time", format_epoch_seconds(query.end)),
        ];
        if !query.step.is_zero() {
            params.push(("step", query.step.as_secs_f64().to_string()));
        }
        let request = self.build_request(self.method, QUERY_INSTANT_PATH, &params);
        let span = trace_span!("instant_query", expr = %query.expr, status = field::Empty);
        self.send(request, token).instrument(span).await
    }

    pub async fn query_exemplars(
        &self,
        query: &Query,
        token: &CancellationToken,
    ) -> RuntimeResult<Response> {
        let tr = query.time_range();
        let params = vec![
            ("query", query.expr.clone()),
            ("start", format_epoch_seconds(tr.start)),
            ("end", format_epoch_seconds(tr.end)),
        ];
        let request = self.build_request(self.method, QUERY_EXEMPLARS_PATH, &params);
        let span = trace_span!("exemplar_query", expr = %query.expr, status = field::Empty);
        self.send(request, token).instrument(span).await
    }

    /// Label, series and metadata lookups. The method is chosen by the caller since some
    /// callers fall back to GET when POST is rejected.
    pub async fn query_resource(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(String, String)],
        token: &CancellationToken,
    ) -> RuntimeResult<Response> {
        let params: Vec<(&str, String)> =
            params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let request = self.build_request(method, path, &params);
        let span = trace_span!("resource_query", path = %path, status = field::Empty);
        self.send(request, token).instrument(span).await
    }

    fn build_request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Request {
        let mut url = self.endpoint_url(endpoint);
        match method {
            HttpMethod::Get => {
                append_query(&mut url, params.iter().map(|(k, v)| (*k, v.as_str())));
                Request::new(method.as_reqwest(), url)
            }
            HttpMethod::Post => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
                    .finish();
                let mut request = Request::new(method.as_reqwest(), url);
                *request.body_mut() = Some(body.into());
                request
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                request
            }
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        url.set_path(&path);
        append_query(
            &mut url,
            self.custom_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        url
    }

    async fn send(&self, request: Request, token: &CancellationToken) -> RuntimeResult<Response> {
        let call = async {
            let response = self.transport.execute(request).await?;
            Span::current().record("status", response.status().as_u16());
            check_status(response).await
        };
        let call = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| RuntimeError::Timeout(limit))?,
                None => call.await,
            }
        };
        tokio::select! {
            _ = token.cancelled() => Err(RuntimeError::Cancelled),
            res = call => res,
        }
    }
}

fn append_query<'a, I>(url: &mut Url, pairs: I)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs = pairs.into_iter().peekable();
    if pairs.peek().is_some() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

async fn check_status(response: Response) -> RuntimeResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    let message = error_message(&body);
    if status.is_client_error() {
        return Err(RuntimeError::BadRequest {
            status: status.as_u16(),
            message,
        });
    }
    Err(RuntimeError::UpstreamStatus {
        status: status.as_u16(),
        message,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| body.trim().to_string())
}
