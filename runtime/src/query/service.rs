use std::collections::{BTreeMap, HashMap};

use futures::future::{join, try_join};
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument, Span};

use promsource_common::duration::GoDuration;
use promsource_common::error::DebugFormat;

use crate::client::{Client, ClientCache, ClientProvider, DefaultClientProvider};
use crate::config::DatasourceSettings;
use crate::decoder::{decode_response, DecodeOptions};
use crate::exemplar::process_exemplars;
use crate::interval::parse_query;
use crate::query::add_metadata;
use crate::runtime_error::{RuntimeError, RuntimeResult};
use crate::types::{DataQuery, Frame, Query, QueryDataRequest, QueryDataResponse};

/// The backend calls a single query may fan out into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FetchKind {
    Range,
    Instant,
    Exemplar,
}

/// Runs batches of panel queries against one datasource.
pub struct QueryService {
    settings: DatasourceSettings,
    clients: ClientCache,
    span: Span,
}

impl QueryService {
    /// Validates `settings` and creates a service sending requests over `reqwest`. Spans of
    /// every query are children of `span`.
    pub fn new(settings: DatasourceSettings, span: Span) -> RuntimeResult<Self> {
        settings.validate()?;
        let provider = DefaultClientProvider::new(&settings)?;
        Ok(Self::with_provider(settings, Box::new(provider), span))
    }

    pub fn with_provider(
        settings: DatasourceSettings,
        provider: Box<dyn ClientProvider>,
        span: Span,
    ) -> Self {
        Self {
            settings,
            clients: ClientCache::new(provider),
            span,
        }
    }

    pub fn settings(&self) -> &DatasourceSettings {
        &self.settings
    }

    pub fn clients(&self) -> &ClientCache {
        &self.clients
    }

    /// Executes every query of `request`, at most `concurrentQueryCount` at a time. A failing
    /// query only fails its own entry; the whole call fails only when no client can be
    /// built for the request headers.
    pub async fn query_data(
        &self,
        request: &QueryDataRequest,
        token: &CancellationToken,
    ) -> RuntimeResult<QueryDataResponse> {
        let client = self.clients.get_client(&request.headers)?;
        let client = client.as_ref();

        let responses: BTreeMap<String, RuntimeResult<Vec<Frame>>> =
            stream::iter(&request.queries)
                .map(|query| async move {
                    let result = self
                        .handle_query(client, query, request.from_alert, token)
                        .await;
                    (query.ref_id.clone(), result)
                })
                .buffered(self.settings.concurrency())
                .collect()
                .await;

        Ok(QueryDataResponse { responses })
    }

    async fn handle_query(
        &self,
        client: &Client,
        data_query: &DataQuery,
        from_alert: bool,
        token: &CancellationToken,
    ) -> RuntimeResult<Vec<Frame>> {
        let query = parse_query(data_query, &self.settings.time_interval, from_alert)?;
        let span = info_span!(
            parent: &self.span,
            "query",
            ref_id = %query.ref_id,
            expr = %query.expr,
            step = %GoDuration(query.step),
        );
        self.execute(client, &query, token).instrument(span).await
    }

    /// Issues the range, instant and exemplar fetches of `query` concurrently. The frames
    /// are returned in that order. A failed range or instant fetch fails the query and
    /// cancels the others; a failed exemplar fetch is logged and leaves no frames.
    pub async fn execute(
        &self,
        client: &Client,
        query: &Query,
        token: &CancellationToken,
    ) -> RuntimeResult<Vec<Frame>> {
        let primary_token = token.child_token();
        let exemplar_token = token.child_token();

        let range = async {
            if query.range {
                self.fetch(client, query, FetchKind::Range, &primary_token).await
            } else {
                Ok(vec![])
            }
        };
        let instant = async {
            if query.instant {
                self.fetch(client, query, FetchKind::Instant, &primary_token).await
            } else {
                Ok(vec![])
            }
        };
        let primary = async {
            let res = try_join(range, instant).await;
            if res.is_err() {
                primary_token.cancel();
                exemplar_token.cancel();
            }
            res
        };
        let exemplars = async {
            if !query.exemplar {
                return vec![];
            }
            match self
                .fetch(client, query, FetchKind::Exemplar, &exemplar_token)
                .await
            {
                Ok(frames) => frames,
                Err(RuntimeError::Cancelled) => {
                    debug!("exemplar query cancelled");
                    vec![]
                }
                Err(e) => {
                    let err = RuntimeError::ExemplarFetchFailed(Box::new(e));
                    error!(error = %DebugFormat::new(&err), "exemplar query failed");
                    vec![]
                }
            }
        };

        let (primary, exemplars) = join(primary, exemplars).await;
        let (mut frames, instant) = primary?;
        frames.extend(instant);
        frames.extend(exemplars);
        Ok(frames)
    }

    async fn fetch(
        &self,
        client: &Client,
        query: &Query,
        kind: FetchKind,
        token: &CancellationToken,
    ) -> RuntimeResult<Vec<Frame>> {
        let response = match kind {
            FetchKind::Range => client.query_range(query, token).await?,
            FetchKind::Instant => client.query_instant(query, token).await?,
            FetchKind::Exemplar => client.query_exemplars(query, token).await?,
        };
        let wide = self.settings.wide_frames && kind != FetchKind::Exemplar;
        let options = DecodeOptions { wide };
        let mut frames =
            decode_response(response, options, token, client.timeout(), Span::current()).await?;
        debug!(kind = %kind, frames = frames.len(), "fetched");

        add_metadata(&mut frames, query, wide, kind != FetchKind::Exemplar);
        Ok(process_exemplars(
            frames,
            self.settings.sampler_kind(),
            query.step,
        ))
    }

    /// Label, series and metadata lookups, decoded into frames.
    pub async fn resource(
        &self,
        headers: &HashMap<String, String>,
        path: &str,
        params: &[(String, String)],
        token: &CancellationToken,
    ) -> RuntimeResult<Vec<Frame>> {
        let client = self.clients.get_client(headers)?;
        let span = info_span!(parent: &self.span, "resource", path = %path);
        async {
            let response = client
                .query_resource(self.settings.http_method, path, params, token)
                .await?;
            decode_response(
                response,
                DecodeOptions::default(),
                token,
                client.timeout(),
                Span::current(),
            )
            .await
        }
        .instrument(span)
        .await
    }
}
