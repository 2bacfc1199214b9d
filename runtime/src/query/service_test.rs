use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::config::DatasourceSettings;
use crate::query::QueryService;
use crate::runtime_error::RuntimeError;
use crate::testing::{data_query, wait_closed, CapturedLogs, MockProvider, MockTransport};
use crate::types::{FieldValues, FrameType, QueryDataRequest};

const START: i64 = 1664816826;
const END: i64 = 1664820426;

const RANGE_BODY: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[
    {"metric":{"__name__":"up","job":"api"},"values":[[1664816820,"1"],[1664816835,"2"]]},
    {"metric":{"__name__":"up","job":"db"},"values":[[1664816835,"0"]]}
]}}"#;

const INSTANT_BODY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[
    {"metric":{"__name__":"up","job":"api"},"value":[1664820426,"1"]}
]}}"#;

const EXEMPLAR_BODY: &str = r#"{"status":"success","data":[
    {
        "seriesLabels": {"__name__":"up","job":"api"},
        "exemplars": [
            {"labels":{"traceID":"t1"},"value":"5","timestamp":1664816825.5}
        ]
    }
]}"#;

fn settings() -> DatasourceSettings {
    DatasourceSettings {
        url: "http://localhost:9090".to_string(),
        ..Default::default()
    }
}

fn service(transport: Arc<MockTransport>, settings: DatasourceSettings) -> QueryService {
    QueryService::with_provider(
        settings,
        Box::new(MockProvider::new(transport)),
        Span::none(),
    )
}

fn request(queries: &[(&str, &str)]) -> QueryDataRequest {
    QueryDataRequest {
        headers: HashMap::from([("Authorization".to_string(), "Bearer x".to_string())]),
        from_alert: false,
        queries: queries
            .iter()
            .map(|(ref_id, json)| data_query(ref_id, json, START, END))
            .collect(),
    }
}

fn full_transport() -> MockTransport {
    MockTransport::new()
        .route("api/v1/query_range", 200, RANGE_BODY)
        .route("api/v1/query", 200, INSTANT_BODY)
        .route("api/v1/query_exemplars", 200, EXEMPLAR_BODY)
}

#[tokio::test]
async fn test_range_instant_and_exemplar() {
    let transport = Arc::new(full_transport());
    let service = service(transport.clone(), settings());
    let req = request(&[(
        "A",
        r#"{"expr":"up","range":true,"instant":true,"exemplar":true,"legendFormat":"{{job}}"}"#,
    )]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    let frames = response.get("A").unwrap().as_ref().unwrap();

    let names: Vec<&str> = frames.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["api", "db", "api", "exemplar"]);
    assert!(frames.iter().all(|f| f.ref_id == "A"));
    assert_eq!(
        frames[0].meta.executed_query_string.as_deref(),
        Some("Expr: up\nStep: 15s")
    );
    assert_eq!(frames[1].meta.executed_query_string, None);
    assert_eq!(frames[0].meta.frame_type, Some(FrameType::TimeSeriesMulti));
    let time_config = frames[0].fields[0].config.as_ref().unwrap();
    assert_eq!(time_config.interval_ms, Some(15_000.0));

    let exemplar = &frames[3];
    assert!(exemplar.is_exemplar());
    assert_eq!(exemplar.rows(), 1);
    let columns: Vec<&str> = exemplar.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(columns, vec!["Time", "Value", "__name__", "job", "traceID"]);

    let paths: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths.len(), 3);
    assert!(paths.contains(&"/api/v1/query_range".to_string()));
    assert!(paths.contains(&"/api/v1/query".to_string()));
    assert!(paths.contains(&"/api/v1/query_exemplars".to_string()));
}

#[tokio::test]
async fn test_failed_exemplar_query_keeps_range_frames() {
    let transport = Arc::new(
        MockTransport::new()
            .route("api/v1/query_range", 200, RANGE_BODY)
            .route("api/v1/query_exemplars", 500, "internal error"),
    );
    let service = service(transport, settings());
    let req = request(&[("A", r#"{"expr":"up","range":true,"exemplar":true}"#)]);
    let logs = CapturedLogs::default();
    let _subscriber = logs.install();

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    let frames = response.get("A").unwrap().as_ref().unwrap();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| !f.is_exemplar()));

    let output = logs.contents();
    assert!(output.contains("ERROR"), "{output}");
    assert!(output.contains("exemplar query failed"), "{output}");
    assert!(
        output.contains("unexpected response status 500: internal error"),
        "{output}"
    );
}

#[tokio::test]
async fn test_failed_range_query_fails_only_its_ref_id() {
    let transport = Arc::new(
        MockTransport::new()
            .route("api/v1/query_range", 400, r#"{"error":"parse error at char 3"}"#)
            .route("api/v1/query", 200, INSTANT_BODY),
    );
    let service = service(transport, settings());
    let req = request(&[
        ("A", r#"{"expr":"up(","range":true}"#),
        ("B", r#"{"expr":"up","instant":true}"#),
        ("C", "not json"),
    ]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.responses.len(), 3);
    match response.get("A").unwrap() {
        Err(RuntimeError::BadRequest { status, message }) => {
            assert_eq!(*status, 400);
            assert_eq!(message, "parse error at char 3");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(response.get("B").unwrap().as_ref().unwrap().len(), 1);
    assert!(matches!(
        response.get("C").unwrap(),
        Err(RuntimeError::MalformedQuery(_))
    ));
}

#[tokio::test]
async fn test_empty_result_gets_placeholder_frame() {
    let transport = Arc::new(MockTransport::new().route(
        "api/v1/query_range",
        200,
        r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#,
    ));
    let service = service(transport, settings());
    let req = request(&[("A", r#"{"expr":"absent_metric"}"#)]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    let frames = response.get("A").unwrap().as_ref().unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].fields.is_empty());
    assert_eq!(
        frames[0].meta.executed_query_string.as_deref(),
        Some("Expr: absent_metric\nStep: 15s")
    );
}

#[tokio::test]
async fn test_wide_frames() {
    let transport = Arc::new(MockTransport::new().route("api/v1/query_range", 200, RANGE_BODY));
    let settings = DatasourceSettings {
        wide_frames: true,
        ..settings()
    };
    let service = service(transport, settings);
    let req = request(&[("A", r#"{"expr":"up","legendFormat":"{{job}}"}"#)]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    let frames = response.get("A").unwrap().as_ref().unwrap();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.meta.frame_type, Some(FrameType::TimeSeriesWide));
    assert_eq!(frame.fields.len(), 3);
    assert_eq!(
        frame.fields[2].values,
        FieldValues::NullableFloat(vec![None, Some(0.0)])
    );
    let names: Vec<Option<&str>> = frame.fields[1..]
        .iter()
        .map(|f| f.config.as_ref().and_then(|c| c.display_name_from_ds.as_deref()))
        .collect();
    assert_eq!(names, vec![Some("api"), Some("db")]);
}

#[tokio::test]
async fn test_client_construction_failure_fails_request() {
    let service = QueryService::with_provider(
        settings(),
        Box::new(MockProvider::failing()),
        Span::none(),
    );
    let req = request(&[("A", r#"{"expr":"up"}"#)]);
    let err = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ClientConstruction(_)));
}

#[tokio::test]
async fn test_clients_are_reused_across_requests() {
    let transport = Arc::new(full_transport());
    let service = service(transport, settings());
    let req = request(&[("A", r#"{"expr":"up"}"#)]);
    let token = CancellationToken::new();

    service.query_data(&req, &token).await.unwrap();
    service.query_data(&req, &token).await.unwrap();
    assert_eq!(service.clients().requests(), 2);
    assert_eq!(service.clients().misses(), 1);
}

#[tokio::test]
async fn test_cancelled_request() {
    let transport = Arc::new(
        MockTransport::new().slow_route("api/v1/query_range", Duration::from_secs(60)),
    );
    let service = service(transport, settings());
    let req = request(&[("A", r#"{"expr":"up"}"#)]);
    let token = CancellationToken::new();
    token.cancel();

    let response = service.query_data(&req, &token).await.unwrap();
    assert!(matches!(
        response.get("A").unwrap(),
        Err(RuntimeError::Cancelled)
    ));
}

#[tokio::test]
async fn test_resource_lookup() {
    let transport = Arc::new(MockTransport::new().route(
        "api/v1/labels",
        200,
        r#"{"status":"success","data":["__name__","job"]}"#,
    ));
    let service = service(transport.clone(), settings());
    let frames = service
        .resource(
            &HashMap::new(),
            "api/v1/labels",
            &[("match[]".to_string(), "up".to_string())],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0].fields[0].values,
        FieldValues::String(vec!["__name__".to_string(), "job".to_string()])
    );
    assert_eq!(transport.requests()[0].param("match[]").as_deref(), Some("up"));
}

const STALLED_PREFIX: &str = r#"{"status":"success","data":{"resultType":"vector","result":["#;

#[tokio::test]
async fn test_failed_range_query_stops_instant_body() {
    let (transport, body) = MockTransport::new()
        .delayed_route(
            "api/v1/query_range",
            400,
            r#"{"error":"bad range"}"#,
            Duration::from_millis(100),
        )
        .stream_route("api/v1/query");
    body.unbounded_send(Ok(STALLED_PREFIX.to_string())).unwrap();
    let service = service(Arc::new(transport), settings());
    let req = request(&[("A", r#"{"expr":"up","range":true,"instant":true}"#)]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        response.get("A").unwrap(),
        Err(RuntimeError::BadRequest { .. })
    ));
    wait_closed(&body).await;
}

#[tokio::test]
async fn test_query_timeout_covers_stalled_body() {
    let (transport, body) = MockTransport::new().stream_route("api/v1/query_range");
    body.unbounded_send(Ok(STALLED_PREFIX.to_string())).unwrap();
    let limit = Duration::from_millis(200);
    let service = QueryService::with_provider(
        settings(),
        Box::new(MockProvider::new(Arc::new(transport)).with_timeout(limit)),
        Span::none(),
    );
    let req = request(&[("A", r#"{"expr":"up"}"#)]);

    let response = service
        .query_data(&req, &CancellationToken::new())
        .await
        .unwrap();
    match response.get("A").unwrap() {
        Err(RuntimeError::Timeout(d)) => assert_eq!(*d, limit),
        other => panic!("unexpected {other:?}"),
    }
    wait_closed(&body).await;
}
