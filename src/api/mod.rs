//! HTTP adapter
//!
//! `POST /tasks?taskId=..&duration=..` submits one task event and
//! `GET /tasks/{taskId}/average` reads the running average. Health and
//! metrics routes are served alongside.

use crate::error::{TrackerError, TrackerResult};
use crate::observability::metrics::{metrics, EventSource};
use crate::observability::{health_routes, HealthState};
use crate::protocol::{TaskEvent, TaskResponse};
use crate::transport::EventPublisher;
use crate::workflow::TaskService;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;
use warp::http::header::HeaderValue;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Shared state behind every HTTP handler
#[derive(Clone)]
pub struct ApiState {
    service: TaskService,
    publisher: Option<Arc<dyn EventPublisher>>,
    request_timeout: Option<Duration>,
}

impl ApiState {
    pub fn new(service: TaskService) -> Self {
        Self {
            service,
            publisher: None,
            request_timeout: None,
        }
    }

    /// Hand submitted events to the queue instead of processing them inline
    pub fn with_async_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Bound request handling by `timeout`
    ///
    /// Submissions apply it to the processing steps only; once the
    /// accumulate is issued the request waits for it, so a timeout always
    /// means the duration was not counted.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.service = self.service.with_pipeline_deadline(timeout);
        self.request_timeout = Some(timeout);
        self
    }

    async fn within_timeout<T, F>(&self, task_id: &str, fut: F) -> TrackerResult<T>
    where
        F: Future<Output = TrackerResult<T>>,
    {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                TrackerError::processing(task_id, format!("request timed out after {limit:?}"))
            })?,
            None => fut.await,
        }
    }
}

/// Task routes plus health routes
pub fn routes(
    state: ApiState,
    health: Arc<HealthState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = Arc::new(state);
    let with_state = warp::any().map(move || state.clone());
    let trace_id = warp::header::optional::<String>(TRACE_ID_HEADER);

    let submit = warp::path!("tasks")
        .and(warp::post())
        .and(with_state.clone())
        .and(trace_id.clone())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(submit_task);

    let average = warp::path!("tasks" / String / "average")
        .and(warp::get())
        .and(with_state)
        .and(trace_id)
        .and_then(get_average);

    submit.or(average).or(health_routes(health))
}

async fn submit_task(
    state: Arc<ApiState>,
    trace_id: Option<String>,
    params: HashMap<String, String>,
) -> Result<Response, Infallible> {
    let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = crate::request_span!(method = "POST", path = "/tasks", trace_id = %trace_id);

    let response = async {
        metrics().event_received(EventSource::Http);
        match submit(&state, &params).await {
            Ok((status, body)) => json_response(&body, status),
            Err(e) => error_response(&e),
        }
    }
    .instrument(span)
    .await;

    Ok(with_trace_id(response, &trace_id))
}

async fn submit(
    state: &ApiState,
    params: &HashMap<String, String>,
) -> TrackerResult<(StatusCode, TaskResponse)> {
    let event = event_from_query(params).map_err(|e| {
        metrics().event_rejected();
        e
    })?;

    if let Some(publisher) = &state.publisher {
        publisher.publish(&event).await?;
        debug!(task_id = event.task_id(), "task event queued");
        return Ok((StatusCode::ACCEPTED, TaskResponse::accepted()));
    }

    let response = state.service.submit_task_event(event).await?;
    Ok((StatusCode::CREATED, response))
}

async fn get_average(
    task_id: String,
    state: Arc<ApiState>,
    trace_id: Option<String>,
) -> Result<Response, Infallible> {
    let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = crate::request_span!(
        method = "GET",
        path = "/tasks/{taskId}/average",
        trace_id = %trace_id,
        task_id = %task_id
    );

    let response = async {
        let result = state
            .within_timeout(&task_id, state.service.request_average(&task_id))
            .await;
        match result {
            Ok(average) => json_response(&average, StatusCode::OK),
            Err(e) => error_response(&e),
        }
    }
    .instrument(span)
    .await;

    Ok(with_trace_id(response, &trace_id))
}

/// Build an event from `taskId` and `duration` query parameters
pub fn event_from_query(params: &HashMap<String, String>) -> TrackerResult<TaskEvent> {
    let task_id = params
        .get("taskId")
        .ok_or_else(|| TrackerError::validation("taskId is required"))?;
    let raw_duration = params
        .get("duration")
        .ok_or_else(|| TrackerError::validation("duration is required"))?;
    let duration = raw_duration
        .trim()
        .parse::<i64>()
        .map_err(|_| TrackerError::validation(format!("duration must be an integer: {raw_duration}")))?;

    let duration_ms = crate::protocol::validate_duration(duration)?;
    Ok(TaskEvent::new(task_id.as_str(), duration_ms)?)
}

fn json_response<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_response(error: &TrackerError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(error = %error, "request failed");
    } else {
        debug!(error = %error, "request rejected");
    }
    json_response(&error.to_error_response(), status)
}

fn with_trace_id(mut response: Response, trace_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Bind the HTTP server and serve until `shutdown_rx` flips to `true`
pub fn serve(
    state: ApiState,
    health: Arc<HealthState>,
    port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>), warp::Error> {
    let (addr, server) = warp::serve(routes(state, health)).try_bind_with_graceful_shutdown(
        ([0, 0, 0, 0], port),
        async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        },
    )?;
    info!(%addr, "HTTP server listening");
    Ok((addr, tokio::spawn(server)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProcessingPipeline;
    use crate::store::{AggregateStore, InMemoryAggregateStore};
    use crate::testing::mocks::{MockTransport, SlowStep, SlowStore};

    fn state_with(store: Arc<InMemoryAggregateStore>, pipeline: ProcessingPipeline) -> ApiState {
        ApiState::new(TaskService::new(store, pipeline))
    }

    fn health() -> Arc<HealthState> {
        Arc::new(HealthState::new("svc", "in_memory", false))
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_event_from_query() {
        let event = event_from_query(&params(&[("taskId", "t1"), ("duration", "1500")])).unwrap();
        assert_eq!(event.task_id(), "t1");
        assert_eq!(event.duration_ms(), 1500);

        for bad in [
            params(&[("duration", "10")]),
            params(&[("taskId", "t1")]),
            params(&[("taskId", "t1"), ("duration", "ten")]),
            params(&[("taskId", "t1"), ("duration", "-1")]),
            params(&[("taskId", " "), ("duration", "10")]),
        ] {
            let err = event_from_query(&bad).unwrap_err();
            assert_eq!(err.status_code(), 400, "params: {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_submit_then_average() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let routes = routes(state_with(store, ProcessingPipeline::empty()), health());

        for duration in [1000, 2000] {
            let res = warp::test::request()
                .method("POST")
                .path(&format!("/tasks?taskId=t1&duration={duration}"))
                .reply(&routes)
                .await;
            assert_eq!(res.status(), StatusCode::CREATED);
            let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
            assert_eq!(body["status"], "OK");
        }

        let res = warp::test::request()
            .path("/tasks/t1/average")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["taskId"], "t1");
        assert_eq!(body["averageDurationMs"], 1500);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let routes = routes(
            state_with(Arc::new(InMemoryAggregateStore::new()), ProcessingPipeline::empty()),
            health(),
        );

        let res = warp::test::request()
            .path("/tasks/ghost/average")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["errorCode"], 1002);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_bad_request() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let routes = routes(state_with(store.clone(), ProcessingPipeline::empty()), health());

        let res = warp::test::request()
            .method("POST")
            .path("/tasks?taskId=t1&duration=-5")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_trace_id_is_echoed_or_generated() {
        let routes = routes(
            state_with(Arc::new(InMemoryAggregateStore::new()), ProcessingPipeline::empty()),
            health(),
        );

        let res = warp::test::request()
            .method("POST")
            .path("/tasks?taskId=t1&duration=5")
            .header(TRACE_ID_HEADER, "trace-123")
            .reply(&routes)
            .await;
        assert_eq!(res.headers()[TRACE_ID_HEADER], "trace-123");

        let res = warp::test::request()
            .path("/tasks/t1/average")
            .reply(&routes)
            .await;
        let generated = res.headers()[TRACE_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn test_async_submission_is_queued() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let transport = Arc::new(MockTransport::new());
        let state = state_with(store.clone(), ProcessingPipeline::empty())
            .with_async_publisher(transport.clone());
        let routes = routes(state, health());

        let res = warp::test::request()
            .method("POST")
            .path("/tasks?taskId=t1&duration=700")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "ACCEPTED");

        let published = transport.get_published_events().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].duration_ms(), 700);
        assert_eq!(store.get("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_request_timeout_is_processing_error() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let pipeline = ProcessingPipeline::new(
            vec![Box::new(SlowStep::new("slow", Duration::from_millis(200)))],
            1,
        );
        let state = state_with(store.clone(), pipeline)
            .with_request_timeout(Duration::from_millis(10));
        let routes = routes(state, health());

        let res = warp::test::request()
            .method("POST")
            .path("/tasks?taskId=t1&duration=5")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["errorCode"], 1001);

        // The 500 means the duration was never counted
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.get("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_slow_accumulate_is_awaited_past_timeout() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let slow_store = Arc::new(SlowStore::new(store.clone(), Duration::from_millis(100)));
        let state = ApiState::new(TaskService::new(slow_store, ProcessingPipeline::empty()))
            .with_request_timeout(Duration::from_millis(20));
        let routes = routes(state, health());

        let res = warp::test::request()
            .method("POST")
            .path("/tasks?taskId=t1&duration=1000")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "OK");

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.total_duration_ms, 1000);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_health_routes_are_served() {
        let routes = routes(
            state_with(Arc::new(InMemoryAggregateStore::new()), ProcessingPipeline::empty()),
            health(),
        );
        let res = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
