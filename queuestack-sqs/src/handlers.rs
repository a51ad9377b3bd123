//! HTTP handlers for SQS

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::Response,
    routing::post,
    Router,
};
use bytes::Bytes;
use queuestack_core::RequestId;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dispatcher::{Action, Outcome, ParamSource, RequestDispatcher};
use crate::error::SqsError;
use crate::json::{self, JsonParams};
use crate::query::{self, FormParams};
use crate::store::QueueStore;

pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";
pub const QUERY_ERROR_HEADER: &str = "x-amzn-query-error";

/// Shared state for SQS routes
#[derive(Debug)]
pub struct SqsState {
    dispatcher: RequestDispatcher,
}

impl SqsState {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self {
            dispatcher: RequestDispatcher::new(store),
        }
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        self.dispatcher.store()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Query,
    Json,
}

/// SQS routes: `/` and the path form of a queue URL
pub fn routes(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/", post(handle_request).get(handle_request))
        .route(
            "/:account_id/:queue_name",
            post(handle_queue_request).get(handle_queue_request),
        )
        .with_state(state)
}

/// Handle SQS requests sent to the service root
///
/// Requests with an `X-Amz-Target` header use the JSON protocol, everything
/// else is read as a Query protocol form.
pub async fn handle_request(
    State(state): State<Arc<SqsState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    process(&state, &uri, &headers, &body, None).await
}

/// Handle SQS requests posted to a queue URL; the path supplies `QueueUrl`
pub async fn handle_queue_request(
    State(state): State<Arc<SqsState>>,
    Path((account_id, queue_name)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let queue_url = state.store().queue_url(&queue_name);
    info!(account_id = %account_id, queue = %queue_name, "SQS queue request");
    process(&state, &uri, &headers, &body, Some(queue_url)).await
}

async fn process(
    state: &SqsState,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    queue_url: Option<String>,
) -> Response {
    let request_id = RequestId::new();
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok());

    match target {
        Some(target) => {
            let operation = json::operation_from_target(target).unwrap_or(target);
            let params = JsonParams::parse(body).map(|mut params| {
                if let Some(url) = queue_url {
                    params.insert_default("QueueUrl", url);
                }
                params
            });
            let result = match params {
                Ok(params) => run(state, operation, &params).await,
                Err(e) => Err(e),
            };
            respond(Protocol::Json, operation, result, &request_id)
        }
        None => {
            let mut params = FormParams::parse(uri.query().unwrap_or("").as_bytes(), body);
            if let Some(url) = queue_url {
                params.insert_default("QueueUrl", url);
            }
            let operation = params.action().unwrap_or("").to_string();
            let result = if operation.is_empty() {
                Err(SqsError::MissingParameter("Action".to_string()))
            } else {
                run(state, &operation, &params).await
            };
            respond(Protocol::Query, &operation, result, &request_id)
        }
    }
}

async fn run(
    state: &SqsState,
    operation: &str,
    params: &impl ParamSource,
) -> Result<Outcome, SqsError> {
    let action = Action::decode(operation, params)?;
    info!(action = action.name(), "SQS request");
    state.dispatcher.dispatch(action).await
}

fn respond(
    protocol: Protocol,
    operation: &str,
    result: Result<Outcome, SqsError>,
    request_id: &RequestId,
) -> Response {
    match (protocol, result) {
        (Protocol::Query, Ok(outcome)) => xml_response(
            StatusCode::OK,
            query::encode(operation, &outcome, request_id.as_str()),
            request_id,
        ),
        (Protocol::Json, Ok(outcome)) => json_response(
            StatusCode::OK,
            json::encode(&outcome).to_string(),
            request_id,
        ),
        (protocol, Err(e)) => error_response(protocol, operation, &e, request_id),
    }
}

// === Response helpers ===

fn xml_response(status: StatusCode, body: String, request_id: &RequestId) -> Response {
    response(status, "application/xml", body, request_id)
}

fn json_response(status: StatusCode, body: String, request_id: &RequestId) -> Response {
    response(status, json::CONTENT_TYPE, body, request_id)
}

fn error_response(
    protocol: Protocol,
    operation: &str,
    error: &SqsError,
    request_id: &RequestId,
) -> Response {
    let api_error = error.to_api_error(request_id);
    warn!(
        operation = %operation,
        code = api_error.code.as_str(),
        message = %api_error.message,
        "SQS request failed"
    );

    let status = StatusCode::from_u16(api_error.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match protocol {
        Protocol::Query => xml_response(status, api_error.to_xml(), request_id),
        Protocol::Json => {
            let mut response = json_response(status, api_error.to_json(), request_id);
            if let Ok(value) = HeaderValue::from_str(&api_error.query_error_header()) {
                response.headers_mut().insert(QUERY_ERROR_HEADER, value);
            }
            response
        }
    }
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
    request_id: &RequestId,
) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use axum::http::Request;
    use queuestack_core::ManualClock;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(QueueStore::new(
            StoreConfig::default(),
            Arc::new(ManualClock::starting_now()),
        ));
        routes(Arc::new(SqsState::new(store)))
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json_request(operation: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, json::CONTENT_TYPE)
            .header("x-amz-target", format!("AmazonSQS.{operation}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_query_create_queue() {
        let app = app();
        let (status, headers, body) =
            send(&app, form("/", "Action=CreateQueue&QueueName=orders")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key(REQUEST_ID_HEADER));
        assert!(body.contains("<QueueUrl>http://localhost:4566/000000000000/orders</QueueUrl>"));
    }

    #[tokio::test]
    async fn test_query_action_in_query_string() {
        let app = app();
        send(&app, form("/", "Action=CreateQueue&QueueName=orders")).await;
        let request = Request::builder()
            .method("GET")
            .uri("/?Action=ListQueues")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<ListQueuesResult><QueueUrl>"));
    }

    #[tokio::test]
    async fn test_query_missing_action() {
        let app = app();
        let (status, _, body) = send(&app, form("/", "QueueName=orders")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>MissingParameter</Code>"));
    }

    #[tokio::test]
    async fn test_query_unknown_queue() {
        let app = app();
        let (status, _, body) = send(
            &app,
            form(
                "/",
                "Action=SendMessage&QueueUrl=http%3A%2F%2Flocalhost%3A4566%2F000000000000%2Fnope&MessageBody=x",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>AWS.SimpleQueueService.NonExistentQueue</Code>"));
    }

    #[tokio::test]
    async fn test_query_send_via_queue_path() {
        let app = app();
        send(&app, form("/", "Action=CreateQueue&QueueName=orders")).await;

        let (status, _, body) = send(
            &app,
            form("/000000000000/orders", "Action=SendMessage&MessageBody=hello"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<MD5OfMessageBody>5d41402abc4b2a76b9719d911017c592</MD5OfMessageBody>"));

        let (_, _, body) = send(
            &app,
            form(
                "/000000000000/orders",
                "Action=ReceiveMessage&AttributeName.1=All",
            ),
        )
        .await;
        assert!(body.contains("<Body>hello</Body>"));
        assert!(body.contains("<Name>ApproximateReceiveCount</Name><Value>1</Value>"));
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let app = app();
        let (status, headers, body) =
            send(&app, json_request("CreateQueue", r#"{"QueueName":"jobs"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], json::CONTENT_TYPE);
        let created: serde_json::Value = serde_json::from_str(&body).unwrap();
        let url = created["QueueUrl"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            json_request(
                "SendMessage",
                &serde_json::json!({ "QueueUrl": url, "MessageBody": "payload" }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, _, body) = send(
            &app,
            json_request(
                "ReceiveMessage",
                &serde_json::json!({ "QueueUrl": url, "MaxNumberOfMessages": 10 }).to_string(),
            ),
        )
        .await;
        let received: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(received["Messages"][0]["Body"], "payload");
    }

    #[tokio::test]
    async fn test_json_error_shape() {
        let app = app();
        let (status, headers, body) = send(
            &app,
            json_request("GetQueueUrl", r#"{"QueueName":"missing"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            headers[QUERY_ERROR_HEADER],
            "AWS.SimpleQueueService.NonExistentQueue;Sender"
        );
        let error: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["__type"], "com.amazonaws.sqs#QueueDoesNotExist");
    }

    #[tokio::test]
    async fn test_json_unknown_operation() {
        let app = app();
        let (status, _, body) = send(&app, json_request("Explode", "{}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("com.amazonaws.sqs#InvalidAction"));
    }

    #[tokio::test]
    async fn test_json_malformed_body() {
        let app = app();
        let (status, _, body) = send(&app, json_request("ListQueues", "{oops")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("com.amazonaws.sqs#MalformedInput"));
    }

    #[tokio::test]
    async fn test_query_list_queues_next_token() {
        let app = app();
        for name in ["a", "b", "c"] {
            send(&app, form("/", &format!("Action=CreateQueue&QueueName={name}"))).await;
        }

        let (_, _, body) = send(&app, form("/", "Action=ListQueues&MaxResults=2")).await;
        assert!(body.contains("/a</QueueUrl>"));
        assert!(body.contains("/b</QueueUrl>"));
        assert!(!body.contains("/c</QueueUrl>"));
        let token = body
            .split("<NextToken>")
            .nth(1)
            .and_then(|rest| rest.split("</NextToken>").next())
            .expect("truncated listing carries a NextToken")
            .to_string();

        let (status, _, body) = send(
            &app,
            form("/", &format!("Action=ListQueues&MaxResults=2&NextToken={token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("/c</QueueUrl>"));
        assert!(!body.contains("/a</QueueUrl>"));
        assert!(!body.contains("<NextToken>"));
    }

    #[tokio::test]
    async fn test_json_list_queues_next_token() {
        let app = app();
        for name in ["a", "b", "c"] {
            send(
                &app,
                json_request("CreateQueue", &format!(r#"{{"QueueName":"{name}"}}"#)),
            )
            .await;
        }

        let (_, _, body) = send(&app, json_request("ListQueues", r#"{"MaxResults":2}"#)).await;
        let first: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(first["QueueUrls"].as_array().map(Vec::len), Some(2));
        let token = first["NextToken"].as_str().unwrap().to_string();

        let (_, _, body) = send(
            &app,
            json_request(
                "ListQueues",
                &serde_json::json!({ "MaxResults": 2, "NextToken": token }).to_string(),
            ),
        )
        .await;
        let second: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            second["QueueUrls"],
            serde_json::json!(["http://localhost:4566/000000000000/c"])
        );
        assert!(second.get("NextToken").is_none());
    }

    #[tokio::test]
    async fn test_query_rejects_body_outside_xml() {
        let app = app();
        send(&app, form("/", "Action=CreateQueue&QueueName=orders")).await;

        let (status, _, body) = send(
            &app,
            form("/000000000000/orders", "Action=SendMessage&MessageBody=a%01b"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidMessageContents</Code>"));

        let (_, _, body) = send(
            &app,
            form("/000000000000/orders", "Action=ReceiveMessage&WaitTimeSeconds=0"),
        )
        .await;
        assert!(!body.contains('\u{1}'));
        assert!(!body.contains("<Message>"));
    }

    #[tokio::test]
    async fn test_query_message_attributes_round_trip() {
        let app = app();
        send(&app, form("/", "Action=CreateQueue&QueueName=orders")).await;

        let (status, _, body) = send(
            &app,
            form(
                "/000000000000/orders",
                "Action=SendMessage&MessageBody=x\
                 &MessageAttribute.1.Name=color\
                 &MessageAttribute.1.Value.DataType=String\
                 &MessageAttribute.1.Value.StringValue=blue",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(
            "<MD5OfMessageAttributes>da1b33cc3cbfe8b1630921e78e6b9880</MD5OfMessageAttributes>"
        ));

        let (_, _, body) = send(
            &app,
            form(
                "/000000000000/orders",
                "Action=ReceiveMessage&MessageAttributeName.1=All",
            ),
        )
        .await;
        assert!(body.contains(
            "<MessageAttribute><Name>color</Name><Value><DataType>String</DataType><StringValue>blue</StringValue></Value></MessageAttribute>"
        ));
        assert!(body.contains(
            "<MD5OfMessageAttributes>da1b33cc3cbfe8b1630921e78e6b9880</MD5OfMessageAttributes>"
        ));
    }

    #[tokio::test]
    async fn test_query_tags() {
        let app = app();
        send(
            &app,
            form(
                "/",
                "Action=CreateQueue&QueueName=orders&Tag.1.Key=team&Tag.1.Value=payments",
            ),
        )
        .await;
        send(
            &app,
            form(
                "/000000000000/orders",
                "Action=TagQueue&Tag.1.Key=env&Tag.1.Value=dev",
            ),
        )
        .await;
        send(&app, form("/000000000000/orders", "Action=UntagQueue&TagKey.1=team")).await;

        let (status, _, body) =
            send(&app, form("/000000000000/orders", "Action=ListQueueTags")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(
            "<ListQueueTagsResult><Tag><Key>env</Key><Value>dev</Value></Tag></ListQueueTagsResult>"
        ));
    }

    #[tokio::test]
    async fn test_query_fifo_name_without_attribute() {
        let app = app();
        let (status, _, body) =
            send(&app, form("/", "Action=CreateQueue&QueueName=jobs.fifo")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidParameterValue</Code>"));

        let (status, _, body) = send(
            &app,
            form(
                "/",
                "Action=CreateQueue&QueueName=jobs.fifo&Attribute.1.Name=FifoQueue&Attribute.1.Value=true",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("/jobs.fifo</QueueUrl>"));
    }
}
