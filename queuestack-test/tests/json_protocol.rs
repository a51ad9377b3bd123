//! Raw JSON protocol requests against an in-process broker

use queuestack_test::{init_tracing, TestServer};
use serde_json::{json, Value};

async fn start() -> TestServer {
    init_tracing();
    TestServer::start().await.unwrap()
}

/// POST one JSON operation; returns the status code and parsed body
async fn call(server: &TestServer, operation: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/", server.url()))
        .header("content-type", "application/x-amz-json-1.0")
        .header("x-amz-target", format!("AmazonSQS.{operation}"))
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    let value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, value)
}

async fn create(server: &TestServer, body: Value) -> String {
    let (status, created) = call(server, "CreateQueue", body).await;
    assert_eq!(status, 200, "{created}");
    created["QueueUrl"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_list_queues_next_token() {
    let server = start().await;
    for name in ["a", "b", "c"] {
        create(&server, json!({ "QueueName": name })).await;
    }

    let (_, first) = call(&server, "ListQueues", json!({ "MaxResults": 2 })).await;
    assert_eq!(first["QueueUrls"].as_array().unwrap().len(), 2);
    let token = first["NextToken"].as_str().unwrap();

    let (_, second) = call(
        &server,
        "ListQueues",
        json!({ "MaxResults": 2, "NextToken": token }),
    )
    .await;
    assert_eq!(
        second["QueueUrls"],
        json!([format!("{}/000000000000/c", server.url())])
    );
    assert!(second.get("NextToken").is_none());
}

#[tokio::test]
async fn test_invalid_message_contents() {
    let server = start().await;
    let url = create(&server, json!({ "QueueName": "q" })).await;

    let (status, error) = call(
        &server,
        "SendMessage",
        json!({ "QueueUrl": url, "MessageBody": "a\u{1}b" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(error["__type"], "com.amazonaws.sqs#InvalidMessageContents");
}

#[tokio::test]
async fn test_message_attributes() {
    let server = start().await;
    let url = create(&server, json!({ "QueueName": "q" })).await;

    let (status, sent) = call(
        &server,
        "SendMessage",
        json!({
            "QueueUrl": url,
            "MessageBody": "x",
            "MessageAttributes": {
                "color": { "DataType": "String", "StringValue": "blue" },
                "count": { "DataType": "Number", "StringValue": "3" },
                "blob": { "DataType": "Binary", "BinaryValue": "AAE=" }
            }
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        sent["MD5OfMessageAttributes"],
        "2d685be6cb0fae4ab46f8f59dbeac10f"
    );

    let (_, received) = call(
        &server,
        "ReceiveMessage",
        json!({ "QueueUrl": url, "MessageAttributeNames": ["color", "blob"] }),
    )
    .await;
    let message = &received["Messages"][0];
    assert_eq!(
        message["MessageAttributes"],
        json!({
            "blob": { "DataType": "Binary", "BinaryValue": "AAE=" },
            "color": { "DataType": "String", "StringValue": "blue" }
        })
    );
    assert!(message["MD5OfMessageAttributes"].is_string());
    assert_ne!(message["MD5OfMessageAttributes"], sent["MD5OfMessageAttributes"]);
}

#[tokio::test]
async fn test_rejects_malformed_message_attribute() {
    let server = start().await;
    let url = create(&server, json!({ "QueueName": "q" })).await;

    let (status, error) = call(
        &server,
        "SendMessage",
        json!({
            "QueueUrl": url,
            "MessageBody": "x",
            "MessageAttributes": { "count": { "DataType": "Number", "StringValue": "three" } }
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(error["__type"], "com.amazonaws.sqs#InvalidParameterValue");
}

#[tokio::test]
async fn test_tags_and_fifo_queue() {
    let server = start().await;

    let (status, error) = call(&server, "CreateQueue", json!({ "QueueName": "jobs.fifo" })).await;
    assert_eq!(status, 400);
    assert_eq!(error["__type"], "com.amazonaws.sqs#InvalidParameterValue");

    let url = create(
        &server,
        json!({
            "QueueName": "jobs.fifo",
            "Attributes": { "FifoQueue": "true" },
            "tags": { "team": "payments" }
        }),
    )
    .await;

    let (status, _) = call(
        &server,
        "TagQueue",
        json!({ "QueueUrl": url, "Tags": { "env": "dev" } }),
    )
    .await;
    assert_eq!(status, 200);
    let (status, _) = call(
        &server,
        "UntagQueue",
        json!({ "QueueUrl": url, "TagKeys": ["team"] }),
    )
    .await;
    assert_eq!(status, 200);

    let (_, tags) = call(&server, "ListQueueTags", json!({ "QueueUrl": url })).await;
    assert_eq!(tags, json!({ "Tags": { "env": "dev" } }));
}
