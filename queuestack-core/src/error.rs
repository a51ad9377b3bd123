//! SQS error codes and wire formatting

use serde::Serialize;
use thiserror::Error;

use crate::xml::escape_xml;

/// Error codes surfaced on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    QueueDoesNotExist,
    QueueAlreadyExists,
    ReceiptHandleIsInvalid,
    MissingParameter,
    InvalidParameterValue,
    InvalidAttributeName,
    InvalidMessageContents,
    InvalidAction,
    MalformedInput,
    InternalError,
}

impl ErrorCode {
    /// Short code used by the JSON protocol (`__type` suffix)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            Self::ReceiptHandleIsInvalid => "ReceiptHandleIsInvalid",
            Self::MissingParameter => "MissingParameter",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidAttributeName => "InvalidAttributeName",
            Self::InvalidMessageContents => "InvalidMessageContents",
            Self::InvalidAction => "InvalidAction",
            Self::MalformedInput => "MalformedInput",
            Self::InternalError => "InternalError",
        }
    }

    /// Legacy code used by the query protocol and the `x-amzn-query-error` header
    pub fn query_code(&self) -> &'static str {
        match self {
            Self::QueueDoesNotExist => "AWS.SimpleQueueService.NonExistentQueue",
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            other => other.as_str(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InternalError => 500,
            _ => 400,
        }
    }

    /// `Sender` for client faults, `Receiver` for ours
    pub fn fault(&self) -> &'static str {
        match self {
            Self::InternalError => "Receiver",
            _ => "Sender",
        }
    }
}

/// Error as returned to a client
#[derive(Debug, Error)]
#[error("{}: {message}", .code.as_str())]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Format as a query-protocol XML error
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ErrorResponse xmlns="http://queue.amazonaws.com/doc/2012-11-05/">
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
    <Detail/>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            self.code.fault(),
            self.code.query_code(),
            escape_xml(&self.message),
            self.request_id
        )
    }

    /// Format as a JSON-protocol error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: String,
            message: &'a str,
        }

        let error = JsonError {
            error_type: format!("com.amazonaws.sqs#{}", self.code.as_str()),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"__type":"com.amazonaws.sqs#{}"}}"#, self.code.as_str())
        })
    }

    /// Value for the `x-amzn-query-error` header
    pub fn query_error_header(&self) -> String {
        format!("{};{}", self.code.query_code(), self.code.fault())
    }
}
