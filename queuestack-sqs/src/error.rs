//! Errors raised by queue and message operations

use queuestack_core::{ApiError, ErrorCode, RequestId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqsError {
    #[error("The specified queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("A queue already exists with the same name and a different value for attributes: {0}")]
    QueueAlreadyExists(String),
    #[error("The receipt handle is not valid for the current version: {0}")]
    InvalidReceiptHandle(String),
    #[error("The request must contain the parameter {0}")]
    MissingParameter(String),
    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),
    #[error("Unknown Attribute {0}")]
    InvalidAttributeName(String),
    #[error("Invalid characters found: {0}")]
    InvalidMessageContents(String),
    #[error("Unknown operation: {0}")]
    InvalidAction(String),
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl SqsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueDoesNotExist,
            Self::QueueAlreadyExists(_) => ErrorCode::QueueAlreadyExists,
            Self::InvalidReceiptHandle(_) => ErrorCode::ReceiptHandleIsInvalid,
            Self::MissingParameter(_) => ErrorCode::MissingParameter,
            Self::InvalidParameterValue(_) => ErrorCode::InvalidParameterValue,
            Self::InvalidAttributeName(_) => ErrorCode::InvalidAttributeName,
            Self::InvalidMessageContents(_) => ErrorCode::InvalidMessageContents,
            Self::InvalidAction(_) => ErrorCode::InvalidAction,
            Self::MalformedRequest(_) => ErrorCode::MalformedInput,
        }
    }

    /// Translate into the error shape written on the wire
    pub fn to_api_error(&self, request_id: &RequestId) -> ApiError {
        ApiError::new(self.code(), self.to_string()).with_request_id(request_id.as_str())
    }
}
