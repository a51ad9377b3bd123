//! Queue configuration and the attribute names that carry it

use std::collections::{BTreeMap, HashMap};

use crate::error::SqsError;

pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
pub const MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
pub const MAXIMUM_MESSAGE_SIZE: &str = "MaximumMessageSize";
pub const DELAY_SECONDS: &str = "DelaySeconds";
pub const RECEIVE_MESSAGE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";
pub const FIFO_QUEUE: &str = "FifoQueue";

/// Name suffix every FIFO queue carries
pub const FIFO_SUFFIX: &str = ".fifo";

pub const QUEUE_ARN: &str = "QueueArn";
pub const CREATED_TIMESTAMP: &str = "CreatedTimestamp";
pub const LAST_MODIFIED_TIMESTAMP: &str = "LastModifiedTimestamp";
pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
pub const APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE: &str =
    "ApproximateNumberOfMessagesNotVisible";
pub const APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED: &str = "ApproximateNumberOfMessagesDelayed";

/// Requests every attribute
pub const ALL: &str = "All";

pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;
pub const MAX_DELAY_SECONDS: u32 = 900;

/// Accepted and echoed back, but without behaviour here
const PASSTHROUGH: &[&str] = &[
    "Policy",
    "RedrivePolicy",
    "RedriveAllowPolicy",
    "KmsMasterKeyId",
    "KmsDataKeyReusePeriodSeconds",
    "SqsManagedSseEnabled",
    "ContentBasedDeduplication",
    "DeduplicationScope",
    "FifoThroughputLimit",
];

/// Only valid on FIFO queues
const FIFO_ONLY: &[&str] = &[
    "ContentBasedDeduplication",
    "DeduplicationScope",
    "FifoThroughputLimit",
];

const READ_ONLY: &[&str] = &[
    QUEUE_ARN,
    CREATED_TIMESTAMP,
    LAST_MODIFIED_TIMESTAMP,
    APPROXIMATE_NUMBER_OF_MESSAGES,
    APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE,
    APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED,
];

/// Settable configuration of a queue. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub maximum_message_size: u32,
    pub delay_seconds: u32,
    pub receive_message_wait_time_seconds: u32,
    pub extra: BTreeMap<String, String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            message_retention_period: 345_600, // 4 days
            maximum_message_size: 262_144,     // 256KB
            delay_seconds: 0,
            receive_message_wait_time_seconds: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl QueueConfig {
    /// Defaults for a queue called `name`; `.fifo` names get `FifoQueue=true`
    pub fn for_queue_name(name: &str) -> Self {
        let mut config = Self::default();
        if name.ends_with(FIFO_SUFFIX) {
            config.extra.insert(FIFO_QUEUE.to_string(), "true".to_string());
        }
        config
    }

    pub fn from_attributes(attributes: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut config = Self::default();
        config.apply(attributes)?;
        Ok(config)
    }

    /// Apply attribute overrides. Either every attribute is applied or none is.
    pub fn apply(&mut self, attributes: &HashMap<String, String>) -> Result<(), SqsError> {
        let mut next = self.clone();
        for (name, value) in attributes {
            match name.as_str() {
                VISIBILITY_TIMEOUT => {
                    next.visibility_timeout = parse_bounded(name, value, 0, MAX_VISIBILITY_TIMEOUT)?;
                }
                MESSAGE_RETENTION_PERIOD => {
                    next.message_retention_period = parse_bounded(name, value, 60, 1_209_600)?;
                }
                MAXIMUM_MESSAGE_SIZE => {
                    next.maximum_message_size = parse_bounded(name, value, 1_024, 262_144)?;
                }
                DELAY_SECONDS => {
                    next.delay_seconds = parse_bounded(name, value, 0, MAX_DELAY_SECONDS)?;
                }
                RECEIVE_MESSAGE_WAIT_TIME_SECONDS => {
                    next.receive_message_wait_time_seconds =
                        parse_bounded(name, value, 0, MAX_WAIT_TIME_SECONDS)?;
                }
                FIFO_QUEUE => {
                    let fifo: bool = value.trim().to_ascii_lowercase().parse().map_err(|_| {
                        SqsError::InvalidParameterValue(format!(
                            "{name} must be true or false, got '{value}'"
                        ))
                    })?;
                    next.extra.insert(FIFO_QUEUE.to_string(), fifo.to_string());
                }
                other if PASSTHROUGH.contains(&other) => {
                    next.extra.insert(other.to_string(), value.clone());
                }
                other => return Err(SqsError::InvalidAttributeName(other.to_string())),
            }
        }
        *self = next;
        Ok(())
    }

    pub fn is_fifo(&self) -> bool {
        self.extra.get(FIFO_QUEUE).is_some_and(|v| v == "true")
    }

    /// A queue is FIFO exactly when its name ends in `.fifo`, and only FIFO
    /// queues take the FIFO-only attributes.
    pub fn check_queue_type(&self, name: &str) -> Result<(), SqsError> {
        let fifo_name = name.ends_with(FIFO_SUFFIX);
        if fifo_name && !self.is_fifo() {
            return Err(SqsError::InvalidParameterValue(format!(
                "Queue {name} ends in {FIFO_SUFFIX} but FifoQueue is not true"
            )));
        }
        if !fifo_name && self.is_fifo() {
            return Err(SqsError::InvalidParameterValue(format!(
                "The name of a FIFO queue must end with {FIFO_SUFFIX}: {name}"
            )));
        }
        if !fifo_name {
            if let Some(attribute) = FIFO_ONLY.iter().find(|a| self.extra.contains_key(**a)) {
                return Err(SqsError::InvalidAttributeName((*attribute).to_string()));
            }
        }
        Ok(())
    }

    /// Settable attributes as strings
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = self.extra.clone();
        attributes.insert(VISIBILITY_TIMEOUT.into(), self.visibility_timeout.to_string());
        attributes.insert(
            MESSAGE_RETENTION_PERIOD.into(),
            self.message_retention_period.to_string(),
        );
        attributes.insert(MAXIMUM_MESSAGE_SIZE.into(), self.maximum_message_size.to_string());
        attributes.insert(DELAY_SECONDS.into(), self.delay_seconds.to_string());
        attributes.insert(
            RECEIVE_MESSAGE_WAIT_TIME_SECONDS.into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        attributes
    }
}

/// Whether `name` can be requested from GetQueueAttributes
pub fn is_known_attribute(name: &str) -> bool {
    name == ALL
        || READ_ONLY.contains(&name)
        || PASSTHROUGH.contains(&name)
        || matches!(
            name,
            FIFO_QUEUE
                | VISIBILITY_TIMEOUT
                | MESSAGE_RETENTION_PERIOD
                | MAXIMUM_MESSAGE_SIZE
                | DELAY_SECONDS
                | RECEIVE_MESSAGE_WAIT_TIME_SECONDS
        )
}

pub(crate) fn parse_bounded(name: &str, value: &str, min: u32, max: u32) -> Result<u32, SqsError> {
    let parsed: u32 = value.trim().parse().map_err(|_| {
        SqsError::InvalidParameterValue(format!("{name} must be an integer, got '{value}'"))
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(SqsError::InvalidParameterValue(format!(
            "{name} must be between {min} and {max}, got {parsed}"
        )));
    }
    Ok(parsed)
}
