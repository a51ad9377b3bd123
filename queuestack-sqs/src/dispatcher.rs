//! Operation routing
//!
//! Requests from either wire protocol are decoded into an [`Action`] through
//! the [`ParamSource`] view, validated, and executed against the
//! [`QueueStore`]. Results come back as an [`Outcome`] that the protocol
//! modules encode. This is the only place where queue and message failures
//! leave the broker core.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::attributes::{
    self, QueueConfig, ALL, MAX_VISIBILITY_TIMEOUT, MAX_WAIT_TIME_SECONDS,
};
use crate::error::SqsError;
use crate::ledger::{ReceivedMessage, SentMessage, MAX_RECEIVE_BATCH};
use crate::message_attributes::{self, MessageAttributes};
use crate::store::{self, QueueStore};

const MAX_LIST_RESULTS: u32 = 1000;

/// Read access to request parameters, independent of the wire encoding
pub trait ParamSource {
    /// A scalar parameter as text
    fn string(&self, name: &str) -> Option<String>;

    /// A name/value map such as `Attributes`
    fn map(&self, name: &str) -> HashMap<String, String>;

    /// A list such as `AttributeNames`
    fn list(&self, name: &str) -> Vec<String>;

    /// Named entries that each carry several fields, such as
    /// `MessageAttributes` (`name -> {DataType, StringValue}`)
    fn nested_map(&self, name: &str) -> HashMap<String, HashMap<String, String>>;
}

/// A decoded, validated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateQueue {
        queue_name: String,
        attributes: HashMap<String, String>,
        tags: HashMap<String, String>,
    },
    GetQueueUrl {
        queue_name: String,
    },
    ListQueues {
        prefix: Option<String>,
        max_results: Option<u32>,
        next_token: Option<String>,
    },
    DeleteQueue {
        queue_url: String,
    },
    PurgeQueue {
        queue_url: String,
    },
    GetQueueAttributes {
        queue_url: String,
        attribute_names: Vec<String>,
    },
    SetQueueAttributes {
        queue_url: String,
        attributes: HashMap<String, String>,
    },
    SendMessage {
        queue_url: String,
        message_body: String,
        delay_seconds: Option<u32>,
        message_attributes: MessageAttributes,
    },
    ReceiveMessage {
        queue_url: String,
        max_number_of_messages: Option<u32>,
        wait_time_seconds: Option<u32>,
        visibility_timeout: Option<u32>,
        attribute_names: Vec<String>,
        message_attribute_names: Vec<String>,
    },
    DeleteMessage {
        queue_url: String,
        receipt_handle: String,
    },
    ChangeMessageVisibility {
        queue_url: String,
        receipt_handle: String,
        visibility_timeout: u32,
    },
    TagQueue {
        queue_url: String,
        tags: HashMap<String, String>,
    },
    UntagQueue {
        queue_url: String,
        tag_keys: Vec<String>,
    },
    ListQueueTags {
        queue_url: String,
    },
}

impl Action {
    /// Decode `operation` (e.g. `SendMessage`) from its parameters
    pub fn decode(operation: &str, params: &impl ParamSource) -> Result<Self, SqsError> {
        let action = match operation {
            "CreateQueue" => {
                // JSON names the member `tags`, the Query form uses `Tag.N.Key`
                let mut tags = params.map("Tags");
                tags.extend(params.map("tags"));
                Self::CreateQueue {
                    queue_name: required(params, "QueueName")?,
                    attributes: params.map("Attributes"),
                    tags,
                }
            }
            "GetQueueUrl" => Self::GetQueueUrl {
                queue_name: required(params, "QueueName")?,
            },
            "ListQueues" => Self::ListQueues {
                prefix: params.string("QueueNamePrefix").filter(|p| !p.is_empty()),
                max_results: optional_u32(params, "MaxResults")?,
                next_token: params.string("NextToken").filter(|t| !t.is_empty()),
            },
            "DeleteQueue" => Self::DeleteQueue {
                queue_url: required(params, "QueueUrl")?,
            },
            "PurgeQueue" => Self::PurgeQueue {
                queue_url: required(params, "QueueUrl")?,
            },
            "GetQueueAttributes" => Self::GetQueueAttributes {
                queue_url: required(params, "QueueUrl")?,
                attribute_names: params.list("AttributeNames"),
            },
            "SetQueueAttributes" => {
                let queue_url = required(params, "QueueUrl")?;
                let attributes = params.map("Attributes");
                if attributes.is_empty() {
                    return Err(SqsError::MissingParameter("Attributes".to_string()));
                }
                Self::SetQueueAttributes {
                    queue_url,
                    attributes,
                }
            }
            "SendMessage" => Self::SendMessage {
                queue_url: required(params, "QueueUrl")?,
                message_body: required(params, "MessageBody")?,
                delay_seconds: optional_u32(params, "DelaySeconds")?,
                message_attributes: message_attributes::decode(
                    params.nested_map("MessageAttributes"),
                )?,
            },
            "ReceiveMessage" => {
                let mut attribute_names = params.list("AttributeNames");
                attribute_names.extend(params.list("MessageSystemAttributeNames"));
                Self::ReceiveMessage {
                    queue_url: required(params, "QueueUrl")?,
                    max_number_of_messages: optional_u32(params, "MaxNumberOfMessages")?,
                    wait_time_seconds: optional_u32(params, "WaitTimeSeconds")?,
                    visibility_timeout: optional_u32(params, "VisibilityTimeout")?,
                    attribute_names,
                    message_attribute_names: params.list("MessageAttributeNames"),
                }
            }
            "DeleteMessage" => Self::DeleteMessage {
                queue_url: required(params, "QueueUrl")?,
                receipt_handle: required(params, "ReceiptHandle")?,
            },
            "ChangeMessageVisibility" => Self::ChangeMessageVisibility {
                queue_url: required(params, "QueueUrl")?,
                receipt_handle: required(params, "ReceiptHandle")?,
                visibility_timeout: optional_u32(params, "VisibilityTimeout")?
                    .ok_or_else(|| SqsError::MissingParameter("VisibilityTimeout".to_string()))?,
            },
            "TagQueue" => {
                let queue_url = required(params, "QueueUrl")?;
                let tags = params.map("Tags");
                if tags.is_empty() {
                    return Err(SqsError::MissingParameter("Tags".to_string()));
                }
                Self::TagQueue { queue_url, tags }
            }
            "UntagQueue" => {
                let queue_url = required(params, "QueueUrl")?;
                let tag_keys = params.list("TagKeys");
                if tag_keys.is_empty() {
                    return Err(SqsError::MissingParameter("TagKeys".to_string()));
                }
                Self::UntagQueue {
                    queue_url,
                    tag_keys,
                }
            }
            "ListQueueTags" => Self::ListQueueTags {
                queue_url: required(params, "QueueUrl")?,
            },
            other => return Err(SqsError::InvalidAction(other.to_string())),
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateQueue { .. } => "CreateQueue",
            Self::GetQueueUrl { .. } => "GetQueueUrl",
            Self::ListQueues { .. } => "ListQueues",
            Self::DeleteQueue { .. } => "DeleteQueue",
            Self::PurgeQueue { .. } => "PurgeQueue",
            Self::GetQueueAttributes { .. } => "GetQueueAttributes",
            Self::SetQueueAttributes { .. } => "SetQueueAttributes",
            Self::SendMessage { .. } => "SendMessage",
            Self::ReceiveMessage { .. } => "ReceiveMessage",
            Self::DeleteMessage { .. } => "DeleteMessage",
            Self::ChangeMessageVisibility { .. } => "ChangeMessageVisibility",
            Self::TagQueue { .. } => "TagQueue",
            Self::UntagQueue { .. } => "UntagQueue",
            Self::ListQueueTags { .. } => "ListQueueTags",
        }
    }
}

/// A received message together with the attributes the caller asked for
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message: ReceivedMessage,
    /// System attributes
    pub attributes: BTreeMap<String, String>,
    pub message_attributes: MessageAttributes,
    /// Digest of `message_attributes`, absent when none were selected
    pub md5_of_message_attributes: Option<String>,
}

/// What a successful action produced
#[derive(Debug, Clone)]
pub enum Outcome {
    QueueUrl(String),
    QueueUrls {
        urls: Vec<String>,
        /// Set when `MaxResults` cut the listing short
        next_token: Option<String>,
    },
    Attributes(BTreeMap<String, String>),
    Tags(BTreeMap<String, String>),
    MessageSent(SentMessage),
    Messages(Vec<MessageView>),
    Empty,
}

#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    store: Arc<QueueStore>,
}

impl RequestDispatcher {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    pub async fn dispatch(&self, action: Action) -> Result<Outcome, SqsError> {
        debug!(action = action.name(), "Dispatching");

        match action {
            Action::CreateQueue {
                queue_name,
                attributes,
                tags,
            } => self.create_queue(&queue_name, &attributes, &tags),
            Action::GetQueueUrl { queue_name } => {
                let queue = self.store.get_queue(&queue_name)?;
                Ok(Outcome::QueueUrl(queue.url.clone()))
            }
            Action::ListQueues {
                prefix,
                max_results,
                next_token,
            } => {
                if let Some(max) = max_results {
                    check_range("MaxResults", max, 1, MAX_LIST_RESULTS)?;
                }
                let after = next_token.as_deref().map(decode_next_token).transpose()?;
                let mut queues = self.store.list_queues(prefix.as_deref(), after.as_deref());

                let mut next_token = None;
                if let Some(max) = max_results.map(|m| m as usize) {
                    if queues.len() > max {
                        queues.truncate(max);
                        next_token = queues.last().map(|q| encode_next_token(&q.name));
                    }
                }
                Ok(Outcome::QueueUrls {
                    urls: queues.iter().map(|q| q.url.clone()).collect(),
                    next_token,
                })
            }
            Action::DeleteQueue { queue_url } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                self.store.delete_queue(&queue.name)?;
                Ok(Outcome::Empty)
            }
            Action::PurgeQueue { queue_url } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                let purged = queue.ledger().purge();
                debug!(queue = %queue.name, purged, "Purged queue");
                Ok(Outcome::Empty)
            }
            Action::GetQueueAttributes {
                queue_url,
                attribute_names,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                let selected = select_attributes(queue.attributes(), &attribute_names, |name| {
                    attributes::is_known_attribute(name)
                })?;
                Ok(Outcome::Attributes(selected))
            }
            Action::SetQueueAttributes {
                queue_url,
                attributes,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                self.store.set_queue_attributes(&queue.name, &attributes)?;
                Ok(Outcome::Empty)
            }
            Action::SendMessage {
                queue_url,
                message_body,
                delay_seconds,
                message_attributes,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                let sent = queue.ledger().send_with_attributes(
                    Bytes::from(message_body),
                    delay_seconds,
                    message_attributes,
                )?;
                Ok(Outcome::MessageSent(sent))
            }
            Action::ReceiveMessage {
                queue_url,
                max_number_of_messages,
                wait_time_seconds,
                visibility_timeout,
                attribute_names,
                message_attribute_names,
            } => {
                let max = max_number_of_messages.unwrap_or(1);
                check_range("MaxNumberOfMessages", max, 1, MAX_RECEIVE_BATCH as u32)?;
                if let Some(wait) = wait_time_seconds {
                    check_range("WaitTimeSeconds", wait, 0, MAX_WAIT_TIME_SECONDS)?;
                }
                if let Some(timeout) = visibility_timeout {
                    check_range("VisibilityTimeout", timeout, 0, MAX_VISIBILITY_TIMEOUT)?;
                }

                let queue = self.store.get_queue_by_url(&queue_url)?;
                let wait = wait_time_seconds
                    .unwrap_or_else(|| queue.config().receive_message_wait_time_seconds);
                let received = queue
                    .ledger()
                    .receive(
                        max as usize,
                        Duration::from_secs(u64::from(wait)),
                        visibility_timeout,
                    )
                    .await;

                let views = received
                    .into_iter()
                    .map(|message| {
                        let attributes =
                            select_attributes(message.system_attributes(), &attribute_names, |_| true)
                                .unwrap_or_default();
                        let message_attributes = message_attributes::select(
                            &message.message_attributes,
                            &message_attribute_names,
                        );
                        let md5_of_message_attributes =
                            message_attributes::md5_of(&message_attributes);
                        MessageView {
                            message,
                            attributes,
                            message_attributes,
                            md5_of_message_attributes,
                        }
                    })
                    .collect();
                Ok(Outcome::Messages(views))
            }
            Action::DeleteMessage {
                queue_url,
                receipt_handle,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                queue.ledger().delete_message(&receipt_handle)?;
                Ok(Outcome::Empty)
            }
            Action::ChangeMessageVisibility {
                queue_url,
                receipt_handle,
                visibility_timeout,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                queue
                    .ledger()
                    .change_visibility(&receipt_handle, visibility_timeout)?;
                Ok(Outcome::Empty)
            }
            Action::TagQueue { queue_url, tags } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                queue.tag(&tags)?;
                debug!(queue = %queue.name, count = tags.len(), "Tagged queue");
                Ok(Outcome::Empty)
            }
            Action::UntagQueue {
                queue_url,
                tag_keys,
            } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                queue.untag(&tag_keys);
                Ok(Outcome::Empty)
            }
            Action::ListQueueTags { queue_url } => {
                let queue = self.store.get_queue_by_url(&queue_url)?;
                Ok(Outcome::Tags(queue.tags()))
            }
        }
    }

    /// Creating an existing queue is idempotent as long as the requested
    /// attributes match the ones it already has. Tags only apply to a new queue.
    fn create_queue(
        &self,
        queue_name: &str,
        attributes: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> Result<Outcome, SqsError> {
        let config = QueueConfig::from_attributes(attributes)?;
        store::validate_tags(tags)?;
        match self.store.create_queue(queue_name, config.clone()) {
            Ok(queue) => {
                queue.tag(tags)?;
                Ok(Outcome::QueueUrl(queue.url.clone()))
            }
            Err(SqsError::QueueAlreadyExists(name)) => {
                let existing = self.store.get_queue(&name)?;
                if attributes.is_empty() || existing.config() == config {
                    Ok(Outcome::QueueUrl(existing.url.clone()))
                } else {
                    Err(SqsError::QueueAlreadyExists(name))
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Opaque ListQueues continuation: the last queue name already returned
fn encode_next_token(queue_name: &str) -> String {
    URL_SAFE_NO_PAD.encode(queue_name)
}

fn decode_next_token(token: &str) -> Result<String, SqsError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| SqsError::InvalidParameterValue(format!("Invalid NextToken: {token}")))
}

fn required(params: &impl ParamSource, name: &str) -> Result<String, SqsError> {
    params
        .string(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SqsError::MissingParameter(name.to_string()))
}

fn optional_u32(params: &impl ParamSource, name: &str) -> Result<Option<u32>, SqsError> {
    params
        .string(name)
        .map(|value| {
            value.trim().parse::<u32>().map_err(|_| {
                SqsError::InvalidParameterValue(format!(
                    "Value {value} for parameter {name} is invalid"
                ))
            })
        })
        .transpose()
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), SqsError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SqsError::InvalidParameterValue(format!(
            "Value {value} for parameter {name} is invalid. Must be between {min} and {max}."
        )))
    }
}

/// Keep the entries named in `names`; `All` keeps everything, no names keeps nothing
fn select_attributes(
    available: BTreeMap<String, String>,
    names: &[String],
    is_known: impl Fn(&str) -> bool,
) -> Result<BTreeMap<String, String>, SqsError> {
    if let Some(unknown) = names.iter().find(|n| !is_known(n.as_str())) {
        return Err(SqsError::InvalidAttributeName(unknown.clone()));
    }
    if names.iter().any(|n| n == ALL) {
        return Ok(available);
    }
    Ok(available
        .into_iter()
        .filter(|(name, _)| names.contains(name))
        .collect())
}
