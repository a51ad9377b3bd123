//! Per-queue message storage with visibility-timeout bookkeeping
//!
//! Every message is in exactly one of three states:
//! - visible: eligible for the next receive,
//! - delayed: sent with a delay that has not elapsed yet,
//! - in flight: delivered, hidden until its deadline, addressable by exactly
//!   one receipt handle.
//!
//! Visible messages are kept ordered by their enqueue sequence, so a message
//! returned to visibility goes back to its original position.
//!
//! All state sits behind one mutex per ledger. The lock is never held across
//! an await; long polls wait on a [`Notify`] that is signalled whenever a
//! message may have become visible.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bytes::Bytes;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use queuestack_core::{xml::first_invalid_char, Clock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::attributes::{QueueConfig, MAX_DELAY_SECONDS, MAX_VISIBILITY_TIMEOUT};
use crate::error::SqsError;
use crate::message_attributes::{self, MessageAttributes};

/// Largest batch a single receive may return
pub const MAX_RECEIVE_BATCH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Visibility {
    Visible,
    Delayed { until: i64 },
    InFlight { receipt_handle: String, deadline: i64 },
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: Bytes,
    md5_of_body: String,
    message_attributes: MessageAttributes,
    md5_of_message_attributes: Option<String>,
    sender_id: String,
    sent_timestamp: i64,
    receive_count: u32,
    first_receive_timestamp: Option<i64>,
    visibility: Visibility,
}

#[derive(Debug, Default)]
struct LedgerState {
    config: QueueConfig,
    next_sequence: u64,
    messages: HashMap<u64, StoredMessage>,
    visible: BTreeSet<u64>,
    handles: HashMap<String, u64>,
}

impl LedgerState {
    fn make_visible(&mut self, sequence: u64) {
        if let Some(message) = self.messages.get_mut(&sequence) {
            if let Visibility::InFlight { receipt_handle, .. } = &message.visibility {
                self.handles.remove(receipt_handle);
            }
            message.visibility = Visibility::Visible;
            self.visible.insert(sequence);
        }
    }

    fn remove(&mut self, sequence: u64) -> Option<StoredMessage> {
        let message = self.messages.remove(&sequence)?;
        self.visible.remove(&sequence);
        if let Visibility::InFlight { receipt_handle, .. } = &message.visibility {
            self.handles.remove(receipt_handle);
        }
        Some(message)
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub md5_of_body: String,
    pub md5_of_message_attributes: Option<String>,
}

/// One delivery of a message
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: Bytes,
    pub md5_of_body: String,
    pub message_attributes: MessageAttributes,
    pub sender_id: String,
    pub sent_timestamp: i64,
    pub receive_count: u32,
    pub first_receive_timestamp: i64,
}

impl ReceivedMessage {
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Message system attributes, keyed by their SQS names
    pub fn system_attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "ApproximateReceiveCount".to_string(),
                self.receive_count.to_string(),
            ),
            (
                "ApproximateFirstReceiveTimestamp".to_string(),
                self.first_receive_timestamp.to_string(),
            ),
            ("SentTimestamp".to_string(), self.sent_timestamp.to_string()),
            ("SenderId".to_string(), self.sender_id.clone()),
        ])
    }
}

/// Depth of a ledger by state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCounts {
    pub visible: usize,
    pub in_flight: usize,
    pub delayed: usize,
}

/// What a single reap changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// In-flight messages whose deadline passed
    pub returned: usize,
    /// Delayed messages whose delay elapsed
    pub released: usize,
    /// Messages dropped after the retention period
    pub expired: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.returned == 0 && self.released == 0 && self.expired == 0
    }
}

pub struct MessageLedger {
    queue_name: String,
    /// Account id stamped on sent messages as `SenderId`
    sender_id: String,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
    notify: Notify,
    closed: AtomicBool,
}

impl std::fmt::Debug for MessageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLedger")
            .field("queue_name", &self.queue_name)
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

impl MessageLedger {
    pub fn new(
        queue_name: impl Into<String>,
        sender_id: impl Into<String>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            sender_id: sender_id.into(),
            clock,
            state: Mutex::new(LedgerState {
                config,
                ..LedgerState::default()
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.state.lock().config.clone()
    }

    pub fn set_config(&self, config: QueueConfig) {
        self.state.lock().config = config;
    }

    /// Append a message. It is visible at once unless a delay applies
    /// (`delay_seconds`, or the queue default when `None`).
    pub fn send(&self, body: Bytes, delay_seconds: Option<u32>) -> Result<SentMessage, SqsError> {
        self.send_with_attributes(body, delay_seconds, MessageAttributes::new())
    }

    /// [`send`](Self::send) with custom message attributes. The body and the
    /// attributes together must fit the queue's maximum message size.
    pub fn send_with_attributes(
        &self,
        body: Bytes,
        delay_seconds: Option<u32>,
        message_attributes: MessageAttributes,
    ) -> Result<SentMessage, SqsError> {
        if self.is_closed() {
            return Err(SqsError::QueueNotFound(self.queue_name.clone()));
        }
        if body.is_empty() {
            return Err(SqsError::MissingParameter("MessageBody".to_string()));
        }
        validate_contents(&body)?;
        if let Some(delay) = delay_seconds {
            if delay > MAX_DELAY_SECONDS {
                return Err(SqsError::InvalidParameterValue(format!(
                    "DelaySeconds must be between 0 and {MAX_DELAY_SECONDS}, got {delay}"
                )));
            }
        }

        let now = self.clock.now_millis();
        let message_id = uuid::Uuid::new_v4().to_string();
        let md5_of_body = hex::encode(Md5::digest(&body));
        let md5_of_message_attributes = message_attributes::md5_of(&message_attributes);
        let size = body.len() + message_attributes::encoded_size(&message_attributes);

        let visible = {
            let mut state = self.state.lock();
            let max_size = state.config.maximum_message_size as usize;
            if size > max_size {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Message must be shorter than {max_size} bytes"
                )));
            }

            let delay = delay_seconds.unwrap_or(state.config.delay_seconds);
            let visibility = if delay == 0 {
                Visibility::Visible
            } else {
                Visibility::Delayed {
                    until: now + i64::from(delay) * 1000,
                }
            };

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let visible = visibility == Visibility::Visible;
            if visible {
                state.visible.insert(sequence);
            }
            state.messages.insert(
                sequence,
                StoredMessage {
                    message_id: message_id.clone(),
                    body,
                    md5_of_body: md5_of_body.clone(),
                    message_attributes,
                    md5_of_message_attributes: md5_of_message_attributes.clone(),
                    sender_id: self.sender_id.clone(),
                    sent_timestamp: now,
                    receive_count: 0,
                    first_receive_timestamp: None,
                    visibility,
                },
            );
            visible
        };

        if visible {
            self.notify.notify_waiters();
        }

        debug!(queue = %self.queue_name, message_id = %message_id, visible, "Sent message");
        Ok(SentMessage {
            message_id,
            md5_of_body,
            md5_of_message_attributes,
        })
    }

    /// Take up to `max` visible messages without waiting
    pub fn try_receive(&self, max: usize, visibility_timeout: Option<u32>) -> Vec<ReceivedMessage> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let timeout = visibility_timeout.unwrap_or(state.config.visibility_timeout);
        let deadline = now + i64::from(timeout) * 1000;

        let picked: Vec<u64> = state.visible.iter().take(max).copied().collect();
        let mut delivered = Vec::with_capacity(picked.len());

        for sequence in picked {
            state.visible.remove(&sequence);
            let Some(message) = state.messages.get_mut(&sequence) else {
                continue;
            };

            let receipt_handle = new_receipt_handle(&message.message_id);
            message.receive_count += 1;
            let first_receive_timestamp = *message.first_receive_timestamp.get_or_insert(now);
            message.visibility = Visibility::InFlight {
                receipt_handle: receipt_handle.clone(),
                deadline,
            };

            delivered.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                md5_of_body: message.md5_of_body.clone(),
                message_attributes: message.message_attributes.clone(),
                sender_id: message.sender_id.clone(),
                sent_timestamp: message.sent_timestamp,
                receive_count: message.receive_count,
                first_receive_timestamp,
            });
            state.handles.insert(receipt_handle, sequence);
        }

        if !delivered.is_empty() {
            debug!(queue = %self.queue_name, count = delivered.len(), "Received messages");
        }
        delivered
    }

    /// Receive up to `max` messages, waiting up to `wait` for the first one
    /// to become visible.
    ///
    /// An elapsed wait is not an error: the result is simply empty. Dropping
    /// the future abandons the wait without touching ledger state.
    pub async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility_timeout: Option<u32>,
    ) -> Vec<ReceivedMessage> {
        let give_up_at = tokio::time::Instant::now() + wait;

        loop {
            // Register interest before looking, so a send landing between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Vec::new();
            }

            let batch = self.try_receive(max, visibility_timeout);
            if !batch.is_empty() || wait.is_zero() {
                return batch;
            }

            if tokio::time::timeout_at(give_up_at, notified).await.is_err() {
                debug!(queue = %self.queue_name, wait_ms = wait.as_millis() as u64, "Long poll elapsed");
                return Vec::new();
            }
        }
    }

    /// Delete the message currently addressed by `receipt_handle`
    pub fn delete_message(&self, receipt_handle: &str) -> Result<(), SqsError> {
        let mut state = self.state.lock();
        let sequence = state
            .handles
            .get(receipt_handle)
            .copied()
            .ok_or_else(|| SqsError::InvalidReceiptHandle(receipt_handle.to_string()))?;
        let message = state.remove(sequence);

        if let Some(message) = message {
            debug!(queue = %self.queue_name, message_id = %message.message_id, "Deleted message");
        }
        Ok(())
    }

    /// Move the deadline of an in-flight message to now + `timeout` seconds.
    /// A timeout of zero makes it visible again straight away.
    pub fn change_visibility(&self, receipt_handle: &str, timeout: u32) -> Result<(), SqsError> {
        if timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidParameterValue(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {timeout}"
            )));
        }

        let now = self.clock.now_millis();
        {
            let mut state = self.state.lock();
            let sequence = state
                .handles
                .get(receipt_handle)
                .copied()
                .ok_or_else(|| SqsError::InvalidReceiptHandle(receipt_handle.to_string()))?;

            if timeout == 0 {
                state.make_visible(sequence);
            } else if let Some(message) = state.messages.get_mut(&sequence) {
                if let Visibility::InFlight { deadline, .. } = &mut message.visibility {
                    *deadline = now + i64::from(timeout) * 1000;
                }
                return Ok(());
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Return timed-out in-flight messages to visibility, release delayed
    /// messages whose delay elapsed and drop messages past retention.
    pub fn reap(&self) -> ReapReport {
        let now = self.clock.now_millis();
        let mut report = ReapReport::default();

        {
            let mut state = self.state.lock();
            let retention_ms = i64::from(state.config.message_retention_period) * 1000;

            let mut expired = Vec::new();
            let mut due = Vec::new();
            for (&sequence, message) in &state.messages {
                if message.sent_timestamp + retention_ms <= now {
                    expired.push(sequence);
                    continue;
                }
                match message.visibility {
                    Visibility::InFlight { deadline, .. } if deadline <= now => {
                        report.returned += 1;
                        due.push(sequence);
                    }
                    Visibility::Delayed { until } if until <= now => {
                        report.released += 1;
                        due.push(sequence);
                    }
                    _ => {}
                }
            }

            for sequence in expired {
                state.remove(sequence);
                report.expired += 1;
            }
            for sequence in due {
                state.make_visible(sequence);
            }
        }

        if report.returned + report.released > 0 {
            self.notify.notify_waiters();
        }
        if !report.is_empty() {
            debug!(
                queue = %self.queue_name,
                returned = report.returned,
                released = report.released,
                expired = report.expired,
                "Reaped messages"
            );
        }
        report
    }

    /// Drop every message, returning how many were removed
    pub fn purge(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.messages.len();
        state.messages.clear();
        state.visible.clear();
        state.handles.clear();
        count
    }

    pub fn counts(&self) -> LedgerCounts {
        let state = self.state.lock();
        let delayed = state
            .messages
            .values()
            .filter(|m| matches!(m.visibility, Visibility::Delayed { .. }))
            .count();
        LedgerCounts {
            visible: state.visible.len(),
            in_flight: state.handles.len(),
            delayed,
        }
    }

    /// Mark the ledger as gone and wake every waiting receiver
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Bodies must be text that XML 1.0 can carry
fn validate_contents(body: &[u8]) -> Result<(), SqsError> {
    let text = std::str::from_utf8(body).map_err(|_| {
        SqsError::InvalidMessageContents("message body is not valid UTF-8".to_string())
    })?;
    match first_invalid_char(text) {
        Some(c) => Err(SqsError::InvalidMessageContents(format!(
            "U+{:04X} in message body",
            u32::from(c)
        ))),
        None => Ok(()),
    }
}

fn new_receipt_handle(message_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{}", message_id, uuid::Uuid::new_v4().simple()))
}
