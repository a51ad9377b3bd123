//! Registry of named queues

use dashmap::{mapref::entry::Entry, DashMap};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use queuestack_core::Clock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::attributes::{self, QueueConfig, FIFO_QUEUE};
use crate::error::SqsError;
use crate::ledger::MessageLedger;

static QUEUE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,80}(\.fifo)?$").expect("valid queue name regex"));

const MAX_QUEUE_NAME_LEN: usize = 80;

pub const MAX_TAGS: usize = 50;
const MAX_TAG_KEY_LEN: usize = 128;
const MAX_TAG_VALUE_LEN: usize = 256;

/// Values baked into queue URLs and ARNs
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Scheme, host and port clients use to reach the broker
    pub base_url: String,
    pub account_id: String,
    pub region: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4566".to_string(),
            account_id: "000000000000".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub arn: String,
    /// Seconds since the epoch
    pub created_timestamp: i64,
    last_modified_timestamp: AtomicI64,
    tags: Mutex<BTreeMap<String, String>>,
    ledger: MessageLedger,
}

impl Queue {
    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn config(&self) -> QueueConfig {
        self.ledger.config()
    }

    pub fn last_modified_timestamp(&self) -> i64 {
        self.last_modified_timestamp.load(Ordering::SeqCst)
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.tags.lock().clone()
    }

    /// Add or overwrite tags, keeping the per-queue limit
    pub fn tag(&self, tags: &HashMap<String, String>) -> Result<(), SqsError> {
        validate_tags(tags)?;
        let mut current = self.tags.lock();
        let added = tags.keys().filter(|k| !current.contains_key(*k)).count();
        if current.len() + added > MAX_TAGS {
            return Err(SqsError::InvalidParameterValue(format!(
                "Too many tags added for queue {}: a queue holds at most {MAX_TAGS}",
                self.name
            )));
        }
        current.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    /// Remove tags by key; unknown keys are ignored
    pub fn untag(&self, keys: &[String]) {
        let mut current = self.tags.lock();
        for key in keys {
            current.remove(key);
        }
    }

    /// Every attribute GetQueueAttributes can report
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = self.config().to_attributes();
        let counts = self.ledger.counts();
        attributes.insert(attributes::QUEUE_ARN.into(), self.arn.clone());
        attributes.insert(
            attributes::CREATED_TIMESTAMP.into(),
            self.created_timestamp.to_string(),
        );
        attributes.insert(
            attributes::LAST_MODIFIED_TIMESTAMP.into(),
            self.last_modified_timestamp().to_string(),
        );
        attributes.insert(
            attributes::APPROXIMATE_NUMBER_OF_MESSAGES.into(),
            counts.visible.to_string(),
        );
        attributes.insert(
            attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE.into(),
            counts.in_flight.to_string(),
        );
        attributes.insert(
            attributes::APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED.into(),
            counts.delayed.to_string(),
        );
        attributes
    }
}

/// Owns every queue for the lifetime of the broker
#[derive(Debug)]
pub struct QueueStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    queues: DashMap<String, Arc<Queue>>,
}

impl QueueStore {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            queues: DashMap::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn queue_url(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_id,
            name
        )
    }

    fn queue_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:sqs:{}:{}:{}",
            self.config.region, self.config.account_id, name
        )
    }

    pub fn create_queue(&self, name: &str, config: QueueConfig) -> Result<Arc<Queue>, SqsError> {
        validate_queue_name(name)?;
        config.check_queue_type(name)?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SqsError::QueueAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let now = self.clock.now().timestamp();
                let queue = Arc::new(Queue {
                    name: name.to_string(),
                    url: self.queue_url(name),
                    arn: self.queue_arn(name),
                    created_timestamp: now,
                    last_modified_timestamp: AtomicI64::new(now),
                    tags: Mutex::new(BTreeMap::new()),
                    ledger: MessageLedger::new(
                        name,
                        self.config.account_id.clone(),
                        config,
                        self.clock.clone(),
                    ),
                });
                info!(name = %name, url = %queue.url, "Creating queue");
                slot.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<Queue>, SqsError> {
        self.queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Resolve a queue URL (or a bare queue name) to its queue
    pub fn get_queue_by_url(&self, url: &str) -> Result<Arc<Queue>, SqsError> {
        self.get_queue(queue_name_from_url(url))
    }

    pub fn delete_queue(&self, name: &str) -> Result<(), SqsError> {
        let (_, queue) = self
            .queues
            .remove(name)
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))?;

        info!(name = %name, "Deleting queue");
        queue.ledger.close();
        Ok(())
    }

    /// Queues whose name starts with `prefix`, in name order, skipping every
    /// name up to and including `after`
    pub fn list_queues(&self, prefix: Option<&str>, after: Option<&str>) -> Vec<Arc<Queue>> {
        let mut matching: Vec<Arc<Queue>> = self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .filter(|q| after.map_or(true, |a| q.key().as_str() > a))
            .map(|q| q.value().clone())
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }

    pub fn set_queue_attributes(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), SqsError> {
        if attributes.contains_key(FIFO_QUEUE) {
            return Err(SqsError::InvalidAttributeName(FIFO_QUEUE.to_string()));
        }
        let queue = self.get_queue(name)?;
        let mut config = queue.config();
        config.apply(attributes)?;
        config.check_queue_type(name)?;
        queue.ledger.set_config(config);
        queue
            .last_modified_timestamp
            .store(self.clock.now().timestamp(), Ordering::SeqCst);

        info!(name = %name, count = attributes.len(), "Updated queue attributes");
        Ok(())
    }

    /// Snapshot of every queue, for sweeps
    pub fn queues(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|q| q.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

fn validate_queue_name(name: &str) -> Result<(), SqsError> {
    if name.len() > MAX_QUEUE_NAME_LEN || !QUEUE_NAME.is_match(name) {
        return Err(SqsError::InvalidParameterValue(format!(
            "Can only include alphanumeric characters, hyphens, or underscores. 1 to 80 in length: {name}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_tags(tags: &HashMap<String, String>) -> Result<(), SqsError> {
    if tags.len() > MAX_TAGS {
        return Err(SqsError::InvalidParameterValue(format!(
            "A queue holds at most {MAX_TAGS} tags, got {}",
            tags.len()
        )));
    }
    for (key, value) in tags {
        if key.is_empty() || key.chars().count() > MAX_TAG_KEY_LEN {
            return Err(SqsError::InvalidParameterValue(format!(
                "Tag keys must be 1 to {MAX_TAG_KEY_LEN} characters: '{key}'"
            )));
        }
        if key.to_ascii_lowercase().starts_with("aws:") {
            return Err(SqsError::InvalidParameterValue(format!(
                "Tag keys starting with aws: are reserved: '{key}'"
            )));
        }
        if value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(SqsError::InvalidParameterValue(format!(
                "Tag values must be at most {MAX_TAG_VALUE_LEN} characters, key '{key}'"
            )));
        }
    }
    Ok(())
}

/// Last path segment of a queue URL
pub fn queue_name_from_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
