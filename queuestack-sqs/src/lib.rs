//! SQS-compatible message queue broker
//!
//! Provides in-memory queues with:
//! - CreateQueue, GetQueueUrl, ListQueues, DeleteQueue, PurgeQueue
//! - GetQueueAttributes, SetQueueAttributes
//! - SendMessage (with message attributes), ReceiveMessage (with long
//!   polling), DeleteMessage, ChangeMessageVisibility
//! - TagQueue, UntagQueue, ListQueueTags
//! - Both the Query (form/XML) and JSON 1.0 wire protocols

pub mod attributes;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod json;
pub mod ledger;
pub mod message_attributes;
pub mod query;
pub mod scheduler;
pub mod store;

pub use attributes::QueueConfig;
pub use dispatcher::{Action, Outcome, RequestDispatcher};
pub use error::SqsError;
pub use handlers::{handle_request, routes, SqsState};
pub use ledger::MessageLedger;
pub use message_attributes::{MessageAttribute, MessageAttributes};
pub use scheduler::VisibilityScheduler;
pub use store::{QueueStore, StoreConfig};
