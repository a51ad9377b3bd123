//! JSON 1.0 protocol: `X-Amz-Target: AmazonSQS.<Operation>`

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::dispatcher::{MessageView, Outcome, ParamSource};
use crate::error::SqsError;
use crate::message_attributes::MessageAttributes;

pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
pub const TARGET_PREFIX: &str = "AmazonSQS.";

/// A parsed JSON request body
#[derive(Debug, Clone)]
pub struct JsonParams {
    body: Map<String, Value>,
}

impl JsonParams {
    /// An empty body is treated as `{}`
    pub fn parse(body: &[u8]) -> Result<Self, SqsError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self { body: Map::new() });
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(body)) => Ok(Self { body }),
            Ok(_) => Err(SqsError::MalformedRequest(
                "Request body must be a JSON object".to_string(),
            )),
            Err(e) => Err(SqsError::MalformedRequest(e.to_string())),
        }
    }

    /// Set `name` unless the request already carries it
    pub fn insert_default(&mut self, name: &str, value: String) {
        self.body
            .entry(name.to_string())
            .or_insert(Value::String(value));
    }
}

impl ParamSource for JsonParams {
    fn string(&self, name: &str) -> Option<String> {
        match self.body.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn map(&self, name: &str) -> HashMap<String, String> {
        match self.body.get(name) {
            Some(Value::Object(entries)) => scalar_entries(entries),
            _ => HashMap::new(),
        }
    }

    fn list(&self, name: &str) -> Vec<String> {
        let Some(Value::Array(items)) = self.body.get(name) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    fn nested_map(&self, name: &str) -> HashMap<String, HashMap<String, String>> {
        let Some(Value::Object(entries)) = self.body.get(name) else {
            return HashMap::new();
        };
        entries
            .iter()
            .map(|(k, v)| {
                let fields = match v {
                    Value::Object(fields) => scalar_entries(fields),
                    _ => HashMap::new(),
                };
                (k.clone(), fields)
            })
            .collect()
    }
}

/// String, number and bool members of an object, as text
fn scalar_entries(entries: &Map<String, Value>) -> HashMap<String, String> {
    entries
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}

/// Operation name from an `X-Amz-Target` value
pub fn operation_from_target(target: &str) -> Option<&str> {
    target.strip_prefix(TARGET_PREFIX)
}

pub fn encode(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::QueueUrl(url) => json!({ "QueueUrl": url }),
        Outcome::QueueUrls { urls, next_token } => {
            let mut value = json!({ "QueueUrls": urls });
            if let Some(token) = next_token {
                value["NextToken"] = json!(token);
            }
            value
        }
        Outcome::Attributes(attributes) => json!({ "Attributes": attributes }),
        Outcome::Tags(tags) => json!({ "Tags": tags }),
        Outcome::MessageSent(sent) => {
            let mut value = json!({
                "MessageId": sent.message_id,
                "MD5OfMessageBody": sent.md5_of_body,
            });
            if let Some(md5) = &sent.md5_of_message_attributes {
                value["MD5OfMessageAttributes"] = json!(md5);
            }
            value
        }
        Outcome::Messages(messages) => {
            let messages: Vec<Value> = messages.iter().map(message_value).collect();
            json!({ "Messages": messages })
        }
        Outcome::Empty => json!({}),
    }
}

fn message_value(view: &MessageView) -> Value {
    let message = &view.message;
    let mut value = json!({
        "MessageId": message.message_id,
        "ReceiptHandle": message.receipt_handle,
        "MD5OfBody": message.md5_of_body,
        "Body": message.body_str(),
    });
    if !view.attributes.is_empty() {
        value["Attributes"] = json!(view.attributes);
    }
    if let Some(md5) = &view.md5_of_message_attributes {
        value["MD5OfMessageAttributes"] = json!(md5);
        value["MessageAttributes"] = message_attributes_value(&view.message_attributes);
    }
    value
}

fn message_attributes_value(attributes: &MessageAttributes) -> Value {
    let entries: Map<String, Value> = attributes
        .iter()
        .map(|(name, attribute)| {
            let mut entry = json!({ "DataType": attribute.data_type });
            if let Some(s) = attribute.string_value() {
                entry["StringValue"] = json!(s);
            }
            if let Some(b) = attribute.binary_base64() {
                entry["BinaryValue"] = json!(b);
            }
            (name.clone(), entry)
        })
        .collect();
    Value::Object(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Action;
    use crate::ledger::SentMessage;

    #[test]
    fn test_parse_empty_body() {
        let params = JsonParams::parse(b"").unwrap();
        assert_eq!(params.string("QueueUrl"), None);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            JsonParams::parse(b"[1,2]"),
            Err(SqsError::MalformedRequest(_))
        ));
        assert!(matches!(
            JsonParams::parse(b"{not json"),
            Err(SqsError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_numbers_read_as_strings() {
        let params = JsonParams::parse(br#"{"QueueUrl":"u","MaxNumberOfMessages":5}"#).unwrap();
        assert_eq!(params.string("MaxNumberOfMessages").as_deref(), Some("5"));
    }

    #[test]
    fn test_decode_create_queue_with_attributes() {
        let params = JsonParams::parse(
            br#"{"QueueName":"q","Attributes":{"VisibilityTimeout":"5","DelaySeconds":"1"}}"#,
        )
        .unwrap();
        let Action::CreateQueue {
            queue_name,
            attributes,
            ..
        } = Action::decode("CreateQueue", &params).unwrap()
        else {
            panic!("expected CreateQueue");
        };
        assert_eq!(queue_name, "q");
        assert_eq!(attributes["VisibilityTimeout"], "5");
        assert_eq!(attributes.len(), 2);
    }

    #[test]
    fn test_receive_merges_attribute_name_lists() {
        let params = JsonParams::parse(
            br#"{"QueueUrl":"u","AttributeNames":["SentTimestamp"],"MessageSystemAttributeNames":["ApproximateReceiveCount"]}"#,
        )
        .unwrap();
        let Action::ReceiveMessage {
            attribute_names, ..
        } = Action::decode("ReceiveMessage", &params).unwrap()
        else {
            panic!("expected ReceiveMessage");
        };
        assert_eq!(attribute_names, vec!["SentTimestamp", "ApproximateReceiveCount"]);
    }

    #[test]
    fn test_operation_from_target() {
        assert_eq!(operation_from_target("AmazonSQS.SendMessage"), Some("SendMessage"));
        assert_eq!(operation_from_target("DynamoDB_20120810.GetItem"), None);
    }

    #[test]
    fn test_encode_outcomes() {
        assert_eq!(encode(&Outcome::Empty), json!({}));
        assert_eq!(
            encode(&Outcome::QueueUrl("u".into())),
            json!({ "QueueUrl": "u" })
        );
        let sent = encode(&Outcome::MessageSent(SentMessage {
            message_id: "m".into(),
            md5_of_body: "d".into(),
            md5_of_message_attributes: Some("a".into()),
        }));
        assert_eq!(sent["MessageId"], "m");
        assert_eq!(sent["MD5OfMessageBody"], "d");
        assert_eq!(sent["MD5OfMessageAttributes"], "a");

        assert_eq!(
            encode(&Outcome::QueueUrls {
                urls: vec!["u".into()],
                next_token: Some("t".into()),
            }),
            json!({ "QueueUrls": ["u"], "NextToken": "t" })
        );
        assert_eq!(
            encode(&Outcome::Tags(
                [("team".to_string(), "payments".to_string())].into()
            )),
            json!({ "Tags": { "team": "payments" } })
        );
    }

    #[test]
    fn test_decode_send_message_attributes() {
        let params = JsonParams::parse(
            br#"{"QueueUrl":"u","MessageBody":"b","MessageAttributes":{
                "color":{"DataType":"String","StringValue":"blue"},
                "blob":{"DataType":"Binary","BinaryValue":"AAE="}}}"#,
        )
        .unwrap();
        let Action::SendMessage {
            message_attributes, ..
        } = Action::decode("SendMessage", &params).unwrap()
        else {
            panic!("expected SendMessage");
        };
        assert_eq!(message_attributes.len(), 2);
        assert_eq!(message_attributes["color"].string_value(), Some("blue"));
        assert_eq!(
            message_attributes["blob"].binary_value().map(|b| b.to_vec()),
            Some(vec![0u8, 1])
        );
    }

    #[test]
    fn test_decode_create_queue_lowercase_tags() {
        let params =
            JsonParams::parse(br#"{"QueueName":"q","tags":{"team":"payments"}}"#).unwrap();
        let Action::CreateQueue { tags, .. } = Action::decode("CreateQueue", &params).unwrap()
        else {
            panic!("expected CreateQueue");
        };
        assert_eq!(tags["team"], "payments");
    }

    #[test]
    fn test_encode_message_attributes() {
        use crate::ledger::ReceivedMessage;
        use crate::message_attributes::MessageAttribute;

        let attributes = MessageAttributes::from([
            ("blob".to_string(), MessageAttribute::binary("Binary", vec![0u8, 1])),
            ("count".to_string(), MessageAttribute::string("Number", "3")),
        ]);
        let view = MessageView {
            message: ReceivedMessage {
                message_id: "m".into(),
                receipt_handle: "h".into(),
                body: bytes::Bytes::from("x"),
                md5_of_body: "d".into(),
                message_attributes: attributes.clone(),
                sender_id: "000000000000".into(),
                sent_timestamp: 1,
                receive_count: 1,
                first_receive_timestamp: 1,
            },
            attributes: Default::default(),
            md5_of_message_attributes: Some("abc".into()),
            message_attributes: attributes,
        };
        let value = encode(&Outcome::Messages(vec![view]));
        let message = &value["Messages"][0];
        assert_eq!(message["MD5OfMessageAttributes"], "abc");
        assert_eq!(
            message["MessageAttributes"],
            json!({
                "blob": { "DataType": "Binary", "BinaryValue": "AAE=" },
                "count": { "DataType": "Number", "StringValue": "3" }
            })
        );
        assert!(message.get("Attributes").is_none());
    }
}
