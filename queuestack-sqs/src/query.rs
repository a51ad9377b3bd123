//! Query protocol: form-encoded requests, XML responses

use once_cell::sync::Lazy;
use queuestack_core::xml::escape_xml;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::dispatcher::{MessageView, Outcome, ParamSource};
use crate::message_attributes::MessageAttributes;

pub const XMLNS: &str = "http://queue.amazonaws.com/doc/2012-11-05/";

/// `Attribute.3.Name`, `Attribute.3.Value`, `Tag.1.Key`
static MAP_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+)\.(\d+)\.(Name|Key|Value)$").expect("valid map entry regex")
});

/// `MessageAttribute.1.Value.StringValue`
static NESTED_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+)\.(\d+)\.Value\.(\w+)$").expect("valid nested field regex")
});

/// `AttributeName.2`
static LIST_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\.(\d+)$").expect("valid list entry regex"));

/// Flat form parameters as sent by the Query protocol
#[derive(Debug, Default, Clone)]
pub struct FormParams {
    params: HashMap<String, String>,
}

impl FormParams {
    /// Merge the query string and body, the body winning on conflicts
    pub fn parse(query: &[u8], body: &[u8]) -> Self {
        let params = form_urlencoded::parse(query)
            .chain(form_urlencoded::parse(body))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { params }
    }

    pub fn action(&self) -> Option<&str> {
        self.params.get("Action").map(String::as_str)
    }

    /// Set `name` unless the request already carries it
    pub fn insert_default(&mut self, name: &str, value: String) {
        self.params.entry(name.to_string()).or_insert(value);
    }
}

impl ParamSource for FormParams {
    fn string(&self, name: &str) -> Option<String> {
        self.params.get(name).cloned()
    }

    /// `Attributes` is sent as `Attribute.N.Name` / `Attribute.N.Value` pairs,
    /// `Tags` as `Tag.N.Key` / `Tag.N.Value`
    fn map(&self, name: &str) -> HashMap<String, String> {
        let prefix = name.strip_suffix('s').unwrap_or(name);
        let mut names: BTreeMap<u32, &str> = BTreeMap::new();
        let mut values: BTreeMap<u32, &str> = BTreeMap::new();

        for (key, value) in &self.params {
            let Some(caps) = MAP_ENTRY.captures(key) else {
                continue;
            };
            if &caps[1] != prefix {
                continue;
            }
            let Ok(index) = caps[2].parse::<u32>() else {
                continue;
            };
            match &caps[3] {
                "Value" => values.insert(index, value),
                _ => names.insert(index, value),
            };
        }

        names
            .into_iter()
            .filter_map(|(index, name)| {
                values
                    .get(&index)
                    .map(|value| (name.to_string(), (*value).to_string()))
            })
            .collect()
    }

    /// `AttributeNames` is sent as `AttributeName.N`
    fn list(&self, name: &str) -> Vec<String> {
        let prefix = name.strip_suffix('s').unwrap_or(name);
        let mut entries: BTreeMap<u32, &str> = BTreeMap::new();

        for (key, value) in &self.params {
            let Some(caps) = LIST_ENTRY.captures(key) else {
                continue;
            };
            if &caps[1] != prefix {
                continue;
            }
            if let Ok(index) = caps[2].parse::<u32>() {
                entries.insert(index, value);
            }
        }

        entries.into_values().map(str::to_string).collect()
    }

    /// `MessageAttributes` is sent as `MessageAttribute.N.Name` plus
    /// `MessageAttribute.N.Value.<Field>` entries
    fn nested_map(&self, name: &str) -> HashMap<String, HashMap<String, String>> {
        let prefix = name.strip_suffix('s').unwrap_or(name);
        let mut names: BTreeMap<u32, &str> = BTreeMap::new();
        let mut fields: BTreeMap<u32, HashMap<String, String>> = BTreeMap::new();

        for (key, value) in &self.params {
            if let Some(caps) = MAP_ENTRY.captures(key) {
                if &caps[1] == prefix && &caps[3] == "Name" {
                    if let Ok(index) = caps[2].parse::<u32>() {
                        names.insert(index, value);
                    }
                }
            } else if let Some(caps) = NESTED_FIELD.captures(key) {
                if &caps[1] == prefix {
                    if let Ok(index) = caps[2].parse::<u32>() {
                        fields
                            .entry(index)
                            .or_default()
                            .insert(caps[3].to_string(), value.clone());
                    }
                }
            }
        }

        names
            .into_iter()
            .map(|(index, name)| (name.to_string(), fields.remove(&index).unwrap_or_default()))
            .collect()
    }
}

/// Render a successful outcome as `<{action}Response>`
pub fn encode(action: &str, outcome: &Outcome, request_id: &str) -> String {
    let result = match outcome {
        Outcome::QueueUrl(url) => format!("<QueueUrl>{}</QueueUrl>", escape_xml(url)),
        Outcome::QueueUrls { urls, next_token } => {
            let mut xml: String = urls
                .iter()
                .map(|url| format!("<QueueUrl>{}</QueueUrl>", escape_xml(url)))
                .collect();
            if let Some(token) = next_token {
                let _ = write!(xml, "<NextToken>{}</NextToken>", escape_xml(token));
            }
            xml
        }
        Outcome::Attributes(attributes) => attribute_elements("Attribute", attributes),
        Outcome::Tags(tags) => tags
            .iter()
            .map(|(key, value)| {
                format!(
                    "<Tag><Key>{}</Key><Value>{}</Value></Tag>",
                    escape_xml(key),
                    escape_xml(value)
                )
            })
            .collect(),
        Outcome::MessageSent(sent) => format!(
            "<MessageId>{}</MessageId><MD5OfMessageBody>{}</MD5OfMessageBody>{}",
            sent.message_id,
            sent.md5_of_body,
            md5_of_attributes_element(sent.md5_of_message_attributes.as_deref())
        ),
        Outcome::Messages(messages) => messages.iter().map(message_element).collect(),
        Outcome::Empty => String::new(),
    };

    let result = if matches!(outcome, Outcome::Empty) {
        String::new()
    } else {
        format!("<{action}Result>{result}</{action}Result>")
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<{action}Response xmlns="{XMLNS}">{result}<ResponseMetadata><RequestId>{request_id}</RequestId></ResponseMetadata></{action}Response>"#
    )
}

fn attribute_elements(tag: &str, attributes: &BTreeMap<String, String>) -> String {
    let mut xml = String::new();
    for (name, value) in attributes {
        let _ = write!(
            xml,
            "<{tag}><Name>{}</Name><Value>{}</Value></{tag}>",
            escape_xml(name),
            escape_xml(value)
        );
    }
    xml
}

fn md5_of_attributes_element(md5: Option<&str>) -> String {
    md5.map(|md5| format!("<MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>"))
        .unwrap_or_default()
}

fn message_attribute_elements(attributes: &MessageAttributes) -> String {
    let mut xml = String::new();
    for (name, attribute) in attributes {
        let value = match (attribute.string_value(), attribute.binary_base64()) {
            (Some(s), _) => format!("<StringValue>{}</StringValue>", escape_xml(s)),
            (None, Some(b)) => format!("<BinaryValue>{b}</BinaryValue>"),
            (None, None) => String::new(),
        };
        let _ = write!(
            xml,
            "<MessageAttribute><Name>{}</Name><Value><DataType>{}</DataType>{value}</Value></MessageAttribute>",
            escape_xml(name),
            escape_xml(&attribute.data_type)
        );
    }
    xml
}

fn message_element(view: &MessageView) -> String {
    let message = &view.message;
    format!(
        "<Message><MessageId>{}</MessageId><ReceiptHandle>{}</ReceiptHandle><MD5OfBody>{}</MD5OfBody><Body>{}</Body>{}{}{}</Message>",
        message.message_id,
        escape_xml(&message.receipt_handle),
        message.md5_of_body,
        escape_xml(&message.body_str()),
        attribute_elements("Attribute", &view.attributes),
        md5_of_attributes_element(view.md5_of_message_attributes.as_deref()),
        message_attribute_elements(&view.message_attributes)
    )
}
