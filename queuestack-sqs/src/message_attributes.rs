//! Custom message attributes
//!
//! Attributes travel with a message from send to every receive. The digest
//! follows the SQS encoding: for each attribute in name order, the
//! length-prefixed name and data type, a transport byte (1 for string, 2 for
//! binary) and the length-prefixed value, with lengths as big-endian `u32`.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use queuestack_core::xml::first_invalid_char;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::attributes::ALL;
use crate::error::SqsError;

pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;
const MAX_NAME_LEN: usize = 256;
const RESERVED_PREFIXES: &[&str] = &["aws.", "amazon."];

static ATTRIBUTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("valid attribute name regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttribute {
    /// `String`, `Number` or `Binary`, optionally with a `.custom` suffix
    pub data_type: String,
    pub value: AttributeValue,
}

/// Attributes keyed by name, kept in name order
pub type MessageAttributes = BTreeMap<String, MessageAttribute>;

impl MessageAttribute {
    pub fn string(data_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            value: AttributeValue::String(value.into()),
        }
    }

    pub fn binary(data_type: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            data_type: data_type.into(),
            value: AttributeValue::Binary(value.into()),
        }
    }

    /// Build from the wire fields `DataType`, `StringValue` and `BinaryValue`
    /// (base64)
    pub fn from_fields(name: &str, fields: &HashMap<String, String>) -> Result<Self, SqsError> {
        let data_type = fields
            .get("DataType")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SqsError::InvalidParameterValue(format!(
                    "The message attribute '{name}' must contain a non-empty message attribute type."
                ))
            })?;

        let base = data_type.split('.').next().unwrap_or_default();
        let custom = data_type.get(base.len()..).unwrap_or_default();
        if data_type.len() > MAX_NAME_LEN || custom == "." {
            return Err(invalid_type(name, data_type));
        }

        match base {
            "String" | "Number" => {
                let value = fields
                    .get("StringValue")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| missing_value(name))?;
                if let Some(c) = first_invalid_char(value) {
                    return Err(SqsError::InvalidMessageContents(format!(
                        "U+{:04X} in message attribute '{name}'",
                        u32::from(c)
                    )));
                }
                if base == "Number" && value.trim().parse::<f64>().is_err() {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Can't cast the value of message (user) attribute '{name}' to a number."
                    )));
                }
                Ok(Self::string(data_type.clone(), value.clone()))
            }
            "Binary" => {
                let encoded = fields
                    .get("BinaryValue")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| missing_value(name))?;
                let decoded = STANDARD.decode(encoded).map_err(|_| {
                    SqsError::InvalidParameterValue(format!(
                        "The binary value of message attribute '{name}' is not valid base64."
                    ))
                })?;
                Ok(Self::binary(data_type.clone(), decoded))
            }
            _ => Err(invalid_type(name, data_type)),
        }
    }

    pub fn string_value(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::String(s) => Some(s),
            AttributeValue::Binary(_) => None,
        }
    }

    pub fn binary_value(&self) -> Option<&Bytes> {
        match &self.value {
            AttributeValue::Binary(b) => Some(b),
            AttributeValue::String(_) => None,
        }
    }

    /// `BinaryValue` as it is written on the wire
    pub fn binary_base64(&self) -> Option<String> {
        self.binary_value().map(|b| STANDARD.encode(b))
    }

    fn value_len(&self) -> usize {
        match &self.value {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Binary(b) => b.len(),
        }
    }
}

fn invalid_type(name: &str, data_type: &str) -> SqsError {
    SqsError::InvalidParameterValue(format!(
        "The type of message (user) attribute '{name}' is invalid: {data_type}"
    ))
}

fn missing_value(name: &str) -> SqsError {
    SqsError::InvalidParameterValue(format!(
        "The message attribute '{name}' must contain a non-empty value of the message attribute type."
    ))
}

fn validate_name(name: &str) -> Result<(), SqsError> {
    let lower = name.to_ascii_lowercase();
    if name.len() > MAX_NAME_LEN
        || !ATTRIBUTE_NAME.is_match(name)
        || RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p))
    {
        return Err(SqsError::InvalidParameterValue(format!(
            "Message (user) attribute name '{name}' is invalid."
        )));
    }
    Ok(())
}

/// Validate raw `name -> {DataType, StringValue | BinaryValue}` entries
pub fn decode(raw: HashMap<String, HashMap<String, String>>) -> Result<MessageAttributes, SqsError> {
    if raw.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(SqsError::InvalidParameterValue(format!(
            "Number of message attributes [{}] exceeds the allowed maximum [{MAX_MESSAGE_ATTRIBUTES}].",
            raw.len()
        )));
    }

    raw.into_iter()
        .map(|(name, fields)| {
            validate_name(&name)?;
            let attribute = MessageAttribute::from_fields(&name, &fields)?;
            Ok((name, attribute))
        })
        .collect()
}

/// Bytes the attributes count against the queue's maximum message size
pub fn encoded_size(attributes: &MessageAttributes) -> usize {
    attributes
        .iter()
        .map(|(name, a)| name.len() + a.data_type.len() + a.value_len())
        .sum()
}

/// Hex MD5 of `attributes`, or `None` when there are none
pub fn md5_of(attributes: &MessageAttributes) -> Option<String> {
    if attributes.is_empty() {
        return None;
    }

    let mut hasher = Md5::new();
    for (name, attribute) in attributes {
        update_with_len(&mut hasher, name.as_bytes());
        update_with_len(&mut hasher, attribute.data_type.as_bytes());
        match &attribute.value {
            AttributeValue::String(s) => {
                hasher.update([1u8]);
                update_with_len(&mut hasher, s.as_bytes());
            }
            AttributeValue::Binary(b) => {
                hasher.update([2u8]);
                update_with_len(&mut hasher, b);
            }
        }
    }
    Some(hex::encode(hasher.finalize()))
}

fn update_with_len(hasher: &mut Md5, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

/// Attributes matching `names`: exact names, `prefix.*`, or `All` / `.*`
pub fn select(attributes: &MessageAttributes, names: &[String]) -> MessageAttributes {
    if names.iter().any(|n| n == ALL || n == ".*") {
        return attributes.clone();
    }

    attributes
        .iter()
        .filter(|(name, _)| {
            names.iter().any(|wanted| match wanted.strip_suffix('*') {
                Some(prefix) if prefix.ends_with('.') => name.starts_with(prefix),
                _ => wanted == *name,
            })
        })
        .map(|(name, a)| (name.clone(), a.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn sample() -> MessageAttributes {
        MessageAttributes::from([
            ("color".to_string(), MessageAttribute::string("String", "blue")),
            ("count".to_string(), MessageAttribute::string("Number", "3")),
            (
                "blob".to_string(),
                MessageAttribute::binary("Binary", vec![0u8, 1]),
            ),
        ])
    }

    #[test]
    fn test_md5_single_string_attribute() {
        let attributes = MessageAttributes::from([(
            "color".to_string(),
            MessageAttribute::string("String", "blue"),
        )]);
        assert_eq!(
            md5_of(&attributes).as_deref(),
            Some("da1b33cc3cbfe8b1630921e78e6b9880")
        );
    }

    #[test]
    fn test_md5_mixed_attributes() {
        assert_eq!(
            md5_of(&sample()).as_deref(),
            Some("2d685be6cb0fae4ab46f8f59dbeac10f")
        );
        assert_eq!(md5_of(&MessageAttributes::new()), None);
    }

    #[test]
    fn test_decode_string_number_and_binary() {
        let raw = HashMap::from([
            (
                "color".to_string(),
                fields(&[("DataType", "String"), ("StringValue", "blue")]),
            ),
            (
                "count".to_string(),
                fields(&[("DataType", "Number.int"), ("StringValue", "3")]),
            ),
            (
                "blob".to_string(),
                fields(&[("DataType", "Binary"), ("BinaryValue", "AAE=")]),
            ),
        ]);
        let attributes = decode(raw).unwrap();
        assert_eq!(attributes["color"].string_value(), Some("blue"));
        assert_eq!(attributes["count"].data_type, "Number.int");
        assert_eq!(
            attributes["blob"].binary_value(),
            Some(&Bytes::from_static(&[0, 1]))
        );
        assert_eq!(attributes["blob"].binary_base64().as_deref(), Some("AAE="));
    }

    #[test]
    fn test_decode_rejects_bad_entries() {
        let cases = [
            ("ok", fields(&[("StringValue", "x")])),
            ("ok", fields(&[("DataType", "Text"), ("StringValue", "x")])),
            ("ok", fields(&[("DataType", "String.")])),
            ("ok", fields(&[("DataType", "String"), ("StringValue", "")])),
            ("ok", fields(&[("DataType", "Number"), ("StringValue", "three")])),
            ("ok", fields(&[("DataType", "Binary"), ("BinaryValue", "!!")])),
            ("AWS.reserved", fields(&[("DataType", "String"), ("StringValue", "x")])),
            ("a..b", fields(&[("DataType", "String"), ("StringValue", "x")])),
            (".lead", fields(&[("DataType", "String"), ("StringValue", "x")])),
            ("has space", fields(&[("DataType", "String"), ("StringValue", "x")])),
        ];
        for (name, entry) in cases {
            let result = decode(HashMap::from([(name.to_string(), entry.clone())]));
            assert!(
                matches!(result, Err(SqsError::InvalidParameterValue(_))),
                "{name} {entry:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_invalid_characters() {
        let raw = HashMap::from([(
            "note".to_string(),
            fields(&[("DataType", "String"), ("StringValue", "a\u{1}b")]),
        )]);
        assert!(matches!(
            decode(raw),
            Err(SqsError::InvalidMessageContents(_))
        ));
    }

    #[test]
    fn test_decode_rejects_too_many() {
        let raw: HashMap<_, _> = (0..=MAX_MESSAGE_ATTRIBUTES)
            .map(|i| {
                (
                    format!("a{i}"),
                    fields(&[("DataType", "String"), ("StringValue", "x")]),
                )
            })
            .collect();
        assert!(matches!(decode(raw), Err(SqsError::InvalidParameterValue(_))));
    }

    #[test]
    fn test_select() {
        let mut attributes = sample();
        attributes.insert(
            "trace.id".to_string(),
            MessageAttribute::string("String", "t-1"),
        );
        attributes.insert(
            "trace.span".to_string(),
            MessageAttribute::string("String", "s-1"),
        );

        assert_eq!(select(&attributes, &[]).len(), 0);
        assert_eq!(select(&attributes, &["All".into()]).len(), 5);
        assert_eq!(select(&attributes, &[".*".into()]).len(), 5);

        let picked = select(&attributes, &["color".into(), "trace.*".into()]);
        assert_eq!(
            picked.keys().collect::<Vec<_>>(),
            ["color", "trace.id", "trace.span"]
        );
        assert!(select(&attributes, &["missing".into()]).is_empty());
    }

    #[test]
    fn test_encoded_size() {
        let attributes = MessageAttributes::from([(
            "color".to_string(),
            MessageAttribute::string("String", "blue"),
        )]);
        assert_eq!(encoded_size(&attributes), 5 + 6 + 4);
    }
}
