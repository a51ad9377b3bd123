//! Query protocol client for the broker

use reqwest::Client;
use std::collections::HashMap;

/// Client speaking the form/XML Query protocol
pub struct QueueStackClient {
    base_url: String,
    client: Client,
}

/// A message as returned by ReceiveMessage
#[derive(Debug, Clone)]
pub struct SqsMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub md5_of_body: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    /// String-typed message attributes, by name
    pub message_attributes: HashMap<String, String>,
    pub md5_of_message_attributes: Option<String>,
}

impl SqsMessage {
    /// `ApproximateReceiveCount`, when it was requested
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|c| c.parse().ok())
    }
}

/// Options for ReceiveMessage; unset fields are left to the queue
#[derive(Debug, Clone, Default)]
pub struct Receive {
    pub max_number_of_messages: Option<u32>,
    pub wait_time_seconds: Option<u32>,
    pub visibility_timeout: Option<u32>,
    pub message_attribute_names: Vec<String>,
}

/// One page of ListQueues
#[derive(Debug, Clone, Default)]
pub struct QueuePage {
    pub urls: Vec<String>,
    pub next_token: Option<String>,
}

impl QueueStackClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Post one action and return the response XML
    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String, ClientError> {
        let mut form = vec![("Action", action)];
        form.extend_from_slice(params);

        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(ClientError::Service {
                code: extract_xml_value(&text, "Code").unwrap_or_default(),
                message: extract_xml_value(&text, "Message").unwrap_or_default(),
            })
        }
    }

    pub async fn create_queue(&self, name: &str) -> Result<String, ClientError> {
        self.create_queue_with_attributes(name, &[]).await
    }

    pub async fn create_queue_with_attributes(
        &self,
        name: &str,
        attributes: &[(&str, &str)],
    ) -> Result<String, ClientError> {
        let attribute_params = attribute_params(attributes);
        let mut params: Vec<(&str, &str)> = vec![("QueueName", name)];
        params.extend(attribute_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let text = self.call("CreateQueue", &params).await?;
        required_value(&text, "QueueUrl")
    }

    pub async fn get_queue_url(&self, name: &str) -> Result<String, ClientError> {
        let text = self.call("GetQueueUrl", &[("QueueName", name)]).await?;
        required_value(&text, "QueueUrl")
    }

    pub async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, ClientError> {
        let params: Vec<(&str, &str)> = prefix
            .map(|p| vec![("QueueNamePrefix", p)])
            .unwrap_or_default();
        let text = self.call("ListQueues", &params).await?;
        Ok(extract_xml_blocks(&text, "QueueUrl")
            .into_iter()
            .map(|url| unescape_xml(&url))
            .collect())
    }

    /// One ListQueues page, following `next_token` when given
    pub async fn list_queues_page(
        &self,
        max_results: u32,
        next_token: Option<&str>,
    ) -> Result<QueuePage, ClientError> {
        let max = max_results.to_string();
        let mut params = vec![("MaxResults", max.as_str())];
        if let Some(token) = next_token {
            params.push(("NextToken", token));
        }
        let text = self.call("ListQueues", &params).await?;
        Ok(QueuePage {
            urls: extract_xml_blocks(&text, "QueueUrl")
                .into_iter()
                .map(|url| unescape_xml(&url))
                .collect(),
            next_token: extract_xml_value(&text, "NextToken"),
        })
    }

    pub async fn delete_queue(&self, queue_url: &str) -> Result<(), ClientError> {
        self.call("DeleteQueue", &[("QueueUrl", queue_url)]).await?;
        Ok(())
    }

    pub async fn purge_queue(&self, queue_url: &str) -> Result<(), ClientError> {
        self.call("PurgeQueue", &[("QueueUrl", queue_url)]).await?;
        Ok(())
    }

    pub async fn get_queue_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> Result<HashMap<String, String>, ClientError> {
        let keys: Vec<String> = (1..=names.len()).map(|i| format!("AttributeName.{i}")).collect();
        let mut params = vec![("QueueUrl", queue_url)];
        params.extend(keys.iter().map(String::as_str).zip(names.iter().copied()));

        let text = self.call("GetQueueAttributes", &params).await?;
        Ok(parse_attributes(&text))
    }

    pub async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &[(&str, &str)],
    ) -> Result<(), ClientError> {
        let attribute_params = attribute_params(attributes);
        let mut params = vec![("QueueUrl", queue_url)];
        params.extend(attribute_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        self.call("SetQueueAttributes", &params).await?;
        Ok(())
    }

    /// Send a message, returning its message ID
    pub async fn send_message(&self, queue_url: &str, body: &str) -> Result<String, ClientError> {
        let text = self
            .call("SendMessage", &[("QueueUrl", queue_url), ("MessageBody", body)])
            .await?;
        required_value(&text, "MessageId")
    }

    /// Send a message carrying string-typed message attributes
    pub async fn send_message_with_attributes(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &[(&str, &str)],
    ) -> Result<SendResult, ClientError> {
        let attribute_params = message_attribute_params(attributes);
        let mut params = vec![("QueueUrl", queue_url), ("MessageBody", body)];
        params.extend(attribute_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let text = self.call("SendMessage", &params).await?;
        Ok(SendResult {
            message_id: required_value(&text, "MessageId")?,
            md5_of_message_attributes: extract_xml_value(&text, "MD5OfMessageAttributes"),
        })
    }

    pub async fn send_message_with_delay(
        &self,
        queue_url: &str,
        body: &str,
        delay_seconds: u32,
    ) -> Result<String, ClientError> {
        let delay = delay_seconds.to_string();
        let text = self
            .call(
                "SendMessage",
                &[
                    ("QueueUrl", queue_url),
                    ("MessageBody", body),
                    ("DelaySeconds", delay.as_str()),
                ],
            )
            .await?;
        required_value(&text, "MessageId")
    }

    /// Receive messages with every system attribute
    pub async fn receive_messages(
        &self,
        queue_url: &str,
        options: Receive,
    ) -> Result<Vec<SqsMessage>, ClientError> {
        let max = options.max_number_of_messages.map(|v| v.to_string());
        let wait = options.wait_time_seconds.map(|v| v.to_string());
        let visibility = options.visibility_timeout.map(|v| v.to_string());

        let mut params = vec![("QueueUrl", queue_url), ("AttributeName.1", "All")];
        if let Some(max) = &max {
            params.push(("MaxNumberOfMessages", max.as_str()));
        }
        if let Some(wait) = &wait {
            params.push(("WaitTimeSeconds", wait.as_str()));
        }
        if let Some(visibility) = &visibility {
            params.push(("VisibilityTimeout", visibility.as_str()));
        }
        let name_keys: Vec<String> = (1..=options.message_attribute_names.len())
            .map(|i| format!("MessageAttributeName.{i}"))
            .collect();
        params.extend(
            name_keys
                .iter()
                .map(String::as_str)
                .zip(options.message_attribute_names.iter().map(String::as_str)),
        );

        let text = self.call("ReceiveMessage", &params).await?;
        extract_xml_blocks(&text, "Message")
            .iter()
            .map(|block| {
                Ok(SqsMessage {
                    message_id: required_value(block, "MessageId")?,
                    receipt_handle: required_value(block, "ReceiptHandle")?,
                    md5_of_body: required_value(block, "MD5OfBody")?,
                    body: extract_xml_value(block, "Body").unwrap_or_default(),
                    attributes: parse_attributes(block),
                    message_attributes: parse_message_attributes(block),
                    md5_of_message_attributes: extract_xml_value(block, "MD5OfMessageAttributes"),
                })
            })
            .collect()
    }

    pub async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), ClientError> {
        self.call(
            "DeleteMessage",
            &[("QueueUrl", queue_url), ("ReceiptHandle", receipt_handle)],
        )
        .await?;
        Ok(())
    }

    pub async fn tag_queue(&self, queue_url: &str, tags: &[(&str, &str)]) -> Result<(), ClientError> {
        let tag_params = tag_params(tags);
        let mut params = vec![("QueueUrl", queue_url)];
        params.extend(tag_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        self.call("TagQueue", &params).await?;
        Ok(())
    }

    pub async fn untag_queue(&self, queue_url: &str, keys: &[&str]) -> Result<(), ClientError> {
        let key_names: Vec<String> = (1..=keys.len()).map(|i| format!("TagKey.{i}")).collect();
        let mut params = vec![("QueueUrl", queue_url)];
        params.extend(key_names.iter().map(String::as_str).zip(keys.iter().copied()));

        self.call("UntagQueue", &params).await?;
        Ok(())
    }

    pub async fn list_queue_tags(&self, queue_url: &str) -> Result<HashMap<String, String>, ClientError> {
        let text = self.call("ListQueueTags", &[("QueueUrl", queue_url)]).await?;
        Ok(extract_xml_blocks(&text, "Tag")
            .iter()
            .filter_map(|block| {
                Some((
                    extract_xml_value(block, "Key")?,
                    extract_xml_value(block, "Value")?,
                ))
            })
            .collect())
    }

    pub async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<(), ClientError> {
        let timeout = visibility_timeout.to_string();
        self.call(
            "ChangeMessageVisibility",
            &[
                ("QueueUrl", queue_url),
                ("ReceiptHandle", receipt_handle),
                ("VisibilityTimeout", timeout.as_str()),
            ],
        )
        .await?;
        Ok(())
    }
}

fn attribute_params(attributes: &[(&str, &str)]) -> Vec<(String, String)> {
    attributes
        .iter()
        .enumerate()
        .flat_map(|(i, (name, value))| {
            [
                (format!("Attribute.{}.Name", i + 1), (*name).to_string()),
                (format!("Attribute.{}.Value", i + 1), (*value).to_string()),
            ]
        })
        .collect()
}

fn message_attribute_params(attributes: &[(&str, &str)]) -> Vec<(String, String)> {
    attributes
        .iter()
        .enumerate()
        .flat_map(|(i, (name, value))| {
            let n = i + 1;
            [
                (format!("MessageAttribute.{n}.Name"), (*name).to_string()),
                (format!("MessageAttribute.{n}.Value.DataType"), "String".to_string()),
                (format!("MessageAttribute.{n}.Value.StringValue"), (*value).to_string()),
            ]
        })
        .collect()
}

fn tag_params(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .enumerate()
        .flat_map(|(i, (key, value))| {
            [
                (format!("Tag.{}.Key", i + 1), (*key).to_string()),
                (format!("Tag.{}.Value", i + 1), (*value).to_string()),
            ]
        })
        .collect()
}

fn parse_message_attributes(xml: &str) -> HashMap<String, String> {
    extract_xml_blocks(xml, "MessageAttribute")
        .iter()
        .filter_map(|block| {
            Some((
                extract_xml_value(block, "Name")?,
                extract_xml_value(block, "StringValue")?,
            ))
        })
        .collect()
}

fn parse_attributes(xml: &str) -> HashMap<String, String> {
    extract_xml_blocks(xml, "Attribute")
        .iter()
        .filter_map(|block| {
            Some((
                extract_xml_value(block, "Name")?,
                extract_xml_value(block, "Value")?,
            ))
        })
        .collect()
}

fn required_value(xml: &str, tag: &str) -> Result<String, ClientError> {
    extract_xml_value(xml, tag)
        .ok_or_else(|| ClientError::ParseError(format!("Missing <{tag}> in response")))
}

/// Helper to extract a value from XML
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    extract_xml_blocks(xml, tag)
        .into_iter()
        .next()
        .map(|v| unescape_xml(&v))
}

/// Raw contents of every `<tag>…</tag>` element, in document order
fn extract_xml_blocks(xml: &str, tag: &str) -> Vec<String> {
    let open_tag = format!("<{tag}>");
    let close_tag = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open_tag) {
        let after = &rest[start + open_tag.len()..];
        let Some(end) = after.find(&close_tag) else {
            break;
        };
        blocks.push(after[..end].to_string());
        rest = &after[end + close_tag.len()..];
    }
    blocks
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Result of a SendMessage carrying message attributes
#[derive(Debug, Clone)]
pub struct SendResult {
    pub message_id: String,
    pub md5_of_message_attributes: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("{code}: {message}")]
    Service { code: String, message: String },
}

impl ClientError {
    /// Error code for service errors
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_blocks() {
        let xml = "<R><Message><Body>a</Body></Message><Message><Body>b &amp; c</Body></Message></R>";
        let blocks = extract_xml_blocks(xml, "Message");
        assert_eq!(blocks.len(), 2);
        assert_eq!(extract_xml_value(&blocks[1], "Body").as_deref(), Some("b & c"));
    }

    #[test]
    fn test_attribute_params_are_numbered() {
        let params = attribute_params(&[("VisibilityTimeout", "5"), ("DelaySeconds", "1")]);
        assert_eq!(params[0], ("Attribute.1.Name".into(), "VisibilityTimeout".into()));
        assert_eq!(params[3], ("Attribute.2.Value".into(), "1".into()));
    }

    #[test]
    fn test_parse_attributes() {
        let xml = "<Attribute><Name>SentTimestamp</Name><Value>42</Value></Attribute>";
        assert_eq!(parse_attributes(xml)["SentTimestamp"], "42");
    }

    #[test]
    fn test_message_attributes_kept_apart_from_system_attributes() {
        let xml = "<Message><Attribute><Name>SenderId</Name><Value>1</Value></Attribute>\
                   <MessageAttribute><Name>color</Name><Value><DataType>String</DataType>\
                   <StringValue>blue</StringValue></Value></MessageAttribute></Message>";
        let system = parse_attributes(xml);
        assert_eq!(system.len(), 1);
        assert_eq!(system["SenderId"], "1");
        assert_eq!(parse_message_attributes(xml)["color"], "blue");
    }

    #[test]
    fn test_message_attribute_params_are_numbered() {
        let params = message_attribute_params(&[("color", "blue")]);
        assert_eq!(params[1], ("MessageAttribute.1.Value.DataType".into(), "String".into()));
        assert_eq!(params[2], ("MessageAttribute.1.Value.StringValue".into(), "blue".into()));
    }
}
