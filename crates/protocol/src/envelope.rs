use serde::{Deserialize, Serialize};

use crate::constants::{MessageType, STATUS_OK, status_text};

/// Envelope for all text communication.
///
/// Every message carries a `code` and `message` in the style of an HTTP
/// response body; requests use `200`. The `data` field uses
/// `serde_json::value::RawValue` to defer deserialization until the
/// receiver knows which type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Message {
    /// Creates a new message with the given type and data.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Self::with_code(id, msg_type, STATUS_OK, data)
    }

    /// Creates a message with an explicit status code.
    pub fn with_code<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        code: u16,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => {
                let json = serde_json::to_string(d)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            code,
            message: status_text(code).to_string(),
            data: raw,
        })
    }

    /// Deserializes the data field into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates an error message.
    ///
    /// An empty `message` falls back to the status text of `code`.
    pub fn error(id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            code,
            message: if message.is_empty() {
                status_text(code).to_string()
            } else {
                message
            },
            data: None,
        }
    }

    /// Creates a response message for this request.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        code: u16,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::with_code(&self.id, msg_type, code, data)
    }

    /// Creates an error response for this request.
    pub fn reply_error(&self, code: u16, message: impl Into<String>) -> Self {
        Message::error(&self.id, code, message)
    }

    /// Returns `true` for error replies.
    pub fn is_error(&self) -> bool {
        self.msg_type == MessageType::Error || self.code >= 400
    }
}
