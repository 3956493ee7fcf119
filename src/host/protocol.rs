//! Wire types for the host protocol.
//!
//! Frames are single JSON objects terminated by a newline, discriminated by a
//! snake_case `type` field:
//! ```text
//! Server → Client: {"type":"welcome","message":"...","server_time":"..."}\n
//! Client → Server: {"type":"auth","username":"admin","password":"..."}\n
//! Server → Client: {"type":"auth_response","success":true,"token":"...","message":"..."}\n
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests sent from client to host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Exchange credentials for a session token
    Auth {
        #[serde(
            default,
            deserialize_with = "non_string_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        username: Option<String>,
        #[serde(
            default,
            deserialize_with = "non_string_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        password: Option<String>,
    },

    /// Run a shell command
    Command {
        #[serde(
            default,
            deserialize_with = "non_string_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        token: Option<String>,
        #[serde(
            default,
            deserialize_with = "non_string_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        command: Option<String>,
    },

    /// Describe the host
    SystemInfo {
        #[serde(
            default,
            deserialize_with = "non_string_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        token: Option<String>,
    },

    /// Any `type` this host does not understand
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        ClientMessage::Auth {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn command(token: impl Into<String>, command: impl Into<String>) -> Self {
        ClientMessage::Command {
            token: Some(token.into()),
            command: Some(command.into()),
        }
    }

    pub fn system_info(token: impl Into<String>) -> Self {
        ClientMessage::SystemInfo {
            token: Some(token.into()),
        }
    }

    /// Wire name of the request type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Command { .. } => "command",
            ClientMessage::SystemInfo { .. } => "system_info",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Frames sent from host to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection
    Welcome { message: String, server_time: String },

    AuthResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        message: String,
    },

    CommandResponse {
        stdout: String,
        stderr: String,
        returncode: i32,
    },

    SystemInfoResponse {
        hostname: String,
        platform: String,
        version: String,
        current_time: String,
    },

    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Reasons a frame could not be turned into a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not UTF-8, not JSON, not an object, or longer than the frame limit
    InvalidJson,
    /// No string `type` discriminator
    UnknownType,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidJson => write!(f, "Invalid JSON format"),
            ProtocolError::UnknownType => write!(f, "Unknown message type"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for ServerMessage {
    fn from(error: ProtocolError) -> Self {
        ServerMessage::error(error.to_string())
    }
}

// A field of the wrong JSON type counts as missing, so a numeric token or
// password is rejected as invalid rather than as a malformed frame
fn non_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => Some(value),
        _ => None,
    })
}

/// Decode one frame (without its trailing newline) into a request
pub fn decode_request(frame: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidJson)?;
    let value: Value = serde_json::from_str(text.trim()).map_err(|_| ProtocolError::InvalidJson)?;

    if !value.is_object() {
        return Err(ProtocolError::InvalidJson);
    }
    if !value.get("type").is_some_and(Value::is_string) {
        return Err(ProtocolError::UnknownType);
    }

    serde_json::from_value(value).map_err(|_| ProtocolError::InvalidJson)
}

/// Serialize a message as one newline-terminated frame
pub fn encode_frame<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_auth() {
        let req = decode_request(br#"{"type":"auth","username":"admin","password":"admin123"}"#)
            .unwrap();
        assert_eq!(req, ClientMessage::auth("admin", "admin123"));
    }

    #[test]
    fn test_decode_command_and_system_info() {
        let req = decode_request(br#"{"type":"command","token":"abc","command":"echo hi"}"#)
            .unwrap();
        assert_eq!(req, ClientMessage::command("abc", "echo hi"));

        let req = decode_request(br#"{"type":"system_info","token":"abc"}"#).unwrap();
        assert_eq!(req, ClientMessage::system_info("abc"));
    }

    #[test]
    fn test_decode_missing_fields_are_none() {
        let req = decode_request(br#"{"type":"command"}"#).unwrap();
        assert_eq!(
            req,
            ClientMessage::Command {
                token: None,
                command: None
            }
        );

        let req = decode_request(br#"{"type":"auth","username":null}"#).unwrap();
        assert_eq!(
            req,
            ClientMessage::Auth {
                username: None,
                password: None
            }
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let req = decode_request(br#"{"type":"system_info","token":"t","extra":[1,2]}"#).unwrap();
        assert_eq!(req, ClientMessage::system_info("t"));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_request(br#"{"type":"reboot"}"#).unwrap(),
            ClientMessage::Unknown
        );
        assert_eq!(
            decode_request(br#"{"username":"admin"}"#),
            Err(ProtocolError::UnknownType)
        );
        assert_eq!(
            decode_request(br#"{"type":42}"#),
            Err(ProtocolError::UnknownType)
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(decode_request(b"not json"), Err(ProtocolError::InvalidJson));
        assert_eq!(decode_request(b"{\"type\":"), Err(ProtocolError::InvalidJson));
        assert_eq!(decode_request(b"[1,2,3]"), Err(ProtocolError::InvalidJson));
        assert_eq!(decode_request(b"\xff\xfe{}"), Err(ProtocolError::InvalidJson));
    }

    #[test]
    fn test_decode_wrong_field_types_as_missing() {
        assert_eq!(
            decode_request(br#"{"type":"command","token":7,"command":"ls"}"#),
            Ok(ClientMessage::Command {
                token: None,
                command: Some("ls".to_string()),
            })
        );
        assert_eq!(
            decode_request(br#"{"type":"auth","username":"admin","password":123}"#),
            Ok(ClientMessage::Auth {
                username: Some("admin".to_string()),
                password: None,
            })
        );
        assert_eq!(
            decode_request(br#"{"type":"system_info","token":null}"#),
            Ok(ClientMessage::SystemInfo { token: None })
        );
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let req = decode_request(b"  {\"type\":\"system_info\",\"token\":\"t\"}\r").unwrap();
        assert_eq!(req, ClientMessage::system_info("t"));
    }

    #[test]
    fn test_protocol_error_messages() {
        assert_eq!(
            ServerMessage::from(ProtocolError::InvalidJson),
            ServerMessage::error("Invalid JSON format")
        );
        assert_eq!(
            ServerMessage::from(ProtocolError::UnknownType),
            ServerMessage::error("Unknown message type")
        );
    }

    #[test]
    fn test_auth_response_shape() {
        let success = ServerMessage::AuthResponse {
            success: true,
            token: Some("ab".repeat(32)),
            message: "Authentication successful".to_string(),
        };
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["type"], "auth_response");
        assert_eq!(value["success"], true);
        assert_eq!(value["token"].as_str().unwrap().len(), 64);

        let failure = ServerMessage::AuthResponse {
            success: false,
            token: None,
            message: "Authentication failed".to_string(),
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            value,
            json!({"type": "auth_response", "success": false, "message": "Authentication failed"})
        );
    }

    #[test]
    fn test_command_response_shape() {
        let resp = ServerMessage::CommandResponse {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            returncode: 0,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"type": "command_response", "stdout": "hi\n", "stderr": "", "returncode": 0})
        );
    }

    #[test]
    fn test_welcome_and_error_shape() {
        let welcome = ServerMessage::Welcome {
            message: "Connected".to_string(),
            server_time: "2024-12-05T13:28:10+00:00".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&welcome).unwrap(),
            r#"{"type":"welcome","message":"Connected","server_time":"2024-12-05T13:28:10+00:00"}"#
        );

        assert_eq!(
            serde_json::to_string(&ServerMessage::error("Invalid JSON format")).unwrap(),
            r#"{"type":"error","message":"Invalid JSON format"}"#
        );
    }

    #[test]
    fn test_system_info_response_parses_on_client() {
        let line = concat!(
            r#"{"type":"system_info_response","hostname":"box","platform":"linux","#,
            r#""version":"0.1.0","current_time":"2024-12-05T14:00:00+00:00"}"#
        );
        let parsed: ServerMessage = serde_json::from_str(line).unwrap();
        assert_eq!(
            parsed,
            ServerMessage::SystemInfoResponse {
                hostname: "box".to_string(),
                platform: "linux".to_string(),
                version: "0.1.0".to_string(),
                current_time: "2024-12-05T14:00:00+00:00".to_string(),
            }
        );
    }

    #[test]
    fn test_encode_frame_is_newline_terminated() {
        let frame = encode_frame(&ClientMessage::system_info("t")).unwrap();
        assert_eq!(frame.last(), Some(&b'\n'));
        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);

        let line = std::str::from_utf8(&frame).unwrap();
        assert_eq!(line.trim_end(), r#"{"type":"system_info","token":"t"}"#);
    }
}
