//! Blocking client for talking to a remote host.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::host::protocol::*;

/// Error type for host client operations
#[derive(Debug)]
pub enum HostClientError {
    /// Failed to connect to the host
    ConnectionFailed(std::io::Error),
    /// Failed to send request
    SendFailed(std::io::Error),
    /// Failed to receive response
    ReceiveFailed(std::io::Error),
    /// Host closed the connection
    Disconnected,
    /// Failed to serialize request
    SerializeFailed(serde_json::Error),
    /// Failed to deserialize response
    DeserializeFailed(serde_json::Error),
    /// Host rejected the credentials
    AuthenticationFailed(String),
    /// No session token; authenticate first
    NotAuthenticated,
    /// Host returned an error frame
    HostError(String),
    /// Host answered with a frame of the wrong type
    UnexpectedResponse(&'static str),
}

impl std::fmt::Display for HostClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostClientError::ConnectionFailed(e) => write!(f, "Failed to connect to host: {}", e),
            HostClientError::SendFailed(e) => write!(f, "Failed to send request: {}", e),
            HostClientError::ReceiveFailed(e) => write!(f, "Failed to receive response: {}", e),
            HostClientError::Disconnected => write!(f, "Host closed the connection"),
            HostClientError::SerializeFailed(e) => write!(f, "Failed to serialize request: {}", e),
            HostClientError::DeserializeFailed(e) => {
                write!(f, "Failed to deserialize response: {}", e)
            }
            HostClientError::AuthenticationFailed(message) => {
                write!(f, "Authentication failed: {}", message)
            }
            HostClientError::NotAuthenticated => write!(f, "Not authenticated"),
            HostClientError::HostError(e) => write!(f, "Host error: {}", e),
            HostClientError::UnexpectedResponse(request) => {
                write!(f, "Unexpected response to {}", request)
            }
        }
    }
}

impl std::error::Error for HostClientError {}

/// Output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

/// Remote host description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSystemInfo {
    pub hostname: String,
    pub platform: String,
    pub version: String,
    pub current_time: String,
}

/// Client for a remote host connection
pub struct HostClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    welcome: String,
    token: Option<String>,
}

impl HostClient {
    /// Connect and consume the welcome frame
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, HostClientError> {
        Self::connect_with_timeout(addr, Duration::from_secs(60))
    }

    /// Connect with a custom read/write timeout.
    /// The timeout must cover the longest command expected to run.
    pub fn connect_with_timeout(
        addr: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self, HostClientError> {
        let stream = TcpStream::connect(addr).map_err(HostClientError::ConnectionFailed)?;

        stream
            .set_read_timeout(Some(timeout))
            .map_err(HostClientError::ConnectionFailed)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(HostClientError::ConnectionFailed)?;

        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(HostClientError::ConnectionFailed)?,
        );

        let mut client = Self {
            stream,
            reader,
            welcome: String::new(),
            token: None,
        };

        match client.receive()? {
            ServerMessage::Welcome { message, .. } => client.welcome = message,
            _ => return Err(HostClientError::UnexpectedResponse("connect")),
        }
        Ok(client)
    }

    /// Message from the host's welcome frame
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Reuse a token obtained elsewhere
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Send a request and receive a response
    pub fn send(&mut self, request: &ClientMessage) -> Result<ServerMessage, HostClientError> {
        let frame = encode_frame(request).map_err(HostClientError::SerializeFailed)?;

        self.stream
            .write_all(&frame)
            .map_err(HostClientError::SendFailed)?;
        self.stream.flush().map_err(HostClientError::SendFailed)?;

        self.receive()
    }

    fn receive(&mut self) -> Result<ServerMessage, HostClientError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(HostClientError::ReceiveFailed)?;
        if read == 0 {
            return Err(HostClientError::Disconnected);
        }

        serde_json::from_str(line.trim()).map_err(HostClientError::DeserializeFailed)
    }

    /// Log in; the token is kept for later requests and also returned
    pub fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<String, HostClientError> {
        match self.send(&ClientMessage::auth(username, password))? {
            ServerMessage::AuthResponse {
                success: true,
                token: Some(token),
                ..
            } => {
                self.token = Some(token.clone());
                Ok(token)
            }
            ServerMessage::AuthResponse { message, .. } => {
                Err(HostClientError::AuthenticationFailed(message))
            }
            ServerMessage::Error { message } => Err(HostClientError::HostError(message)),
            _ => Err(HostClientError::UnexpectedResponse("auth")),
        }
    }

    /// Run a command on the host
    pub fn execute(&mut self, command: &str) -> Result<RemoteOutput, HostClientError> {
        let token = self.token.clone().ok_or(HostClientError::NotAuthenticated)?;
        match self.send(&ClientMessage::command(token, command))? {
            ServerMessage::CommandResponse {
                stdout,
                stderr,
                returncode,
            } => Ok(RemoteOutput {
                stdout,
                stderr,
                returncode,
            }),
            ServerMessage::Error { message } => Err(HostClientError::HostError(message)),
            _ => Err(HostClientError::UnexpectedResponse("command")),
        }
    }

    /// Fetch the host description
    pub fn system_info(&mut self) -> Result<RemoteSystemInfo, HostClientError> {
        let token = self.token.clone().ok_or(HostClientError::NotAuthenticated)?;
        match self.send(&ClientMessage::system_info(token))? {
            ServerMessage::SystemInfoResponse {
                hostname,
                platform,
                version,
                current_time,
            } => Ok(RemoteSystemInfo {
                hostname,
                platform,
                version,
                current_time,
            }),
            ServerMessage::Error { message } => Err(HostClientError::HostError(message)),
            _ => Err(HostClientError::UnexpectedResponse("system_info")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::credentials::CredentialStore;
    use crate::executor::CommandExecutor;
    use crate::host::{HostServer, HostState};

    #[test]
    fn test_error_display() {
        let err = HostClientError::HostError("Invalid or expired token".to_string());
        assert_eq!(format!("{}", err), "Host error: Invalid or expired token");

        let err = HostClientError::UnexpectedResponse("auth");
        assert_eq!(format!("{}", err), "Unexpected response to auth");

        assert_eq!(format!("{}", HostClientError::NotAuthenticated), "Not authenticated");
    }

    #[test]
    fn test_client_against_server() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let state = Arc::new(
            HostState::new(CredentialStore::with_defaults(), CommandExecutor::default())
                .with_version("client-test"),
        );
        let server = runtime
            .block_on(HostServer::bind("127.0.0.1:0", state))
            .unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let task = runtime.spawn(server.run());

        let worker = thread::spawn(move || {
            let mut client = HostClient::connect(addr).unwrap();
            assert_eq!(client.welcome(), "Connected to Remote Host Server");

            assert!(matches!(
                client.execute("echo hi"),
                Err(HostClientError::NotAuthenticated)
            ));
            assert!(matches!(
                client.authenticate("admin", "wrong"),
                Err(HostClientError::AuthenticationFailed(_))
            ));

            let token = client.authenticate("admin", "admin123").unwrap();
            assert_eq!(client.token(), Some(token.as_str()));

            let output = client.execute("echo hi").unwrap();
            assert_eq!(
                output,
                RemoteOutput {
                    stdout: "hi\n".to_string(),
                    stderr: String::new(),
                    returncode: 0,
                }
            );

            let info = client.system_info().unwrap();
            assert_eq!(info.version, "client-test");

            client.set_token("forged");
            assert!(matches!(
                client.execute("echo hi"),
                Err(HostClientError::HostError(_))
            ));
        });
        worker.join().unwrap();

        runtime.block_on(handle.shutdown());
        runtime.block_on(task).unwrap().unwrap();
    }
}
