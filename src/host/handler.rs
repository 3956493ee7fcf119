//! Request dispatch: one decoded frame in, one response frame out.

use std::time::Duration;

use tokio::sync::Mutex;

use crate::credentials::CredentialStore;
use crate::executor::{CommandExecutor, DEFAULT_COMMAND_TIMEOUT};
use crate::host::protocol::{decode_request, ClientMessage, ServerMessage};
use crate::session_table::SessionTable;

const INVALID_TOKEN: &str = "Invalid or expired token";
const NO_COMMAND: &str = "No command provided";

/// State shared by every connection worker
pub struct HostState {
    /// Accounts allowed to log in
    pub credentials: CredentialStore,
    /// Live sessions; the only state mutated across workers
    pub sessions: Mutex<SessionTable>,
    /// Runs `command` requests
    pub executor: CommandExecutor,
    /// Deadline applied to each command
    pub command_timeout: Duration,
    /// Reported in `system_info_response`
    pub version: String,
}

impl HostState {
    pub fn new(credentials: CredentialStore, executor: CommandExecutor) -> Self {
        Self {
            credentials,
            sessions: Mutex::new(SessionTable::new()),
            executor,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    async fn authorize(&self, token: Option<&str>) -> Option<String> {
        let token = token?;
        let sessions = self.sessions.lock().await;
        sessions.validate(token).map(str::to_string)
    }
}

/// Response to a frame, plus the identity of a valid token it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub response: ServerMessage,
    pub identity: Option<String>,
}

impl Handled {
    fn anonymous(response: ServerMessage) -> Self {
        Self {
            response,
            identity: None,
        }
    }
}

/// Decode and answer a single frame. Never fails: every problem becomes an
/// `error` or unsuccessful response.
pub async fn handle_frame(frame: &[u8], state: &HostState) -> Handled {
    match decode_request(frame) {
        Ok(request) => {
            log::debug!("Request: {}", request.kind());
            handle_request(request, state).await
        }
        Err(e) => {
            log::debug!("Rejected frame: {}", e);
            Handled::anonymous(e.into())
        }
    }
}

/// Answer a decoded request
pub async fn handle_request(request: ClientMessage, state: &HostState) -> Handled {
    match request {
        ClientMessage::Auth { username, password } => {
            Handled::anonymous(authenticate(username, password, state).await)
        }

        ClientMessage::Command { token, command } => {
            let Some(username) = state.authorize(token.as_deref()).await else {
                return Handled::anonymous(ServerMessage::error(INVALID_TOKEN));
            };

            let response = match command.filter(|c| !c.is_empty()) {
                Some(command) => {
                    log::info!("User '{}' executing: {}", username, command);
                    let result = state.executor.execute(&command, state.command_timeout).await;
                    log::debug!(
                        "Command for '{}' finished with code {}{}",
                        username,
                        result.exit_code,
                        if result.timed_out { " (timed out)" } else { "" }
                    );
                    ServerMessage::CommandResponse {
                        stdout: result.stdout,
                        stderr: result.stderr,
                        returncode: result.exit_code,
                    }
                }
                None => ServerMessage::error(NO_COMMAND),
            };

            Handled {
                response,
                identity: Some(username),
            }
        }

        ClientMessage::SystemInfo { token } => {
            let Some(username) = state.authorize(token.as_deref()).await else {
                return Handled::anonymous(ServerMessage::error(INVALID_TOKEN));
            };

            Handled {
                response: system_info(state),
                identity: Some(username),
            }
        }

        ClientMessage::Unknown => Handled::anonymous(ServerMessage::error("Unknown message type")),
    }
}

async fn authenticate(
    username: Option<String>,
    password: Option<String>,
    state: &HostState,
) -> ServerMessage {
    let accepted = match (&username, &password) {
        (Some(user), Some(password)) => state.credentials.verify(user, password),
        _ => false,
    };

    match username {
        Some(user) if accepted => {
            let token = state.sessions.lock().await.create(user.as_str());
            log::info!("User '{}' authenticated successfully", user);
            ServerMessage::AuthResponse {
                success: true,
                token: Some(token),
                message: "Authentication successful".to_string(),
            }
        }
        user => {
            log::warn!(
                "Authentication failed for user '{}'",
                user.as_deref().unwrap_or("<missing>")
            );
            ServerMessage::AuthResponse {
                success: false,
                token: None,
                message: "Authentication failed".to_string(),
            }
        }
    }
}

fn system_info(state: &HostState) -> ServerMessage {
    ServerMessage::SystemInfoResponse {
        hostname: gethostname::gethostname().to_string_lossy().to_string(),
        platform: std::env::consts::OS.to_string(),
        version: state.version.clone(),
        current_time: chrono::Local::now().to_rfc3339(),
    }
}
