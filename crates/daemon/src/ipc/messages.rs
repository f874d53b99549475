//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types exchanged over the
//! daemon's control socket.

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// List all active sessions.
    ListSessions,
    /// Close a specific session by ID.
    KillSession {
        /// The unique identifier of the session to close.
        session_id: String,
    },
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the daemon is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of active sessions.
        session_count: usize,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// List of active sessions.
    Sessions {
        /// Information about each active session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session was closed.
    SessionKilled {
        /// The ID of the closed session.
        session_id: String,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Information about an active session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Unique session identifier.
    pub id: String,
    /// Remote address of the client.
    pub peer: String,
    /// Authenticated login, if the client has logged in.
    pub login: Option<String>,
    /// Unix timestamp when the session was connected.
    pub connected_at: u64,
}

impl From<SessionInfo> for IpcSessionInfo {
    fn from(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            peer: info.peer.to_string(),
            login: info.login,
            connected_at: info.connected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_requests_serialize_as_strings() {
        for (request, expected) in [
            (IpcRequest::Ping, r#""Ping""#),
            (IpcRequest::Status, r#""Status""#),
            (IpcRequest::Stop, r#""Stop""#),
            (IpcRequest::ListSessions, r#""ListSessions""#),
        ] {
            let json = serde_json::to_string(&request).unwrap();
            assert_eq!(json, expected);
            let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
            assert_eq!(deserialized, request);
        }
    }

    #[test]
    fn test_request_kill_session_serialization() {
        let request = IpcRequest::KillSession {
            session_id: "test-session-123".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"KillSession":{"session_id":"test-session-123"}}"#);

        let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_response_status_serialization() {
        let response = IpcResponse::Status {
            running: true,
            uptime_secs: 3600,
            session_count: 5,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"uptime_secs\":3600"));
        assert!(json.contains("\"session_count\":5"));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_sessions_serialization() {
        let response = IpcResponse::Sessions {
            sessions: vec![
                IpcSessionInfo {
                    id: "session-1".to_string(),
                    peer: "10.0.0.5:50122".to_string(),
                    login: Some("alice".to_string()),
                    connected_at: 1_700_000_000,
                },
                IpcSessionInfo {
                    id: "session-2".to_string(),
                    peer: "10.0.0.6:40001".to_string(),
                    login: None,
                    connected_at: 1_700_000_100,
                },
            ],
        };
        let json = serde_json::to_string(&response).unwrap();
        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_response_error_serialization() {
        let response = IpcResponse::Error {
            message: "no such session".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"Error":{"message":"no such session"}}"#);
    }

    #[test]
    fn test_session_info_conversion() {
        let info = SessionInfo {
            id: "abc".to_string(),
            peer: std::net::SocketAddr::from(([192, 168, 1, 2], 4242)),
            login: Some("bob".to_string()),
            connected_at: 42,
        };
        let ipc: IpcSessionInfo = info.into();
        assert_eq!(ipc.peer, "192.168.1.2:4242");
        assert_eq!(ipc.login.as_deref(), Some("bob"));
        assert_eq!(ipc.connected_at, 42);
    }
}
