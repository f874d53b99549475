//! Control-line codec.
//!
//! Every control message is a single newline-terminated line of text. The
//! line is classified by exact prefix match against the tokens below; the
//! payload is whatever follows the prefix.
//!
//! # Line Format
//!
//! | Message          | Line                          | Direction        |
//! |------------------|-------------------------------|------------------|
//! | Auth request     | `AUTH: <login> <password>`    | client -> server |
//! | Auth success     | `AUTH_SUCCESS`                | server -> client |
//! | Auth failure     | `AUTH_FAILED`                 | server -> client |
//! | Command          | `CMD:<text>`                  | client -> server |
//! | Result           | `RESULT:<text>` (multi-line)  | server -> client |
//! | Error            | `ERROR:<text>`                | server -> client |
//! | End of response  | `END_OF_RESPONSE`             | server -> client |
//! | Disconnect       | `DISCONNECT`                  | client -> server |
//!
//! A `Result` payload may span several lines; readers collect lines until
//! `END_OF_RESPONSE` with a [`ResponseAccumulator`].

use std::path::{Component, Path};

use crate::error::{ProtocolError, Result};

/// Prefix of a command line sent by the client.
pub const COMMAND_PREFIX: &str = "CMD:";

/// Prefix of a successful reply.
pub const RESULT_PREFIX: &str = "RESULT:";

/// Prefix of a failed reply.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Prefix of the authentication line.
pub const AUTH_PREFIX: &str = "AUTH:";

/// Sent by the client to end the session.
pub const DISCONNECT: &str = "DISCONNECT";

/// Sent by the server when the credentials were accepted.
pub const AUTH_SUCCESS: &str = "AUTH_SUCCESS";

/// Sent by the server when the credentials were rejected.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// Terminates every command reply.
pub const END_OF_RESPONSE: &str = "END_OF_RESPONSE";

/// First token of an upload command.
pub const UPLOAD_KEYWORD: &str = "UPLOAD";

/// First token of a download command.
pub const DOWNLOAD_KEYWORD: &str = "DOWNLOAD";

/// Result text the server sends before accepting upload bytes.
pub const UPLOAD_READY: &str = "Ready to receive file";

/// Result text prefix acknowledging a stored upload.
pub const UPLOAD_COMPLETE: &str = "File received successfully";

/// Result text prefix announcing download bytes.
pub const DOWNLOAD_START: &str = "Starting transfer of file";

/// Error text prefix for a download of an absent file.
pub const FILE_NOT_FOUND: &str = "File not found";

/// Number of whitespace-separated tokens in a valid auth line, tag included.
const AUTH_TOKEN_COUNT: usize = 3;

/// A decoded control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `AUTH: <login> <password>`.
    Auth {
        /// Account name.
        login: String,
        /// Clear-text password as typed by the user.
        password: String,
    },
    /// Credentials accepted.
    AuthSuccess,
    /// Credentials rejected.
    AuthFailed,
    /// A command for the server (shell text or a transfer request).
    Command(String),
    /// Successful reply payload.
    Result(String),
    /// Failed reply payload.
    Error(String),
    /// End of the session.
    Disconnect,
    /// Terminator of a command reply.
    EndOfResponse,
    /// Anything that matched none of the above.
    Unexpected(String),
}

impl Message {
    /// Build an auth message, rejecting credentials the line format cannot carry.
    pub fn auth(login: &str, password: &str) -> Result<Self> {
        for (what, value) in [("login", login), ("password", password)] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(ProtocolError::Malformed(format!(
                    "{what} must be non-empty and contain no whitespace"
                )));
            }
        }
        Ok(Message::Auth {
            login: login.to_string(),
            password: password.to_string(),
        })
    }

    /// Encode the message as a newline-terminated line.
    pub fn encode(&self) -> String {
        let mut line = match self {
            Message::Auth { login, password } => format!("{AUTH_PREFIX} {login} {password}"),
            Message::AuthSuccess => AUTH_SUCCESS.to_string(),
            Message::AuthFailed => AUTH_FAILED.to_string(),
            Message::Command(text) => format!("{COMMAND_PREFIX}{text}"),
            Message::Result(text) => format!("{RESULT_PREFIX}{text}"),
            Message::Error(text) => format!("{ERROR_PREFIX}{text}"),
            Message::Disconnect => DISCONNECT.to_string(),
            Message::EndOfResponse => END_OF_RESPONSE.to_string(),
            Message::Unexpected(text) => text.clone(),
        };
        line.push('\n');
        line
    }

    /// Decode one line. Trailing `\r\n` is ignored.
    ///
    /// A line that starts with the auth prefix but does not split into exactly
    /// three tokens decodes as [`Message::Unexpected`].
    pub fn decode(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        match line {
            DISCONNECT => return Message::Disconnect,
            END_OF_RESPONSE => return Message::EndOfResponse,
            AUTH_SUCCESS => return Message::AuthSuccess,
            AUTH_FAILED => return Message::AuthFailed,
            _ => {}
        }

        if line.starts_with(AUTH_PREFIX) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() == AUTH_TOKEN_COUNT && tokens[0] == AUTH_PREFIX {
                return Message::Auth {
                    login: tokens[1].to_string(),
                    password: tokens[2].to_string(),
                };
            }
            return Message::Unexpected(line.to_string());
        }

        if let Some(text) = line.strip_prefix(COMMAND_PREFIX) {
            Message::Command(text.to_string())
        } else if let Some(text) = line.strip_prefix(RESULT_PREFIX) {
            Message::Result(text.to_string())
        } else if let Some(text) = line.strip_prefix(ERROR_PREFIX) {
            Message::Error(text.to_string())
        } else {
            Message::Unexpected(line.to_string())
        }
    }
}

/// A command payload classified by its first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRequest<'a> {
    /// `UPLOAD <file name>`.
    Upload(&'a str),
    /// `DOWNLOAD <file name>`.
    Download(&'a str),
    /// Anything else is shell text.
    Shell(&'a str),
}

impl<'a> CommandRequest<'a> {
    /// Classify the payload of a [`Message::Command`].
    ///
    /// The transfer keywords only match as a whole first token, so `UPLOADER`
    /// is shell text. The file name is the trimmed remainder of the line.
    pub fn parse(payload: &'a str) -> Result<Self> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::Malformed("empty command".to_string()));
        }

        let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (trimmed, ""),
        };

        match keyword {
            UPLOAD_KEYWORD | DOWNLOAD_KEYWORD if rest.is_empty() => Err(
                ProtocolError::Malformed(format!("usage: {keyword} <file name>")),
            ),
            UPLOAD_KEYWORD => Ok(CommandRequest::Upload(rest)),
            DOWNLOAD_KEYWORD => Ok(CommandRequest::Download(rest)),
            _ => Ok(CommandRequest::Shell(trimmed)),
        }
    }
}

/// A complete reply to a command, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Payload of a `RESULT:` reply.
    Result(String),
    /// Payload of an `ERROR:` reply.
    Error(String),
    /// Text that carried neither prefix.
    Unexpected(String),
}

impl Response {
    /// Classify an aggregated reply text.
    pub fn from_text(text: &str) -> Self {
        if let Some(payload) = text.strip_prefix(RESULT_PREFIX) {
            Response::Result(payload.to_string())
        } else if let Some(payload) = text.strip_prefix(ERROR_PREFIX) {
            Response::Error(payload.to_string())
        } else {
            Response::Unexpected(text.to_string())
        }
    }

    /// Classify a single reply line that is not followed by `END_OF_RESPONSE`.
    pub fn from_line(line: &str) -> Self {
        Self::from_text(line.trim_end())
    }
}

/// Collects reply lines until `END_OF_RESPONSE`.
///
/// Blank lines before the first content line are skipped; they are left on
/// the stream by the newline that follows an end-of-file marker.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
}

impl ResponseAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the finished reply once the terminator is seen.
    pub fn push(&mut self, line: &str) -> Option<Response> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == END_OF_RESPONSE {
            return Some(Response::from_text(std::mem::take(&mut self.text).trim_end()));
        }
        if self.text.is_empty() && line.trim().is_empty() {
            return None;
        }
        self.text.push_str(line);
        self.text.push('\n');
        None
    }

    /// Whether any content line has been collected.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Check that `name` is a single plain file name.
///
/// Separators, `.`/`..`, absolute paths and drive prefixes are rejected so a
/// name can never leave the directory it is joined onto.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let invalid = || ProtocolError::InvalidFileName {
        name: name.to_string(),
    };

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(name),
        _ => Err(invalid()),
    }
}
