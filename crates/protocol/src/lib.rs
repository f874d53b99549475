//! # RemoteCtl Protocol Library
//!
//! This crate provides the wire protocol shared by the RemoteCtl daemon and
//! client.
//!
//! ## Overview
//!
//! A session is one TLS stream carrying newline-terminated control lines.
//! File transfers switch the same stream to raw bytes until an end-of-file
//! marker, then switch back to lines.
//!
//! - **Codec**: control tokens, the [`Message`] type and reply aggregation
//! - **Framing**: the end-of-file marker and a boundary-safe scanner
//! - **Connection**: line and raw reads over one shared buffer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Control lines  │  Raw file bytes      │  CMD:/RESULT:/... | END_OF_FILE
//! ├─────────────────────────────────────────┤
//! │               Connection                │  one BufReader for both
//! ├─────────────────────────────────────────┤
//! │           TLS (tokio-rustls)            │
//! ├─────────────────────────────────────────┤
//! │                  TCP                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{CommandRequest, Message};
//!
//! let line = Message::Command("UPLOAD notes.txt".to_string()).encode();
//! assert_eq!(line, "CMD:UPLOAD notes.txt\n");
//!
//! match Message::decode(&line) {
//!     Message::Command(text) => {
//!         assert_eq!(
//!             CommandRequest::parse(&text).unwrap(),
//!             CommandRequest::Upload("notes.txt")
//!         );
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Control tokens and message classification
//! - [`framing`]: End-of-file marker scanning
//! - [`connection`]: Line/raw stream wrapper
//! - [`error`]: Error types

pub mod codec;
pub mod connection;
pub mod error;
pub mod framing;

pub use codec::{
    validate_file_name, CommandRequest, Message, Response, ResponseAccumulator, AUTH_FAILED,
    AUTH_PREFIX, AUTH_SUCCESS, COMMAND_PREFIX, DISCONNECT, DOWNLOAD_KEYWORD, DOWNLOAD_START,
    END_OF_RESPONSE, ERROR_PREFIX, FILE_NOT_FOUND, RESULT_PREFIX, UPLOAD_COMPLETE,
    UPLOAD_KEYWORD, UPLOAD_READY,
};
pub use connection::{Connection, Received};
pub use error::{ProtocolError, Result};
pub use framing::{Scan, SentinelScanner, CHUNK_SIZE, END_OF_FILE, END_OF_FILE_LINE};
