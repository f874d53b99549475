//! # RemoteCtl Client Library
//!
//! The client half of RemoteCtl: dial a daemon over TLS, authenticate, then
//! run shell commands and move files through the same connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use client::{tls, ClientDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connector = tls::load_connector(Path::new("daemon-cert.pem"))?;
//!     let mut driver = ClientDriver::connect("127.0.0.1:9999", "localhost", &connector).await?;
//!
//!     if driver.authenticate("alice", "secret").await? {
//!         println!("{:?}", driver.execute_command("uname -a").await?);
//!         driver.upload_file(Path::new("notes.txt")).await?;
//!     }
//!
//!     driver.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod driver;
pub mod error;
pub mod repl;
pub mod tls;

// Re-export protocol for convenience
pub use protocol;

pub use driver::{ClientDriver, Download, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ClientError, Result};
pub use repl::{parse_line, ReplCommand};
