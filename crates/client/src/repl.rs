//! Parsing of interactive input lines.

use std::path::PathBuf;

use protocol::{DOWNLOAD_KEYWORD, UPLOAD_KEYWORD};

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// `UPLOAD <local path>`.
    Upload(PathBuf),
    /// `DOWNLOAD <name> [dest dir]`; the destination defaults to `.`.
    Download {
        /// Remote file name.
        name: String,
        /// Local directory receiving the file.
        dest_dir: PathBuf,
    },
    /// `exit` or `quit`.
    Exit,
    /// Anything else is sent as a shell command.
    Shell(String),
    /// A blank line.
    Empty,
}

/// Classify one input line.
pub fn parse_line(line: &str) -> Result<ReplCommand, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return Ok(ReplCommand::Exit);
    }

    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (trimmed, ""),
    };

    match keyword {
        UPLOAD_KEYWORD if rest.is_empty() => Err(format!("usage: {UPLOAD_KEYWORD} <path>")),
        UPLOAD_KEYWORD => Ok(ReplCommand::Upload(PathBuf::from(rest))),
        DOWNLOAD_KEYWORD => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), dest, None) => Ok(ReplCommand::Download {
                    name: name.to_string(),
                    dest_dir: PathBuf::from(dest.unwrap_or(".")),
                }),
                _ => Err(format!("usage: {DOWNLOAD_KEYWORD} <name> [dest dir]")),
            }
        }
        _ => Ok(ReplCommand::Shell(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shell_and_blank() {
        assert_eq!(parse_line("   ").unwrap(), ReplCommand::Empty);
        assert_eq!(
            parse_line(" ls -la \n").unwrap(),
            ReplCommand::Shell("ls -la".into())
        );
        assert_eq!(
            parse_line("UPLOADER x").unwrap(),
            ReplCommand::Shell("UPLOADER x".into())
        );
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(parse_line("exit").unwrap(), ReplCommand::Exit);
        assert_eq!(parse_line("QUIT").unwrap(), ReplCommand::Exit);
    }

    #[test]
    fn test_parse_upload_keeps_spaces_in_path() {
        assert_eq!(
            parse_line("UPLOAD /tmp/my file.txt").unwrap(),
            ReplCommand::Upload(PathBuf::from("/tmp/my file.txt"))
        );
        assert!(parse_line("UPLOAD").is_err());
    }

    #[test]
    fn test_parse_download() {
        assert_eq!(
            parse_line("DOWNLOAD report.pdf /tmp").unwrap(),
            ReplCommand::Download {
                name: "report.pdf".into(),
                dest_dir: PathBuf::from("/tmp"),
            }
        );
        assert_eq!(
            parse_line("DOWNLOAD report.pdf").unwrap(),
            ReplCommand::Download {
                name: "report.pdf".into(),
                dest_dir: PathBuf::from("."),
            }
        );
        assert!(parse_line("DOWNLOAD").is_err());
        assert!(parse_line("DOWNLOAD a b c").is_err());
    }
}
