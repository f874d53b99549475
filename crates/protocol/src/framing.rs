//! End-of-file framing for raw file bytes.
//!
//! # Stream Format
//!
//! A file travels on the same stream as the control lines:
//! - N bytes: raw file contents, written in chunks of [`CHUNK_SIZE`]
//! - the literal line `END_OF_FILE\n`
//!
//! There is no length prefix. The receiver searches the raw bytes for the
//! [`END_OF_FILE`] marker and keeps everything before its first occurrence.
//!
//! # Limitations
//!
//! A file whose contents contain `END_OF_FILE` is truncated at that point.
//! The scanner carries the last `END_OF_FILE.len() - 1` bytes of each chunk
//! into the next search, so a marker split across two reads is still found.

/// Marker that ends a raw file payload.
pub const END_OF_FILE: &[u8] = b"END_OF_FILE";

/// Marker line as written on the wire.
pub const END_OF_FILE_LINE: &[u8] = b"END_OF_FILE\n";

/// Read and write size for raw file bytes (8 KiB).
pub const CHUNK_SIZE: usize = 8192;

/// Outcome of scanning one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    /// File bytes that are now known to precede the marker.
    pub data: Vec<u8>,
    /// How many bytes of the chunk were used, marker included.
    pub consumed: usize,
    /// Whether the marker was found.
    pub complete: bool,
}

/// Incremental search for [`END_OF_FILE`] across chunk boundaries.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    /// Tail of the previous chunk that could be the start of a split marker.
    carry: Vec<u8>,
}

impl SentinelScanner {
    /// Create a scanner with nothing carried over.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the next chunk of the stream.
    ///
    /// Once `complete` is returned, bytes of `chunk` past `consumed` belong to
    /// whatever follows the file and must not be treated as file data.
    pub fn scan(&mut self, chunk: &[u8]) -> Scan {
        let mut window = std::mem::take(&mut self.carry);
        let carried = window.len();
        window.extend_from_slice(chunk);

        if let Some(pos) = find(&window, END_OF_FILE) {
            window.truncate(pos);
            return Scan {
                data: window,
                // The carry alone is shorter than the marker, so the marker
                // always ends inside `chunk`.
                consumed: pos + END_OF_FILE.len() - carried,
                complete: true,
            };
        }

        let keep = window.len().min(END_OF_FILE.len() - 1);
        self.carry = window.split_off(window.len() - keep);
        Scan {
            data: window,
            consumed: chunk.len(),
            complete: false,
        }
    }

    /// Bytes withheld from the last scan, for use when the stream ends early.
    pub fn into_pending(self) -> Vec<u8> {
        self.carry
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_in_single_chunk() {
        let mut scanner = SentinelScanner::new();
        let scan = scanner.scan(b"hello worldEND_OF_FILE\nCMD:ls\n");
        assert!(scan.complete);
        assert_eq!(scan.data, b"hello world");
        assert_eq!(scan.consumed, b"hello worldEND_OF_FILE".len());
    }

    #[test]
    fn test_marker_only() {
        let mut scanner = SentinelScanner::new();
        let scan = scanner.scan(END_OF_FILE_LINE);
        assert!(scan.complete);
        assert!(scan.data.is_empty());
        assert_eq!(scan.consumed, END_OF_FILE.len());
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut scanner = SentinelScanner::new();
        let first = scanner.scan(b"abcdefEND_OF");
        assert!(!first.complete);
        assert_eq!(first.consumed, 12);

        let second = scanner.scan(b"_FILE\n");
        assert!(second.complete);
        assert_eq!(second.consumed, 5);

        let mut data = first.data;
        data.extend_from_slice(&second.data);
        assert_eq!(data, b"abcdef");
    }

    #[test]
    fn test_no_marker_withholds_tail() {
        let mut scanner = SentinelScanner::new();
        let chunk = vec![b'x'; CHUNK_SIZE];
        let scan = scanner.scan(&chunk);
        assert!(!scan.complete);
        assert_eq!(scan.consumed, CHUNK_SIZE);
        assert_eq!(scan.data.len(), CHUNK_SIZE - (END_OF_FILE.len() - 1));
        assert_eq!(scanner.into_pending().len(), END_OF_FILE.len() - 1);
    }

    #[test]
    fn test_small_chunks_reassemble() {
        let payload = b"0123456789abcdefghij";
        let mut stream = payload.to_vec();
        stream.extend_from_slice(END_OF_FILE_LINE);

        let mut scanner = SentinelScanner::new();
        let mut out = Vec::new();
        let mut complete = false;
        for chunk in stream.chunks(3) {
            let scan = scanner.scan(chunk);
            out.extend_from_slice(&scan.data);
            if scan.complete {
                complete = true;
                break;
            }
        }
        assert!(complete);
        assert_eq!(out, payload);
    }

    #[test]
    fn test_embedded_marker_truncates_content() {
        let mut scanner = SentinelScanner::new();
        let scan = scanner.scan(b"before END_OF_FILE after\nEND_OF_FILE\n");
        assert!(scan.complete);
        assert_eq!(scan.data, b"before ");
    }

    #[test]
    fn test_binary_bytes_pass_through() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut stream = payload.clone();
        stream.extend_from_slice(END_OF_FILE_LINE);

        let mut scanner = SentinelScanner::new();
        let scan = scanner.scan(&stream);
        assert!(scan.complete);
        assert_eq!(scan.data, payload);
    }
}
