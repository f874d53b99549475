//! A byte stream viewed as both a line channel and a raw chunk channel.
//!
//! Control lines and raw file bytes share one stream. Both kinds of read go
//! through the same [`BufReader`], so bytes buffered by a line read are never
//! lost when the reader switches to raw mode, and bytes that follow an
//! end-of-file marker stay buffered for the next line read.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::codec::{Message, Response, ResponseAccumulator};
use crate::error::{ProtocolError, Result};
use crate::framing::{SentinelScanner, CHUNK_SIZE, END_OF_FILE_LINE};

/// Result of receiving a raw file payload.
#[derive(Debug)]
pub struct Received {
    /// Bytes handed to the sink.
    pub bytes: u64,
    /// First error raised by the sink, if any. The stream was still drained
    /// up to the marker so the connection stays usable.
    pub sink_error: Option<std::io::Error>,
}

/// One protocol connection over any async byte stream.
pub struct Connection<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    closed: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, read_half),
            writer: write_half,
            closed: false,
        }
    }

    /// Read one line without its terminator.
    ///
    /// Returns `None` when the peer has closed the stream. Bytes that are not
    /// valid UTF-8 are replaced with U+FFFD.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let bytes_read = self.reader.read_until(b'\n', &mut buf).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let mut line = String::from_utf8_lossy(&buf).into_owned();
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(Some(line))
    }

    /// Read and decode one control line.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        Ok(self.read_line().await?.map(|line| Message::decode(&line)))
    }

    /// Read reply lines up to `END_OF_RESPONSE`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConnectionClosed`] if the stream ends first.
    pub async fn read_response(&mut self) -> Result<Response> {
        let mut accumulator = ResponseAccumulator::new();
        loop {
            let line = self.read_line().await?.ok_or_else(|| {
                ProtocolError::ConnectionClosed("stream ended before end of response".to_string())
            })?;
            if let Some(response) = accumulator.push(&line) {
                return Ok(response);
            }
        }
    }

    /// Read a single non-blank reply line, skipping a stray newline left by a
    /// previous end-of-file marker.
    pub async fn read_reply_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.read_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    /// Encode and send one control message.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.write_raw(message.encode().as_bytes()).await
    }

    /// Write bytes as-is and flush.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Stream `source` in [`CHUNK_SIZE`] chunks followed by the end-of-file line.
    ///
    /// `progress` is called with the running byte count after every chunk.
    /// If `source` fails mid-way the marker is still written so the peer
    /// stops reading, and [`ProtocolError::TransferFailed`] is returned.
    pub async fn send_file<R, F>(&mut self, source: &mut R, mut progress: F) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        F: FnMut(u64),
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        let failure = loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => break None,
                Ok(n) => n,
                Err(e) => break Some(e),
            };
            self.writer.write_all(&buf[..n]).await?;
            total += n as u64;
            progress(total);
        };

        self.writer.write_all(END_OF_FILE_LINE).await?;
        self.writer.flush().await?;

        match failure {
            Some(e) => Err(ProtocolError::TransferFailed(e.to_string())),
            None => Ok(total),
        }
    }

    /// Read raw bytes into `sink` until the end-of-file marker.
    ///
    /// Only the bytes before the marker reach the sink. A newline directly
    /// after the marker is dropped when it is already buffered.
    ///
    /// # Errors
    ///
    /// Stream failures are returned as errors; sink failures are reported in
    /// [`Received::sink_error`] after the stream has been drained.
    pub async fn receive_file<W, F>(&mut self, sink: &mut W, mut progress: F) -> Result<Received>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        let mut scanner = SentinelScanner::new();
        let mut bytes = 0u64;
        let mut sink_error = None;

        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                return Err(ProtocolError::ConnectionClosed(
                    "stream ended before end-of-file marker".to_string(),
                ));
            }
            let scan = scanner.scan(chunk);
            self.reader.consume(scan.consumed);

            if sink_error.is_none() && !scan.data.is_empty() {
                match sink.write_all(&scan.data).await {
                    Ok(()) => {
                        bytes += scan.data.len() as u64;
                        progress(bytes);
                    }
                    Err(e) => sink_error = Some(e),
                }
            }

            if scan.complete {
                break;
            }
        }

        if sink_error.is_none() {
            if let Err(e) = sink.flush().await {
                sink_error = Some(e);
            }
        }

        if self.reader.buffer().first() == Some(&b'\n') {
            self.reader.consume(1);
        }

        Ok(Received { bytes, sink_error })
    }

    /// Shut down the write side. Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether [`Connection::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::framing::END_OF_FILE;

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::other("disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_send_and_read_message() {
        let (a, b) = duplex(1024);
        let mut left = Connection::new(a);
        let mut right = Connection::new(b);

        left.send(&Message::Command("uptime".into())).await.unwrap();
        let msg = right.read_message().await.unwrap().unwrap();
        assert_eq!(msg, Message::Command("uptime".into()));
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let (mut raw, b) = duplex(1024);
        let mut conn = Connection::new(b);
        raw.write_all(b"DISCONNECT\r\n").await.unwrap();
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "DISCONNECT");
    }

    #[tokio::test]
    async fn test_read_line_replaces_invalid_utf8() {
        let (mut raw, b) = duplex(1024);
        let mut conn = Connection::new(b);
        raw.write_all(b"CMD:echo caf\xe9\nCMD:pwd\n").await.unwrap();
        assert_eq!(
            conn.read_line().await.unwrap().unwrap(),
            "CMD:echo caf\u{FFFD}"
        );
        assert_eq!(
            conn.read_message().await.unwrap().unwrap(),
            Message::Command("pwd".into())
        );
    }

    #[tokio::test]
    async fn test_read_line_none_on_eof() {
        let (raw, b) = duplex(64);
        let mut conn = Connection::new(b);
        drop(raw);
        assert!(conn.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_response_multi_line() {
        let (mut raw, b) = duplex(1024);
        let mut conn = Connection::new(b);
        raw.write_all(b"RESULT:a\nb\nERROR: c\n\nEND_OF_RESPONSE\n")
            .await
            .unwrap();
        let response = conn.read_response().await.unwrap();
        assert_eq!(response, Response::Result("a\nb\nERROR: c".into()));
    }

    #[tokio::test]
    async fn test_read_response_eof_is_connection_closed() {
        let (mut raw, b) = duplex(1024);
        let mut conn = Connection::new(b);
        raw.write_all(b"RESULT:partial\n").await.unwrap();
        drop(raw);
        let err = conn.read_response().await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_file_round_trip_preserves_following_line() {
        let (a, b) = duplex(CHUNK_SIZE / 2);
        let mut sender = Connection::new(a);
        let mut receiver = Connection::new(b);

        let payload: Vec<u8> = (0..3 * CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let send = tokio::spawn(async move {
            let mut source = payload.as_slice();
            let sent = sender.send_file(&mut source, |_| {}).await.unwrap();
            sender.send(&Message::Disconnect).await.unwrap();
            sent
        });

        let mut sink = Vec::new();
        let mut last_progress = 0;
        let received = receiver
            .receive_file(&mut sink, |n| last_progress = n)
            .await
            .unwrap();

        assert_eq!(send.await.unwrap(), expected.len() as u64);
        assert!(received.sink_error.is_none());
        assert_eq!(received.bytes, expected.len() as u64);
        assert_eq!(last_progress, expected.len() as u64);
        assert_eq!(sink, expected);

        // The newline after the marker is gone and the next line is intact.
        let next = receiver.read_message().await.unwrap().unwrap();
        assert_eq!(next, Message::Disconnect);
    }

    #[tokio::test]
    async fn test_receive_file_empty_payload() {
        let (mut raw, b) = duplex(64);
        let mut conn = Connection::new(b);
        raw.write_all(END_OF_FILE_LINE).await.unwrap();

        let mut sink = Vec::new();
        let received = conn.receive_file(&mut sink, |_| {}).await.unwrap();
        assert_eq!(received.bytes, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_receive_file_eof_before_marker() {
        let (mut raw, b) = duplex(64);
        let mut conn = Connection::new(b);
        raw.write_all(b"partial data").await.unwrap();
        drop(raw);

        let mut sink = Vec::new();
        let err = conn.receive_file(&mut sink, |_| {}).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_receive_file_sink_error_still_drains() {
        let (mut raw, b) = duplex(1024);
        let mut conn = Connection::new(b);
        raw.write_all(b"some bytesEND_OF_FILE\nCMD:pwd\n")
            .await
            .unwrap();

        let received = conn
            .receive_file(&mut FailingWriter, |_| {})
            .await
            .unwrap();
        assert_eq!(received.bytes, 0);
        assert!(received.sink_error.is_some());
        assert_eq!(
            conn.read_message().await.unwrap().unwrap(),
            Message::Command("pwd".into())
        );
    }

    #[tokio::test]
    async fn test_send_file_appends_marker() {
        let (a, mut raw) = duplex(1024);
        let mut conn = Connection::new(a);
        let mut source: &[u8] = b"abc";
        conn.send_file(&mut source, |_| {}).await.unwrap();
        drop(conn);

        let mut wire = Vec::new();
        raw.read_to_end(&mut wire).await.unwrap();
        let mut expected = b"abc".to_vec();
        expected.extend_from_slice(END_OF_FILE);
        expected.push(b'\n');
        assert_eq!(wire, expected);
    }

    #[tokio::test]
    async fn test_read_reply_line_skips_blank() {
        let (mut raw, b) = duplex(64);
        let mut conn = Connection::new(b);
        raw.write_all(b"\n\nAUTH_SUCCESS\n").await.unwrap();
        assert_eq!(
            conn.read_reply_line().await.unwrap().as_deref(),
            Some("AUTH_SUCCESS")
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (a, mut raw) = duplex(64);
        let mut conn = Connection::new(a);
        conn.shutdown().await.unwrap();
        conn.shutdown().await.unwrap();
        assert!(conn.is_closed());

        let mut buf = Vec::new();
        assert_eq!(raw.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
