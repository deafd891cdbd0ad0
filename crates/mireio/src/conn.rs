//! Line-oriented telnet connection wrapper.
//!
//! [`TelnetConn`] turns a raw byte stream into line IO while consuming the
//! embedded IAC control protocol: negotiation sequences are stripped from
//! input, lines end at CR, LF, or CRLF, and non-printable bytes (except TAB)
//! never reach callers. Writes from any number of logical producers are
//! serialized through a single [`ConnWriter`] so raw bytes cannot
//! interleave on the socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::telnet::{IacParser, IAC, OPT_ECHO, OPT_SUPPRESS_GO_AHEAD, WILL, WONT};

const DEFAULT_MAX_LINE_LEN: usize = 4 * 1024;

/// Exclusive, cloneable write path for one connection.
///
/// Every write takes the shared lock for the full duration of the write, so
/// concurrent producers (command loop, event forwarder, idle monitor) can
/// never interleave bytes. A zero write timeout disables the bound.
#[derive(Debug)]
pub struct ConnWriter<S> {
    inner: Arc<Mutex<WriteHalf<S>>>,
    write_timeout: Duration,
}

impl<S> Clone for ConnWriter<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            write_timeout: self.write_timeout,
        }
    }
}

impl<S: AsyncWrite + Send> ConnWriter<S> {
    /// Write raw bytes.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.locked_write(&[data]).await
    }

    /// Write a line of text followed by CRLF.
    pub async fn write_line(&self, text: &str) -> io::Result<()> {
        self.locked_write(&[text.as_bytes(), b"\r\n"]).await
    }

    /// Write a prompt without a trailing newline.
    pub async fn write_prompt(&self, prompt: &str) -> io::Result<()> {
        self.locked_write(&[prompt.as_bytes()]).await
    }

    async fn locked_write(&self, parts: &[&[u8]]) -> io::Result<()> {
        let fut = async {
            let mut w = self.inner.lock().await;
            for p in parts {
                if !p.is_empty() {
                    w.write_all(p).await?;
                }
            }
            w.flush().await
        };
        if self.write_timeout.is_zero() {
            fut.await
        } else {
            tokio::time::timeout(self.write_timeout, fut)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
        }
    }
}

/// One telnet client connection.
///
/// The read half lives here exclusively; the write half is shared through
/// [`ConnWriter`] clones handed out by [`TelnetConn::writer`].
#[derive(Debug)]
pub struct TelnetConn<S> {
    reader: ReadHalf<S>,
    writer: ConnWriter<S>,
    iac: IacParser,
    chunk: BytesMut,
    /// Filtered data bytes not yet consumed into a line.
    pending: std::collections::VecDeque<u8>,
    /// A CR ended the previous line; swallow one immediately-following LF.
    skip_lf: bool,
    read_timeout: Duration,
    max_line_len: usize,
}

impl<S: AsyncRead + AsyncWrite + Send> TelnetConn<S> {
    pub fn new(stream: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: rd,
            writer: ConnWriter {
                inner: Arc::new(Mutex::new(wr)),
                write_timeout,
            },
            iac: IacParser::new(),
            chunk: BytesMut::with_capacity(4 * 1024),
            pending: std::collections::VecDeque::new(),
            skip_lf: false,
            read_timeout,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    /// A cloneable handle on this connection's exclusive write path.
    pub fn writer(&self) -> ConnWriter<S> {
        self.writer.clone()
    }

    /// Announce our one capability: we suppress go-ahead.
    pub async fn negotiate(&self) -> io::Result<()> {
        self.writer.write(&[IAC, WILL, OPT_SUPPRESS_GO_AHEAD]).await
    }

    /// Read one line, stripping IAC sequences and non-printable bytes
    /// (except TAB). Lines end at CR, LF, or CRLF.
    ///
    /// Returns:
    /// - `Ok(Some(line))` for a line (may be empty),
    /// - `Ok(None)` on clean EOF with no partial line buffered.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            while let Some(b) = self.pending.pop_front() {
                if self.skip_lf {
                    self.skip_lf = false;
                    if b == b'\n' {
                        continue;
                    }
                }
                match b {
                    b'\n' => return Ok(Some(into_text(line))),
                    b'\r' => {
                        self.skip_lf = true;
                        return Ok(Some(into_text(line)));
                    }
                    // Filter control characters except tab.
                    b if b < 0x20 && b != b'\t' => continue,
                    b => line.push(b),
                }
                if line.len() > self.max_line_len {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
                }
            }

            let n = self.read_chunk().await?;
            if n == 0 {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
        }
    }

    /// Read one line with client-side echo suppressed.
    ///
    /// Sends `IAC WILL ECHO` before reading (the client stops echoing) and
    /// always restores with `IAC WONT ECHO` plus a CRLF afterwards - even on
    /// error - so the cursor advances past the hidden input.
    pub async fn read_password(&mut self) -> io::Result<Option<String>> {
        self.writer.write(&[IAC, WILL, OPT_ECHO]).await?;
        let res = self.read_line().await;
        let _ = self.writer.write(&[IAC, WONT, OPT_ECHO]).await;
        let _ = self.writer.write(b"\r\n").await;
        res
    }

    async fn read_chunk(&mut self) -> io::Result<usize> {
        self.chunk.clear();
        let read = self.reader.read_buf(&mut self.chunk);
        let n = if self.read_timeout.is_zero() {
            read.await?
        } else {
            tokio::time::timeout(self.read_timeout, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??
        };
        if n > 0 {
            let (data, replies) = self.iac.parse(&self.chunk[..n]);
            if !replies.is_empty() {
                self.writer.write(&replies).await?;
            }
            self.pending.extend(data);
        }
        Ok(n)
    }
}

fn into_text(line: Vec<u8>) -> String {
    String::from_utf8_lossy(&line).into_owned()
}
