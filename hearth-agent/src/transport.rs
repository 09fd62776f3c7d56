//! Transport layer for the agent process.
//!
//! Envelopes are framed as newline-delimited JSON. Reading and writing are
//! split into two traits so the inbound reader and the single outbound
//! writer can run on separate tasks:
//! - [`LineSource`] / [`LineSink`]: any async byte stream, e.g. the process's stdio
//! - [`ChannelSource`] / [`ChannelSink`]: in-process tokio mpsc channels (for testing and embedding)

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::mpsc;

use crate::error::ProtocolError;

/// Inbound half of a transport.
#[async_trait]
pub trait MessageSource: Send {
    /// Read the next line.
    ///
    /// Returns `Ok(None)` on EOF (the host closed its end).
    async fn read_message(&mut self) -> Result<Option<String>, ProtocolError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one envelope line; the implementation appends the newline and flushes.
    async fn write_message(&mut self, message: &str) -> Result<(), ProtocolError>;

    /// Flush any buffered output.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

/// Reads newline-framed envelopes from any buffered reader.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
}

pub type StdinSource = LineSource<BufReader<Stdin>>;

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for LineSource<R> {
    async fn read_message(&mut self) -> Result<Option<String>, ProtocolError> {
        self.buf.clear();
        let bytes_read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        // Invalid UTF-8 becomes replacement characters and fails JSON parsing
        // downstream instead of ending the session.
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end().to_string()))
    }
}

/// Writes one envelope per line and flushes after each.
pub struct LineSink<W> {
    writer: W,
}

pub type StdoutSink = LineSink<Stdout>;

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for LineSink<W> {
    async fn write_message(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Both halves over the process's stdin and stdout.
pub fn stdio() -> (StdinSource, StdoutSink) {
    (
        LineSource::new(BufReader::new(tokio::io::stdin())),
        LineSink::new(tokio::io::stdout()),
    )
}

// ---------------------------------------------------------------------------
// channels
// ---------------------------------------------------------------------------

pub struct ChannelSource {
    receiver: mpsc::Receiver<String>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn read_message(&mut self) -> Result<Option<String>, ProtocolError> {
        Ok(self.receiver.recv().await)
    }
}

pub struct ChannelSink {
    sender: mpsc::Sender<String>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn write_message(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.sender
            .send(message.to_string())
            .await
            .map_err(|_| ProtocolError::Transport {
                message: "host side of the channel closed".into(),
            })
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// The host's view of a channel transport.
pub struct HostEnd {
    /// Lines sent to the agent. Dropping it signals EOF.
    pub to_agent: mpsc::Sender<String>,
    /// Lines written by the agent.
    pub from_agent: mpsc::Receiver<String>,
}

/// Create a connected in-process transport.
pub fn channel(capacity: usize) -> (ChannelSource, ChannelSink, HostEnd) {
    let (to_agent, receiver) = mpsc::channel(capacity);
    let (sender, from_agent) = mpsc::channel(capacity);
    (
        ChannelSource { receiver },
        ChannelSink { sender },
        HostEnd {
            to_agent,
            from_agent,
        },
    )
}
