//! NDJSON host over a byte stream (stdin/stdout for `crossweb-host`)
//!
//! One reader feeds invoke frames to the dispatcher; one writer task drains
//! the outbound queue, so frames never interleave on the output.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::HostState;
use crate::wire::Frame;

/// Hard cap on one inbound line, well above any valid frame
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Result of reading a bounded line
#[derive(Debug, PartialEq)]
pub enum ReadLineResult {
    /// A complete line, without the trailing newline
    Line(String),
    /// The line exceeded the cap and was discarded
    Oversize(usize),
    Eof,
}

/// Read one newline-terminated line, discarding it if it exceeds `max` bytes
///
/// An oversized line is drained up to its newline without being kept, so at
/// most `max` bytes are ever held.
pub async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> io::Result<ReadLineResult> {
    let mut buf = Vec::new();
    match fill_line(reader, max, &mut buf).await? {
        LineFill::Eof => Ok(ReadLineResult::Eof),
        LineFill::Oversize(len) => Ok(ReadLineResult::Oversize(len)),
        LineFill::Complete => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            let line =
                String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(ReadLineResult::Line(line))
        }
    }
}

enum LineFill {
    Complete,
    Oversize(usize),
    Eof,
}

/// Append one line to `buf` chunk by chunk; past `max` bytes keep counting only
async fn fill_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
    buf: &mut Vec<u8>,
) -> io::Result<LineFill> {
    let mut total = 0usize;
    let mut oversize = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (take, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        total += take;
        if !oversize {
            if total > max {
                oversize = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..take]);
            }
        }
        reader.consume(take);
        if done {
            break;
        }
    }

    Ok(match (total, oversize) {
        (0, _) => LineFill::Eof,
        (len, true) => LineFill::Oversize(len),
        _ => LineFill::Complete,
    })
}

/// Spawn the single writer task draining `outbound` into `writer`
pub fn spawn_writer<W>(mut outbound: mpsc::Receiver<Frame>, mut writer: W) -> JoinHandle<io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let line = match frame.to_ndjson() {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to encode frame: {}", e);
                    continue;
                }
            };
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        debug!("outbound queue closed, writer stopping");
        Ok(())
    })
}

/// Feed every inbound line to the dispatcher until EOF
pub async fn serve<R: AsyncBufRead + Unpin>(state: &HostState, mut reader: R) -> io::Result<()> {
    let dispatcher = state.dispatcher();
    loop {
        match read_line_bounded(&mut reader, MAX_LINE_BYTES).await {
            Ok(ReadLineResult::Line(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatcher.handle_message(&line);
            }
            Ok(ReadLineResult::Oversize(len)) => {
                warn!(len, "oversized line discarded");
            }
            Ok(ReadLineResult::Eof) => {
                info!("input closed");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("discarding non UTF-8 line");
            }
            Err(e) => return Err(e),
        }
    }
}
