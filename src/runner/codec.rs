//! Line codec for engine JSONL streams.
//!
//! Splits child stdout on LF with a 1 MiB per-line cap, protecting the
//! bridge from allocating unbounded memory for a single record from a
//! misbehaving engine. Invalid UTF-8 is decoded lossily rather than
//! rejected — engines occasionally interleave raw tool output bytes.
//!
//! A trailing partial line (no terminating `\n`) is emitted at EOF.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Maximum line length accepted from an engine: 1 MiB.
///
/// Lines exceeding this limit cause [`LineCodec::decode`] to return
/// [`AppError::Translation`] with `"line too long"`; the runner aborts
/// the run on the first such error.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// LF line framing with a fixed [`MAX_LINE_BYTES`] limit and lossy UTF-8.
#[derive(Debug, Default)]
pub struct LineCodec(());

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self(())
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let scan = src.len().min(MAX_LINE_BYTES + 1);
        if let Some(pos) = src[..scan].iter().position(|b| *b == b'\n') {
            let line = src.split_to(pos + 1);
            return Ok(Some(decode_line(&line[..pos])));
        }
        if src.len() > MAX_LINE_BYTES {
            // Drop the oversized prefix so the buffer cannot grow without
            // bound while the caller tears the run down.
            src.advance(MAX_LINE_BYTES);
            return Err(AppError::Translation(format!(
                "line too long: exceeded {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.split_to(src.len());
                Ok(Some(decode_line(&rest)))
            }
        }
    }
}

/// Lossy-decode one line, trimming a trailing CR left by CRLF output.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = match bytes.split_last() {
        Some((b'\r', head)) => head,
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}
