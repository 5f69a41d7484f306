//! Line framing for the dock byte stream

use super::{CodecError, DockCommand};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Splits incoming bytes on `\n`, strips the trailing `\r` and decodes lossily.
///
/// A line longer than the limit is reported once as
/// [`CodecError::LineTooLong`]; its remaining bytes are dropped up to the next
/// newline and decoding carries on with the following line.
#[derive(Debug, Clone)]
pub struct DockLineCodec {
    max_length: usize,
    discarding: bool,
}

impl DockLineCodec {
    /// Create a codec with the default line limit
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom line limit
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            discarding: false,
        }
    }

    /// Configured line limit
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for DockLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\r').to_string()
}

impl Decoder for DockLineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        loop {
            match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let line = buf.split_to(pos + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if pos > self.max_length {
                        return Err(CodecError::LineTooLong(self.max_length));
                    }
                    return Ok(Some(to_text(&line[..pos])));
                }
                None if self.discarding => {
                    buf.clear();
                    return Ok(None);
                }
                None if buf.len() > self.max_length => {
                    buf.clear();
                    self.discarding = true;
                    return Err(CodecError::LineTooLong(self.max_length));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(to_text(&rest)))
    }
}

impl Encoder<DockCommand> for DockLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: DockCommand, dst: &mut BytesMut) -> Result<(), CodecError> {
        let wire = item.to_wire();
        dst.reserve(wire.len());
        dst.put_slice(wire.as_bytes());
        Ok(())
    }
}
