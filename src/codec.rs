use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{Command, Frame, Version};
use crate::headers::{Headers, names};

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const NUL: u8 = 0;

/// Errors produced while decoding wire bytes into frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input could not be interpreted as a STOMP frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Header escaping rules.
///
/// STOMP 1.0 sends header text verbatim. 1.1 escapes backslash, LF and
/// colon; 1.2 additionally escapes CR. CONNECT and CONNECTED frames are
/// never escaped in any version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escaping {
    #[default]
    None,
    V1_1,
    V1_2,
}

impl Escaping {
    pub fn for_version(version: Version) -> Self {
        match version {
            Version::V1_0 => Escaping::None,
            Version::V1_1 => Escaping::V1_1,
            Version::V1_2 => Escaping::V1_2,
        }
    }
}

fn exempt_from_escaping(command: &str) -> bool {
    command == Command::Connect.as_str() || command == Command::Connected.as_str()
}

fn escape_header(input: &str, mode: Escaping) -> std::borrow::Cow<'_, str> {
    if mode == Escaping::None
        || !input
            .chars()
            .any(|c| matches!(c, '\\' | '\n' | ':' | '\r'))
    {
        return std::borrow::Cow::Borrowed(input);
    }
    let mut result = String::with_capacity(input.len() + 4);
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            '\r' if mode == Escaping::V1_2 => result.push_str("\\r"),
            _ => result.push(ch),
        }
    }
    std::borrow::Cow::Owned(result)
}

fn unescape_header(input: &str, mode: Escaping) -> Result<String, CodecError> {
    if mode == Escaping::None || !input.contains('\\') {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('r') if mode == Escaping::V1_2 => out.push('\r'),
            Some(other) => {
                return Err(CodecError::MalformedFrame(format!(
                    "invalid escape sequence '\\{}' in header '{}'",
                    other, input
                )));
            }
            None => {
                return Err(CodecError::MalformedFrame(format!(
                    "dangling escape at end of header '{}'",
                    input
                )));
            }
        }
    }
    Ok(out)
}

/// Result of splitting an accumulated inbound buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unmarshalled {
    /// Complete frames in wire order.
    pub frames: Vec<Frame>,
    /// One entry per terminated segment that failed to decode. Such a
    /// segment is dropped without affecting its neighbours.
    pub errors: Vec<CodecError>,
    /// Trailing bytes of an incomplete frame, to be prefixed onto the next
    /// inbound chunk. Empty when the buffer ended on a frame boundary.
    pub partial: Vec<u8>,
}

/// `StompCodec` converts between [`Frame`] values and STOMP wire bytes.
///
/// Responsibilities:
/// - Encode a frame as `COMMAND\nname:value\n...\n\nBODY\0`, computing the
///   `content-length` header itself.
/// - Split an accumulated receive buffer on NUL terminators, decode every
///   complete frame and hand back the incomplete tail so a frame fragmented
///   across several transport messages is reassembled on the next call.
/// - Apply the header escaping rules of the negotiated protocol version.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec {
    escaping: Escaping,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_escaping(escaping: Escaping) -> Self {
        Self { escaping }
    }

    pub fn escaping(&self) -> Escaping {
        self.escaping
    }

    fn escaping_for(&self, command: &str) -> Escaping {
        if exempt_from_escaping(command) {
            Escaping::None
        } else {
            self.escaping
        }
    }

    /// Encode a frame into wire bytes, including the terminating NUL.
    ///
    /// Any `content-length` header on the frame is ignored. When the body is
    /// non-empty and the frame did not opt out via
    /// [`Frame::without_content_length`], `content-length` is written after
    /// the frame's own headers with the body's byte length.
    pub fn marshal(&self, frame: &Frame) -> Bytes {
        let escaping = self.escaping_for(&frame.command);
        let mut dst = BytesMut::with_capacity(frame.command.len() + frame.body.len() + 64);

        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(LF);

        for (k, v) in frame.headers.iter() {
            if k.eq_ignore_ascii_case(names::CONTENT_LENGTH) {
                continue;
            }
            dst.extend_from_slice(escape_header(k, escaping).as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(escape_header(v, escaping).as_bytes());
            dst.put_u8(LF);
        }

        if !frame.body.is_empty() && !frame.content_length_suppressed() {
            dst.extend_from_slice(names::CONTENT_LENGTH.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(frame.body.len().to_string().as_bytes());
            dst.put_u8(LF);
        }

        dst.put_u8(LF);
        dst.extend_from_slice(&frame.body);
        dst.put_u8(NUL);
        dst.freeze()
    }

    /// Decode a single frame from `data`, which holds at most one frame and
    /// may or may not include its NUL terminator.
    ///
    /// Leading EOLs (heartbeats) are skipped. Repeated headers keep their
    /// first value and header lines without a colon are ignored. With a
    /// numeric `content-length` header the body is that many bytes (clipped
    /// to the input); otherwise it runs to the first NUL or the end of the
    /// input.
    pub fn unmarshal_one(&self, data: &[u8]) -> Result<Frame, CodecError> {
        let len = data.len();
        let mut pos = skip_eols(data, 0);
        if pos >= len {
            return Err(CodecError::MalformedFrame("missing command line".into()));
        }

        let (line, next) = read_line(data, pos);
        pos = next;
        let command = std::str::from_utf8(line)
            .map_err(|e| CodecError::MalformedFrame(format!("invalid utf8 in command: {}", e)))?
            .trim()
            .to_string();
        if command.is_empty() {
            return Err(CodecError::MalformedFrame("missing command line".into()));
        }
        let escaping = self.escaping_for(&command);

        let mut headers = Headers::new();
        let mut body_start = len;
        while pos < len {
            let (line, next) = read_line(data, pos);
            pos = next;
            if line.is_empty() {
                body_start = pos;
                break;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                tracing::debug!(
                    "ignoring header line without colon: {:?}",
                    String::from_utf8_lossy(line)
                );
                continue;
            };
            let name = std::str::from_utf8(&line[..colon]).map_err(|e| {
                CodecError::MalformedFrame(format!("invalid utf8 in header key: {}", e))
            })?;
            let value = std::str::from_utf8(&line[colon + 1..]).map_err(|e| {
                CodecError::MalformedFrame(format!("invalid utf8 in header value: {}", e))
            })?;
            let name = unescape_header(name.trim(), escaping)?;
            let value = unescape_header(value.trim(), escaping)?;
            headers.set_if_absent(name, value);
        }
        let body_start = body_start.min(len);

        let content_length = headers.get(names::CONTENT_LENGTH).and_then(|raw| {
            let parsed = raw.parse::<usize>().ok();
            if parsed.is_none() {
                tracing::debug!("ignoring invalid content-length '{}'", raw);
            }
            parsed
        });
        let body_end = match content_length {
            Some(n) => body_start.saturating_add(n).min(len),
            None => data[body_start..]
                .iter()
                .position(|&b| b == NUL)
                .map_or(len, |i| body_start + i),
        };

        let mut frame = Frame::new(command).set_body(data[body_start..body_end].to_vec());
        frame.headers = headers;
        Ok(frame)
    }

    /// Split `buffer` on frame terminators (NUL followed by any number of
    /// LFs) and decode every complete frame.
    ///
    /// The segment after the last terminator is incomplete and is returned
    /// as [`Unmarshalled::partial`], unless it is made of heartbeat EOLs only.
    /// Segments between terminators that hold nothing but EOLs are
    /// heartbeats and yield no frame. Every other segment is decoded on its
    /// own; failures land in [`Unmarshalled::errors`].
    pub fn unmarshal(&self, buffer: &[u8]) -> Unmarshalled {
        let mut out = Unmarshalled::default();
        let mut start = 0usize;

        while let Some(rel) = buffer[start..].iter().position(|&b| b == NUL) {
            let segment = &buffer[start..start + rel];
            if !is_heartbeat(segment) {
                match self.unmarshal_one(segment) {
                    Ok(frame) => out.frames.push(frame),
                    Err(e) => out.errors.push(e),
                }
            }
            start += rel + 1;
            while start < buffer.len() && buffer[start] == LF {
                start += 1;
            }
        }

        let last = &buffer[start..];
        if !is_heartbeat(last) {
            out.partial = last.to_vec();
        }
        out
    }
}

/// Encode a frame without header escaping. See [`StompCodec::marshal`].
pub fn marshal(frame: &Frame) -> Bytes {
    StompCodec::new().marshal(frame)
}

/// Decode one frame without header unescaping. See
/// [`StompCodec::unmarshal_one`].
pub fn unmarshal_one(data: &[u8]) -> Result<Frame, CodecError> {
    StompCodec::new().unmarshal_one(data)
}

/// Split and decode a receive buffer without header unescaping. See
/// [`StompCodec::unmarshal`].
pub fn unmarshal(buffer: &[u8]) -> Unmarshalled {
    StompCodec::new().unmarshal(buffer)
}

/// True for input consisting only of EOL bytes (an empty slice included).
fn is_heartbeat(segment: &[u8]) -> bool {
    segment.iter().all(|&b| b == LF || b == CR)
}

fn skip_eols(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() {
        match data[pos] {
            LF => pos += 1,
            CR if data.get(pos + 1) == Some(&LF) => pos += 2,
            _ => break,
        }
    }
    pos
}

/// Returns the line starting at `pos` without its EOL (LF or CRLF) and the
/// position just past the EOL.
fn read_line(data: &[u8], pos: usize) -> (&[u8], usize) {
    let (mut line, next) = match data[pos..].iter().position(|&b| b == LF) {
        Some(rel) => (&data[pos..pos + rel], pos + rel + 1),
        None => (&data[pos..], data.len()),
    };
    if line.last() == Some(&CR) {
        line = &line[..line.len() - 1];
    }
    (line, next)
}
