//! Start-line and header-line parsing.
//!
//! Every function takes one complete record as produced by
//! `FrameBuffer::read_line` (end-of-line marker included) and either
//! accepts it or raises `Error::Format` carrying the raw line.

use super::message::{BodyLength, Header, Method, StartLine};
use crate::error::{Error, Result};
use crate::runtime::END_OF_LINE;

/// Strip the trailing CRLF, rejecting records that lack it.
fn strip_eol<'a>(line: &'a [u8], reason: &'static str) -> Result<&'a [u8]> {
    line.strip_suffix(END_OF_LINE)
        .ok_or_else(|| Error::format(reason, line))
}

/// Whether `line` is the blank line ending a header block.
pub fn is_blank(line: &[u8]) -> bool {
    line == END_OF_LINE
}

fn utf8<'a>(bytes: &'a [u8], reason: &'static str, line: &[u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| Error::format(reason, line))
}

/// Parse `VERSION SP CODE SP REASON CRLF`.
///
/// The code must be three digits in `[100, 599]` and the reason non-empty.
/// The reason may itself contain spaces.
pub fn parse_status_line(line: &[u8]) -> Result<StartLine> {
    const BAD: &str = "invalid status line";
    let content = strip_eol(line, BAD)?;

    let mut parts = content.splitn(3, |&b| b == b' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().ok_or_else(|| Error::format(BAD, line))?;
    let reason = parts.next().ok_or_else(|| Error::format(BAD, line))?;

    if !version.starts_with(b"HTTP/") || version.len() <= 5 {
        return Err(Error::format(BAD, line));
    }
    if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
        return Err(Error::format(BAD, line));
    }
    let code = code
        .iter()
        .fold(0u16, |acc, &digit| acc * 10 + u16::from(digit - b'0'));
    if !(100..=599).contains(&code) {
        return Err(Error::format("status code out of range", line));
    }
    if reason.is_empty() {
        return Err(Error::format(BAD, line));
    }

    Ok(StartLine::Response {
        code,
        reason: utf8(reason, BAD, line)?.to_string(),
        version: utf8(version, BAD, line)?.to_string(),
    })
}

/// Parse `METHOD SP TARGET SP VERSION CRLF`.
///
/// Exactly three non-empty fields separated by single spaces. A well formed
/// line naming an unknown method raises `UnsupportedMethod`.
pub fn parse_request_line(line: &[u8]) -> Result<StartLine> {
    const BAD: &str = "invalid request line";
    let content = strip_eol(line, BAD)?;

    let fields: Vec<&[u8]> = content.split(|&b| b == b' ').collect();
    let [method, target, version] = fields.as_slice() else {
        return Err(Error::format(BAD, line));
    };
    if method.is_empty() || target.is_empty() || !version.starts_with(b"HTTP/") {
        return Err(Error::format(BAD, line));
    }

    Ok(StartLine::Request {
        method: Method::parse(method)?,
        target: utf8(target, BAD, line)?.to_string(),
        version: utf8(version, BAD, line)?.to_string(),
    })
}

/// Parse `Name ":" Value CRLF`, tolerating spaces around the separator.
pub fn parse_header_line(line: &[u8]) -> Result<Header> {
    const BAD: &str = "invalid header line";
    let content = strip_eol(line, BAD)?;

    let colon = content
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::format("header line without separator", line))?;
    let name = content[..colon].trim_ascii();
    let value = content[colon + 1..].trim_ascii();
    if name.is_empty() {
        return Err(Error::format(BAD, line));
    }

    Ok(Header {
        name: utf8(name, BAD, line)?.to_string(),
        value: String::from_utf8_lossy(value).into_owned(),
    })
}

/// Body framing signals gathered while the header block is read.
///
/// Only `Content-Length`, `Transfer-Encoding` and `Content-Type` are
/// examined, by exact case-sensitive name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Framing {
    content_length: Option<usize>,
    /// Raw `Content-Length` record, kept for the over-limit diagnostic.
    content_length_line: Vec<u8>,
    transfer_encoding: Option<&'static str>,
    multipart: bool,
}

impl Framing {
    /// Record one header. `line` is the raw record, for diagnostics.
    pub fn observe(&mut self, header: &Header, line: &[u8]) -> Result<()> {
        match header.name.as_str() {
            "Content-Length" => {
                let value = header.value.as_bytes();
                if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
                    return Err(Error::format("invalid Content-Length", line));
                }
                let length = header
                    .value
                    .parse()
                    .map_err(|_| Error::format("Content-Length overflows", line))?;
                self.content_length = Some(length);
                self.content_length_line = line.to_vec();
            }
            "Transfer-Encoding" => match header.value.as_str() {
                "identity" => self.transfer_encoding = Some("Transfer-Encoding: identity"),
                "chunked" => self.transfer_encoding = Some("Transfer-Encoding: chunked"),
                // Other codings are left to the application.
                _ => {}
            },
            "Content-Type" if header.value == "multipart/byteranges" => {
                self.multipart = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve the body size.
    ///
    /// `status` is the response code when reading a response; `head` is
    /// true when the exchange is for a HEAD request. Evaluated in order:
    /// no-body codes and HEAD, rejected transfer encodings, declared length,
    /// rejected multipart, then read-until-close.
    pub fn body_length(&self, status: Option<u16>, head: bool, max_body: usize) -> Result<BodyLength> {
        let bodiless = match status {
            Some(code) => code < 200 || code == 204 || code == 304,
            None => false,
        };
        if bodiless || head {
            return Ok(BodyLength::Fixed(0));
        }
        if let Some(encoding) = self.transfer_encoding {
            return Err(Error::UnsupportedEncoding(encoding));
        }
        if let Some(length) = self.content_length {
            if length > max_body {
                return Err(Error::format(
                    "declared body exceeds max_body_size",
                    &self.content_length_line,
                ));
            }
            return Ok(BodyLength::Fixed(length));
        }
        if self.multipart {
            return Err(Error::UnsupportedEncoding("multipart/byteranges"));
        }
        Ok(BodyLength::UntilClose)
    }
}
