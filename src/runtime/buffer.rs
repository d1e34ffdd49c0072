//! Line/body multiplexed read buffer.
//!
//! One fixed-size byte window serves two access patterns from the same
//! connection without double buffering:
//!
//! - **Line mode** (`read_line`): find the next CRLF-terminated record. If
//!   the unconsumed region holds no complete line, the fragment is shifted
//!   to the front of the window and the socket is read into the free tail.
//!   Only the unchecked suffix is scanned after a refill.
//! - **Body mode** (`read_body`): drain whatever the line scans over-read
//!   into the caller's buffer first, then read the socket straight into the
//!   caller's buffer, bypassing the window.
//!
//! ## Layout
//!
//! ```text
//! data: [ consumed | record (record_len) | rest of unconsumed | free ]
//!                  ^start                                      ^start + total
//! ```
//!
//! `record_len <= total <= capacity - start` always holds. All state lives
//! in the buffer itself, so a read that suspends can be resumed later
//! without losing or re-delivering a byte.

use crate::error::{Error, Result};
use crate::runtime::connection::Connection;
use crate::runtime::policy::{IoPolicy, Step};
use std::fmt;

/// Default window size.
pub const DEFAULT_CAPACITY: usize = 4096;

/// End-of-line marker terminating every record.
pub const END_OF_LINE: &[u8; 2] = b"\r\n";

/// Fixed-capacity read window with an unconsumed-region cursor.
pub struct FrameBuffer {
    data: Box<[u8]>,
    /// First unconsumed byte.
    start: usize,
    /// Length of the record most recently returned by `read_line`.
    record_len: usize,
    /// Bytes buffered from `start`, including the pending record.
    total: usize,
    /// Bytes from `start` already scanned without finding a marker.
    checked: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer with room for lines of up to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(END_OF_LINE.len());
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            record_len: 0,
            total: 0,
            checked: 0,
        }
    }

    /// Unconsumed bytes not yet handed out as a record.
    pub fn buffered(&self) -> usize {
        self.total - self.record_len
    }

    /// The record found by the last `read_line`, marker included.
    pub fn record(&self) -> &[u8] {
        &self.data[self.start..self.start + self.record_len]
    }

    /// Find the next line.
    ///
    /// Returns the record length (marker included); the bytes are available
    /// through `record()` until the next read. `Ready(0)` means the peer
    /// closed with nothing left buffered. If the peer closes part-way
    /// through a line the unterminated fragment is returned as the record.
    pub fn read_line<P: IoPolicy>(&mut self, conn: &mut Connection<P>) -> Result<Step<usize>> {
        self.consume_record();
        loop {
            if let Some(len) = self.scan() {
                self.record_len = len;
                return Ok(Step::Ready(len));
            }

            if self.start != 0 {
                self.data.copy_within(self.start..self.start + self.total, 0);
                self.start = 0;
            }
            if self.total == self.data.len() {
                return Err(Error::format(
                    "line exceeds frame buffer capacity",
                    &self.data[..self.total],
                ));
            }

            match conn.read(&mut self.data[self.total..])? {
                Step::Blocked(readiness) => return Ok(Step::Blocked(readiness)),
                Step::Ready(0) => {
                    self.record_len = self.total;
                    return Ok(Step::Ready(self.total));
                }
                Step::Ready(n) => self.total += n,
            }
        }
    }

    /// Fill `dest` with body bytes.
    ///
    /// Serves bytes already buffered by earlier line scans before touching
    /// the socket. `Ready(0)` only when the peer has closed and nothing is
    /// buffered.
    pub fn read_body<P: IoPolicy>(
        &mut self,
        conn: &mut Connection<P>,
        dest: &mut [u8],
    ) -> Result<Step<usize>> {
        self.consume_record();
        if self.total == 0 {
            return conn.read(dest);
        }

        let n = self.total.min(dest.len());
        dest[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        self.start += n;
        self.total -= n;
        self.checked = 0;
        if self.total == 0 {
            self.start = 0;
        }
        Ok(Step::Ready(n))
    }

    fn consume_record(&mut self) {
        if self.record_len == 0 {
            return;
        }
        self.start += self.record_len;
        self.total -= self.record_len;
        self.record_len = 0;
        self.checked = 0;
        if self.total == 0 {
            self.start = 0;
        }
    }

    /// Scan the unchecked suffix for a marker.
    ///
    /// Backs up one byte so a marker split across two refills is found.
    fn scan(&mut self) -> Option<usize> {
        let region = &self.data[self.start..self.start + self.total];
        let from = self.checked.saturating_sub(1);
        match region[from..].windows(2).position(|w| w == END_OF_LINE) {
            Some(pos) => Some(from + pos + END_OF_LINE.len()),
            None => {
                self.checked = self.total;
                None
            }
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.data.len())
            .field("start", &self.start)
            .field("record_len", &self.record_len)
            .field("total", &self.total)
            .field("checked", &self.checked)
            .finish()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::{blocking_pair, cooperative_pair};
    use crate::runtime::policy::Readiness;
    use std::io::Write;
    use std::net::Shutdown;

    #[test]
    fn test_lines_then_body_reconstruct_input() {
        let (mut conn, mut peer) = blocking_pair();
        let sent = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789";
        peer.write_all(sent).unwrap();
        peer.shutdown(Shutdown::Write).unwrap();

        let mut buffer = FrameBuffer::with_capacity(64);
        let mut seen = Vec::new();
        loop {
            let len = match buffer.read_line(&mut conn).unwrap() {
                Step::Ready(len) => len,
                Step::Blocked(_) => unreachable!(),
            };
            seen.extend_from_slice(buffer.record());
            if buffer.record() == END_OF_LINE || len == 0 {
                break;
            }
        }

        let mut body = [0u8; 4];
        loop {
            match buffer.read_body(&mut conn, &mut body).unwrap() {
                Step::Ready(0) => break,
                Step::Ready(n) => seen.extend_from_slice(&body[..n]),
                Step::Blocked(_) => unreachable!(),
            }
        }
        assert_eq!(seen, sent);
    }

    #[test]
    fn test_marker_straddling_two_reads() {
        let (mut conn, mut peer) = cooperative_pair();
        let mut buffer = FrameBuffer::with_capacity(32);

        peer.write_all(b"abc\r").unwrap();
        assert_eq!(
            buffer.read_line(&mut conn).unwrap(),
            Step::Blocked(Readiness::Read)
        );
        assert_eq!(buffer.checked, 4);

        peer.write_all(b"\nrest").unwrap();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(5));
        assert_eq!(buffer.record(), b"abc\r\n");
        assert_eq!(buffer.buffered(), 4);
    }

    #[test]
    fn test_scan_never_revisits_checked_bytes() {
        let (mut conn, mut peer) = cooperative_pair();
        let mut buffer = FrameBuffer::with_capacity(64);

        for (i, piece) in [&b"Header"[..], b"-Name: ", b"value"].iter().enumerate() {
            peer.write_all(piece).unwrap();
            assert!(matches!(
                buffer.read_line(&mut conn).unwrap(),
                Step::Blocked(Readiness::Read)
            ));
            let expected: usize = [6, 13, 18][i];
            assert_eq!(buffer.checked, expected);
        }

        peer.write_all(b"\r\n").unwrap();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(20));
        assert_eq!(buffer.record(), b"Header-Name: value\r\n");
    }

    #[test]
    fn test_fragment_moves_to_front_to_make_room() {
        let (mut conn, mut peer) = blocking_pair();
        let mut buffer = FrameBuffer::with_capacity(16);

        peer.write_all(b"0123456789\r\nabcd").unwrap();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(12));

        // "abcd" sits at offset 12; the next line needs more room than the tail has.
        peer.write_all(b"efghijk\r\n").unwrap();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(13));
        assert_eq!(buffer.record(), b"abcdefghijk\r\n");
    }

    #[test]
    fn test_body_drains_buffer_before_socket() {
        let (mut conn, mut peer) = blocking_pair();
        let mut buffer = FrameBuffer::with_capacity(64);

        peer.write_all(b"\r\nbuffered").unwrap();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(2));
        assert_eq!(buffer.buffered(), 8);

        peer.write_all(b"-direct").unwrap();
        let mut body = [0u8; 32];
        assert_eq!(buffer.read_body(&mut conn, &mut body).unwrap(), Step::Ready(8));
        assert_eq!(&body[..8], b"buffered");
        assert_eq!(buffer.buffered(), 0);

        assert_eq!(buffer.read_body(&mut conn, &mut body).unwrap(), Step::Ready(7));
        assert_eq!(&body[..7], b"-direct");
    }

    #[test]
    fn test_body_respects_destination_size() {
        let (mut conn, mut peer) = blocking_pair();
        let mut buffer = FrameBuffer::with_capacity(64);

        peer.write_all(b"\r\nabcdef").unwrap();
        buffer.read_line(&mut conn).unwrap();

        let mut body = [0u8; 4];
        assert_eq!(buffer.read_body(&mut conn, &mut body).unwrap(), Step::Ready(4));
        assert_eq!(&body, b"abcd");
        assert_eq!(buffer.read_body(&mut conn, &mut body).unwrap(), Step::Ready(2));
        assert_eq!(&body[..2], b"ef");
    }

    #[test]
    fn test_closed_with_nothing_buffered_returns_zero() {
        let (mut conn, peer) = blocking_pair();
        drop(peer);
        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(0));
        assert!(buffer.record().is_empty());
    }

    #[test]
    fn test_closed_mid_line_returns_fragment() {
        let (mut conn, mut peer) = blocking_pair();
        peer.write_all(b"partial").unwrap();
        drop(peer);

        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(7));
        assert_eq!(buffer.record(), b"partial");
        assert_eq!(buffer.read_line(&mut conn).unwrap(), Step::Ready(0));
    }

    #[test]
    fn test_debug_shows_cursors_not_contents() {
        let (mut conn, mut peer) = blocking_pair();
        peer.write_all(b"secret\r\n").unwrap();
        let mut buffer = FrameBuffer::with_capacity(16);
        buffer.read_line(&mut conn).unwrap();

        let text = format!("{:?}", buffer);
        assert!(text.contains("capacity: 16"));
        assert!(text.contains("record_len: 8"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_line_longer_than_capacity_is_format_error() {
        let (mut conn, mut peer) = blocking_pair();
        peer.write_all(b"this line never ends").unwrap();

        let mut buffer = FrameBuffer::with_capacity(8);
        let result = buffer.read_line(&mut conn);
        assert!(matches!(result, Err(Error::Format { .. })));
    }
}
