//! Request framing.
//!
//! Decides when enough bytes have arrived to form one complete request.
//! Line commands end at the first newline. HTTP-style requests end after the
//! blank line closing the headers plus `Content-Length` body bytes. The two
//! share a port, so the family is sniffed from the first line before waiting
//! on either terminator.

/// Result of inspecting the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Keep reading.
    Incomplete,
    /// The first `n` bytes form a complete request.
    Complete(usize),
    /// The declared request is larger than `max_bytes`.
    TooLarge,
}

/// Inspect `buf` for a complete request of at most `max_bytes`.
pub fn check_complete(buf: &[u8], max_bytes: usize) -> Frame {
    let Some(first_newline) = find(buf, b"\n") else {
        return Frame::Incomplete;
    };

    if find(&buf[..first_newline], b"HTTP/").is_none() {
        return Frame::Complete(first_newline + 1);
    }

    let Some(header_end) = header_end(buf) else {
        return Frame::Incomplete;
    };

    // An unparseable or overflowing length completes at the headers and is
    // left for the HTTP parser to reject.
    let declared = content_length(&buf[..header_end]).unwrap_or(0);
    let Some(total) = header_end.checked_add(declared) else {
        return Frame::Complete(header_end);
    };
    if total > max_bytes {
        Frame::TooLarge
    } else if buf.len() >= total {
        Frame::Complete(total)
    } else {
        Frame::Incomplete
    }
}

/// Offset just past the blank line ending the headers.
fn header_end(buf: &[u8]) -> Option<usize> {
    let crlf = find(buf, b"\r\n\r\n").map(|i| i + 4);
    let lf = find(buf, b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn content_length(head: &[u8]) -> Option<usize> {
    let head = std::str::from_utf8(head).ok()?;
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
