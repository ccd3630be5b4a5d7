//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of pop3-migration.
//
// pop3-migration is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// pop3-migration is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// pop3-migration. If not, see <http://www.gnu.org/licenses/>.

//! Reduction of a message header to the parts which survive the trip through
//! both POP3 and IMAP servers unchanged.
//!
//! Servers disagree on many details of how they present headers: some add or
//! drop bookkeeping headers, some silently drop lines they consider invalid,
//! and some stop parsing the header at malformed line endings. The filter
//! here drops everything that any known server is inconsistent about, so
//! that the same message yields the same bytes regardless of which protocol
//! or fetch mode delivered it.

use std::io::{self, BufRead};

use super::header_hash::{Digest, HeaderHasher};

/// Headers which are always excluded, compared case-insensitively.
///
/// These are added, removed or rewritten by various servers and mail stores.
/// `Return-Path`, for example, is present over IMAP but not POP3 on at least
/// one large provider.
pub static SKIP_HEADERS: &[&str] = &[
    "Content-Length",
    "Return-Path",
    "Status",
    "X-IMAP",
    "X-IMAPbase",
    "X-Keywords",
    "X-Message-Flag",
    "X-Status",
    "X-UID",
    "X-UIDL",
    "X-Yahoo-Newman-Property",
];

/// A push filter over raw header lines.
///
/// Output lines always end with a bare LF.
#[derive(Debug, Default)]
pub struct HeaderFilter {
    have_eoh: bool,
    stop: bool,
    /// Whether the current (possibly folded) header is excluded as a whole.
    /// `None` before the first header line.
    current_excluded: Option<bool>,
}

impl HeaderFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the blank line ending the header block has been seen.
    pub fn have_eoh(&self) -> bool {
        self.have_eoh
    }

    /// Whether a CR-only line truncated the header.
    pub fn stopped(&self) -> bool {
        self.stop
    }

    /// Processes one raw line, including its line ending if it has one.
    ///
    /// Returns `false` once the end of the header has been reached, after
    /// which no more lines should be passed in.
    pub fn line(&mut self, line: &[u8], out: &mut impl FnMut(&[u8])) -> bool {
        let terminated = line.ends_with(b"\n");
        let content = strip_line_ending(line);

        if content.is_empty() {
            if terminated {
                self.have_eoh = true;
                // If we stopped early, the end of the header is considered
                // to be at the stop point, which was already passed.
                if !self.stop {
                    out(b"\n");
                }
                return false;
            }

            // A lone CR right at EOF; the header is simply truncated.
            return true;
        }

        let continued =
            self.current_excluded.is_some() && is_whitespace(content[0]);

        let mut exclude = if content.iter().all(|&b| b'\r' == b) {
            // CR CR LF: some servers end the header here, others don't. Stop
            // here unconditionally so both agree.
            self.stop = true;
            true
        } else if continued {
            // "Header: \r\n \r\n": some servers strip whitespace-only
            // continuation lines away.
            content.iter().all(|&b| is_whitespace(b))
        } else {
            match memchr::memchr(b':', content) {
                // Not a valid "key: value" header, which some servers drop.
                // Only this line goes; its continuations are judged by the
                // whole line taken as a header name.
                None => {
                    let name = trim_trailing_whitespace(content);
                    self.current_excluded = Some(header_excluded(name));
                    true
                },
                Some(colon) => {
                    let name = trim_trailing_whitespace(&content[..colon]);
                    self.current_excluded = Some(header_excluded(name));
                    false
                },
            }
        };

        // Continuations share the fate of the header they belong to.
        exclude |= self.stop || self.current_excluded.unwrap_or(false);

        if !exclude {
            out(content);
            out(b"\n");
        }

        true
    }
}

/// Runs `reader` through a `HeaderFilter`, passing the output to `out`.
///
/// Reading stops at the end of the header, so `reader` may be positioned at
/// the start of a whole message. Returns whether the end of the header was
/// found.
pub fn filter_header(
    mut reader: impl BufRead,
    mut out: impl FnMut(&[u8]),
) -> io::Result<bool> {
    let mut filter = HeaderFilter::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if 0 == reader.read_until(b'\n', &mut line)? {
            break;
        }

        if !filter.line(&line, &mut out) {
            break;
        }
    }

    Ok(filter.have_eoh())
}

/// The result of hashing a message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderDigest {
    pub digest: Digest,
    /// Whether the end of the header was actually found. If not, the input
    /// may have been truncated and `digest` is only a best effort.
    pub have_eoh: bool,
}

/// Filters the header read from `reader` and hashes the result.
pub fn header_digest(reader: impl BufRead) -> io::Result<HeaderDigest> {
    let mut hasher = HeaderHasher::sha1();
    let have_eoh = filter_header(reader, |data| hasher.update(data))?;
    Ok(HeaderDigest {
        digest: hasher.finish(),
        have_eoh,
    })
}

fn header_excluded(name: &[u8]) -> bool {
    !header_name_is_valid(name) || is_skipped_header(name)
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_whitespace(b: u8) -> bool {
    b' ' == b || b'\t' == b
}

fn trim_trailing_whitespace(mut s: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = s.split_last() {
        if !is_whitespace(last) {
            break;
        }
        s = rest;
    }
    s
}

// Some servers drop headers whose names contain spaces, controls or 8-bit
// characters while others preserve them.
fn header_name_is_valid(name: &[u8]) -> bool {
    name.iter().all(|&b| b > 0x20 && b < 0x7f)
}

fn is_skipped_header(name: &[u8]) -> bool {
    SKIP_HEADERS
        .iter()
        .any(|skip| skip.as_bytes().eq_ignore_ascii_case(name))
}
