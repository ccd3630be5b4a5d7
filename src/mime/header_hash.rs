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

//! The header hashing primitive.
//!
//! Different servers mangle header bytes in different ways when delivering
//! them over IMAP or POP3, so the data is folded through a small
//! normalisation step before being hashed. The normalisation is versioned so
//! that digests computed by older versions remain meaningful.

/// The length of a header digest, in bytes.
pub const DIGEST_LEN: usize = 20;

/// A SHA-1 digest of a normalised header block.
pub type Digest = [u8; DIGEST_LEN];

/// The newest normalisation version.
///
/// - Version 1 hashes the input verbatim.
/// - Version 2 replaces control characters, 8-bit bytes and `?` with a single
///   `?`, collapsing runs of them. Some servers replace 8-bit characters with
///   `?` in header fetches, some only for a whole UTF-8 sequence, some not at
///   all.
/// - Version 3 additionally drops all spaces, since some servers strip
///   trailing spaces from headers in some fetch modes but not others.
/// - Version 4 additionally drops all tabs.
pub const MAX_VERSION: u32 = 4;

/// Something that consumes the normalised bytes.
pub trait HashSink {
    fn feed(&mut self, data: &[u8]);
}

impl HashSink for openssl::sha::Sha1 {
    fn feed(&mut self, data: &[u8]) {
        self.update(data);
    }
}

impl HashSink for Vec<u8> {
    fn feed(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// Folds header data into a `HashSink` according to a normalisation version.
///
/// Data may be passed in arbitrary chunks; the result does not depend on
/// where chunk boundaries fall.
pub struct HeaderHasher<S> {
    sink: S,
    version: u32,
    prev_was_questionmark: bool,
}

impl HeaderHasher<openssl::sha::Sha1> {
    /// Creates a SHA-1 hasher using the newest normalisation.
    pub fn sha1() -> Self {
        Self::new(openssl::sha::Sha1::new(), MAX_VERSION)
    }

    pub fn finish(self) -> Digest {
        self.sink.finish()
    }
}

impl<S: HashSink> HeaderHasher<S> {
    pub fn new(sink: S, version: u32) -> Self {
        assert!(
            (1..=MAX_VERSION).contains(&version),
            "bad header hash version {}",
            version
        );

        HeaderHasher {
            sink,
            version,
            prev_was_questionmark: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    pub fn update(&mut self, data: &[u8]) {
        if 1 == self.version {
            self.sink.feed(data);
            return;
        }

        let mut start = 0;
        for (i, &b) in data.iter().enumerate() {
            let mut cur_is_questionmark = false;

            match b {
                b' ' => {
                    if self.version >= 3 {
                        self.sink.feed(&data[start..i]);
                        start = i + 1;
                    }
                },
                b'\t' => {
                    if self.version >= 4 {
                        self.sink.feed(&data[start..i]);
                        start = i + 1;
                    }
                },
                b'\n' => (),
                b if b < 0x20 || b >= 0x7f || b == b'?' => {
                    if start < i || !self.prev_was_questionmark {
                        self.sink.feed(&data[start..i]);
                        self.sink.feed(b"?");
                    }
                    start = i + 1;
                    cur_is_questionmark = true;
                },
                _ => (),
            }

            self.prev_was_questionmark = cur_is_questionmark;
        }

        self.sink.feed(&data[start..]);
    }
}
