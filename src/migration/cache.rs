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

//! Access to the per-message cache fields, and collection of header digests
//! which uses them.

use log::{error, warn};

use super::backend::{CacheField, Mailbox};
use super::model::*;
use crate::mime::header_filter::header_digest;
use crate::mime::header_hash::DIGEST_LEN;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// Looks up the cached POP3 UIDL of a message.
///
/// Cache failures and unusable values are logged and treated as absent.
pub fn lookup_uidl(
    mailbox: &mut impl Mailbox,
    uid: u32,
    log_prefix: &LogPrefix,
) -> Option<String> {
    let mut data = match mailbox.cache_lookup(uid, CacheField::Pop3Uidl) {
        Ok(data) => data?,
        Err(e) => {
            warn!(
                "{} Failed to look up cached UIDL for uid {}: {}",
                log_prefix, uid, e
            );
            return None;
        },
    };

    // The POP3 server stores the value NUL-terminated
    if Some(&0) == data.last() {
        data.pop();
    }

    match String::from_utf8(data) {
        Ok(uidl) if !uidl.is_empty() => Some(uidl),
        Ok(_) => None,
        Err(_) => {
            warn!(
                "{} Ignoring non-UTF-8 cached UIDL for uid {}",
                log_prefix, uid
            );
            None
        },
    }
}

/// Persists the UIDL of every matched IMAP message which does not already
/// have one in the cache.
pub fn store_uidls(
    mailbox: &mut impl Mailbox,
    records: &[ImapRecord],
    log_prefix: &LogPrefix,
) {
    for record in records {
        let uidl = match record.pop_uidl {
            Some(ref uidl) => uidl,
            None => continue,
        };

        if mailbox.cache_can_add(record.uid, CacheField::Pop3Uidl) {
            let mut data = Vec::with_capacity(uidl.len() + 1);
            data.extend_from_slice(uidl.as_bytes());
            data.push(0);
            mailbox.cache_add(record.uid, CacheField::Pop3Uidl, &data);
        }
    }

    commit(mailbox, log_prefix);
}

fn lookup_digest(
    mailbox: &mut impl Mailbox,
    uid: u32,
) -> Result<Option<Digest>, Error> {
    Ok(mailbox
        .cache_lookup(uid, CacheField::HeaderDigest)?
        .filter(|data| DIGEST_LEN == data.len())
        .map(|data| {
            let mut digest = [0u8; DIGEST_LEN];
            digest.copy_from_slice(&data);
            digest
        }))
}

fn store_digest(mailbox: &mut impl Mailbox, uid: u32, digest: &Digest) {
    mailbox.cache_add(uid, CacheField::HeaderDigest, digest);
}

fn commit(mailbox: &mut impl Mailbox, log_prefix: &LogPrefix) {
    if let Err(e) = mailbox.commit() {
        warn!(
            "{} Failed to commit cache of {}: {} - ignoring",
            log_prefix,
            mailbox.name(),
            e
        );
    }
}

/// A record whose header digest can be computed.
pub trait DigestRecord {
    /// The sequence number and UID of the message in its own mailbox.
    fn message(&self) -> (u32, u32);
    fn digest_mut(&mut self) -> &mut Option<Digest>;
}

impl DigestRecord for PopRecord {
    fn message(&self) -> (u32, u32) {
        (self.pop_seq, self.uid)
    }

    fn digest_mut(&mut self) -> &mut Option<Digest> {
        &mut self.header_digest
    }
}

impl DigestRecord for ImapRecord {
    fn message(&self) -> (u32, u32) {
        (self.seq, self.uid)
    }

    fn digest_mut(&mut self) -> &mut Option<Digest> {
        &mut self.header_digest
    }
}

/// Fills in the header digest of every record from `first_index` on which
/// does not have one yet.
///
/// Cached digests are collected first, so that only the headers of uncached
/// messages need to be fetched. Messages which turn out to be expunged are
/// left without a digest.
pub fn read_digests<M: Mailbox, R: DigestRecord>(
    mailbox: &mut M,
    records: &mut [R],
    first_index: usize,
    log_prefix: &LogPrefix,
) -> Result<(), Error> {
    let first_index = first_index.min(records.len());

    for record in &mut records[first_index..] {
        if record.digest_mut().is_some() {
            continue;
        }

        let (_, uid) = record.message();
        match lookup_digest(mailbox, uid) {
            Ok(digest) => *record.digest_mut() = digest,
            Err(e) => {
                warn!(
                    "{} Failed to search all cached header hashes: {} \
                     - ignoring",
                    log_prefix, e
                );
                break;
            },
        }
    }

    let mut result = Ok(());
    for record in &mut records[first_index..] {
        if record.digest_mut().is_some() {
            continue;
        }

        let (seq, uid) = record.message();
        match compute_digest(mailbox, seq, uid, log_prefix) {
            Ok(digest) => *record.digest_mut() = digest,
            Err(e) => {
                result = Err(e);
                break;
            },
        }
    }

    commit(mailbox, log_prefix);
    result
}

/// Hashes the header of one message, falling back to the full message if
/// the header fetch appears truncated.
///
/// Returns `None` if the message has been expunged.
fn compute_digest(
    mailbox: &mut impl Mailbox,
    seq: u32,
    uid: u32,
    log_prefix: &LogPrefix,
) -> Result<Option<Digest>, Error> {
    let header = match mailbox.header_stream(seq) {
        Ok(header) => header,
        Err(e) if e.is_expunged() => return Ok(None),
        Err(e) => {
            return Err(fetch_error(
                mailbox.name(),
                format!("get header for msg {}", seq),
                e,
                log_prefix,
            ))
        },
    };

    let result = header_digest(header).map_err(|e| {
        fetch_error(
            mailbox.name(),
            format!("read header for msg {}", seq),
            e.into(),
            log_prefix,
        )
    })?;
    if result.have_eoh {
        store_digest(mailbox, uid, &result.digest);
        return Ok(Some(result.digest));
    }

    // The blank line ending the header is missing. Either the header really
    // ends there, or the server truncated it. Some servers truncate the
    // header for header-only fetches when they encounter whitespace-only
    // continuation lines, lines without a colon, or CR CR LF, while their
    // full-message fetches are fine. Parsing the header out of the full
    // message gets a consistent view from all servers.
    let body = match mailbox.body_stream(seq) {
        Ok(body) => body,
        Err(e) if e.is_expunged() => return Ok(None),
        Err(e) => {
            return Err(fetch_error(
                mailbox.name(),
                format!("get body for msg {}", seq),
                e,
                log_prefix,
            ))
        },
    };

    let result = header_digest(body).map_err(|e| {
        fetch_error(
            mailbox.name(),
            format!("read body for msg {}", seq),
            e.into(),
            log_prefix,
        )
    })?;
    if result.have_eoh {
        store_digest(mailbox, uid, &result.digest);
    } else {
        // Not cached, so a later session gets another chance at the full
        // header.
        warn!(
            "{} Truncated email with UID {} used as truncated",
            log_prefix, uid
        );
    }

    Ok(Some(result.digest))
}

fn fetch_error(
    mailbox: &str,
    what: String,
    source: Error,
    log_prefix: &LogPrefix,
) -> Error {
    error!("{} Failed to {}: {}", log_prefix, what, source);
    Error::Enumeration {
        mailbox: mailbox.to_owned(),
        what,
        source: Box::new(source),
    }
}
