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

//! The capabilities the matching engine needs from the surrounding mail
//! storage.
//!
//! The engine never owns the POP3 or IMAP connections; it is handed objects
//! implementing these traits and wraps them (see `session`) to add the POP3
//! UIDL and order fields.

use std::io::BufRead;

use bitflags::bitflags;

use crate::support::error::Error;

bitflags! {
    /// Fields a search is expected to fetch, used for prefetching.
    pub struct FetchFields: u32 {
        const PHYSICAL_SIZE = 1 << 0;
        const STREAM_HEADER = 1 << 1;
        const UIDL_BACKEND = 1 << 2;
        const POP3_ORDER = 1 << 3;
    }
}

/// Per-message values beyond the message content itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialField {
    /// The UIDL the message had on the POP3 server.
    UidlBackend,
    /// The position the message had in the POP3 listing.
    Pop3Order,
    Guid,
}

/// Per-message cache fields used by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheField {
    /// The digest of the filtered header. Always `DIGEST_LEN` bytes.
    HeaderDigest,
    /// The POP3 UIDL, shared with the POP3 server implementation.
    Pop3Uidl,
}

impl CacheField {
    pub fn name(self) -> &'static str {
        match self {
            CacheField::HeaderDigest => "pop3-migration.hdr",
            CacheField::Pop3Uidl => "pop3.uidl",
        }
    }
}

/// A message as reported by `Mailbox::search_all`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageEntry {
    pub seq: u32,
    pub uid: u32,
}

/// A mailbox on either side of the migration.
///
/// Messages are addressed by sequence number for content access and by UID
/// for cached fields. Methods which access a message which has been expunged
/// fail with `Error::Expunged`.
pub trait Mailbox {
    type Reader: BufRead;

    fn name(&self) -> &str;
    /// Whether this is the user's INBOX.
    fn is_inbox(&self) -> bool;
    /// The namespace the mailbox belongs to.
    fn namespace(&self) -> &str;

    /// Brings the mailbox view up to date with the backing store.
    fn sync(&mut self) -> Result<(), Error>;
    /// Lists every message in sequence order.
    ///
    /// `wanted` is a hint of what will be requested for each message.
    fn search_all(
        &mut self,
        wanted: FetchFields,
    ) -> Result<Vec<MessageEntry>, Error>;

    /// Looks up the physical size of a message.
    ///
    /// For POP3 mailboxes, this must use the `LIST` size and never download
    /// the message.
    fn physical_size(&mut self, seq: u32) -> Result<u64, Error>;
    /// Returns the UIDL reported by the backend. May be empty.
    fn backend_uidl(&mut self, seq: u32) -> Result<String, Error>;
    /// Opens a stream of the message header, as the protocol delivers it for
    /// header-only fetches.
    fn header_stream(&mut self, seq: u32) -> Result<Self::Reader, Error>;
    /// Opens a stream of the whole message.
    fn body_stream(&mut self, seq: u32) -> Result<Self::Reader, Error>;

    fn cache_lookup(
        &mut self,
        uid: u32,
        field: CacheField,
    ) -> Result<Option<Vec<u8>>, Error>;
    /// Whether `cache_add` would store a new value, i.e., the field is not
    /// yet set for this message.
    fn cache_can_add(&self, uid: u32, field: CacheField) -> bool;
    fn cache_add(&mut self, uid: u32, field: CacheField, data: &[u8]);

    /// Makes cache additions durable.
    fn commit(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// The storage owning the target mailboxes.
pub trait Storage {
    type Pop3Mailbox: Mailbox;

    /// Returns the namespace which contains the named mailbox.
    fn find_namespace(&self, mailbox: &str) -> Option<String>;
    /// Opens the mailbox which accesses the POP3 server, read-only.
    ///
    /// This should not yet connect to the POP3 server.
    fn open_pop3_mailbox(
        &mut self,
        name: &str,
    ) -> Result<Self::Pop3Mailbox, Error>;
}

/// A single message of a target mailbox.
pub trait Mail {
    fn uid(&self) -> u32;
    fn get_special(&mut self, field: SpecialField) -> Result<String, Error>;
}
