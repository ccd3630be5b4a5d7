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

//! Mailboxes stored as plain directories of message files.
//!
//! An IMAP-side directory holds one `<uid>.eml` file per message. A
//! POP3-side directory additionally holds a `uidl` listing, each line of
//! which is `<file> <uidl>` in the order the POP3 server lists the messages.
//! The line number is both the sequence number and the UID of the message.
//!
//! Cached fields are kept in memory and written to `.pop3-migration-cache`
//! on commit. IMAP-side fields are keyed by UID. POP3-side fields are keyed
//! by UIDL, since line numbers shift whenever the listing changes; a POP3
//! message without a UIDL has no cached fields.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::migration::backend::*;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, IgnoreKinds};

pub const UIDL_LISTING: &str = "uidl";
pub const CACHE_FILE: &str = ".pop3-migration-cache";
const MESSAGE_EXTENSION: &str = ".eml";

/// The namespace of a mailbox name: everything up to and including the first
/// `/`, or nothing if it has no `/`.
pub fn namespace_of(name: &str) -> &str {
    match name.find('/') {
        Some(ix) => &name[..=ix],
        None => "",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Imap,
    Pop3,
}

#[derive(Clone, Debug)]
struct Entry {
    uid: u32,
    path: PathBuf,
    uidl: String,
}

/// Cached fields, by field name and then UID or UIDL.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Cache {
    fields: BTreeMap<String, BTreeMap<u32, ByteBuf>>,
    #[serde(default)]
    by_uidl: BTreeMap<String, BTreeMap<String, ByteBuf>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CacheKey {
    Uid(u32),
    Uidl(String),
}

impl Cache {
    fn get(&self, key: &CacheKey, field: CacheField) -> Option<&ByteBuf> {
        match *key {
            CacheKey::Uid(uid) => self.fields.get(field.name())?.get(&uid),
            CacheKey::Uidl(ref uidl) => {
                self.by_uidl.get(field.name())?.get(uidl)
            },
        }
    }

    fn insert(&mut self, key: CacheKey, field: CacheField, data: &[u8]) {
        let data = ByteBuf::from(data.to_vec());
        match key {
            CacheKey::Uid(uid) => {
                self.fields
                    .entry(field.name().to_owned())
                    .or_default()
                    .insert(uid, data);
            },
            CacheKey::Uidl(uidl) => {
                self.by_uidl
                    .entry(field.name().to_owned())
                    .or_default()
                    .insert(uidl, data);
            },
        }
    }
}

/// A mailbox backed by a directory.
#[derive(Debug)]
pub struct DirMailbox {
    root: PathBuf,
    name: String,
    side: Side,
    entries: Vec<Entry>,
    cache: Cache,
    cache_dirty: bool,
}

impl DirMailbox {
    /// Opens a directory of `<uid>.eml` files as an IMAP mailbox.
    pub fn open_imap(
        root: impl Into<PathBuf>,
        name: &str,
    ) -> Result<Self, Error> {
        let mut this = Self::open(root.into(), name, Side::Imap)?;
        this.sync()?;
        Ok(this)
    }

    /// Opens a directory with a `uidl` listing as a POP3 mailbox.
    ///
    /// The listing is not read until the mailbox is synced.
    pub fn open_pop3(
        root: impl Into<PathBuf>,
        name: &str,
    ) -> Result<Self, Error> {
        Self::open(root.into(), name, Side::Pop3)
    }

    fn open(root: PathBuf, name: &str, side: Side) -> Result<Self, Error> {
        if !root.is_dir() {
            return Err(Error::NxMailbox);
        }

        let cache = fs::read(root.join(CACHE_FILE)).ignore_not_found()?;
        let cache = if cache.is_empty() {
            Cache::default()
        } else {
            serde_cbor::from_slice(&cache)?
        };

        Ok(DirMailbox {
            root,
            name: name.to_owned(),
            side,
            entries: Vec::new(),
            cache,
            cache_dirty: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry(&self, seq: u32) -> Result<&Entry, Error> {
        seq.checked_sub(1)
            .and_then(|ix| self.entries.get(ix as usize))
            .ok_or(Error::Expunged)
    }

    fn cache_key(&self, uid: u32) -> Option<CacheKey> {
        match self.side {
            Side::Imap => Some(CacheKey::Uid(uid)),
            Side::Pop3 => self
                .entries
                .iter()
                .find(|e| e.uid == uid)
                .filter(|e| !e.uidl.is_empty())
                .map(|e| CacheKey::Uidl(e.uidl.clone())),
        }
    }

    fn open_message(&self, seq: u32) -> Result<io::BufReader<fs::File>, Error> {
        let file = fs::File::open(&self.entry(seq)?.path)
            .on_not_found(Error::Expunged)?;
        Ok(io::BufReader::new(file))
    }

    fn scan_imap(&self) -> Result<Vec<Entry>, Error> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let uid = match name
                .to_str()
                .and_then(|n| n.strip_suffix(MESSAGE_EXTENSION))
                .and_then(|n| n.parse::<u32>().ok())
            {
                Some(uid) if uid > 0 => uid,
                _ => continue,
            };

            entries.push(Entry {
                uid,
                path: dirent.path(),
                uidl: String::new(),
            });
        }

        entries.sort_unstable_by_key(|e| e.uid);
        Ok(entries)
    }

    fn read_listing(&self) -> Result<Vec<Entry>, Error> {
        let listing = fs::read_to_string(self.root.join(UIDL_LISTING))?;
        let mut entries = Vec::new();
        for (lineno, line) in listing.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (file, uidl) = match line.find(char::is_whitespace) {
                Some(ix) => (&line[..ix], line[ix..].trim()),
                None => (line, ""),
            };
            if file.contains('/') || file.starts_with('.') {
                return Err(Error::BadUidlListing(lineno + 1));
            }

            entries.push(Entry {
                uid: entries.len() as u32 + 1,
                path: self.root.join(file),
                uidl: uidl.to_owned(),
            });
        }

        Ok(entries)
    }
}

impl Mailbox for DirMailbox {
    type Reader = io::BufReader<fs::File>;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_inbox(&self) -> bool {
        self.name.eq_ignore_ascii_case("INBOX")
    }

    fn namespace(&self) -> &str {
        namespace_of(&self.name)
    }

    fn sync(&mut self) -> Result<(), Error> {
        self.entries = match self.side {
            Side::Imap => self.scan_imap()?,
            Side::Pop3 => self.read_listing()?,
        };
        Ok(())
    }

    fn search_all(
        &mut self,
        _wanted: FetchFields,
    ) -> Result<Vec<MessageEntry>, Error> {
        Ok(self
            .entries
            .iter()
            .enumerate()
            .map(|(ix, e)| MessageEntry {
                seq: ix as u32 + 1,
                uid: e.uid,
            })
            .collect())
    }

    fn physical_size(&mut self, seq: u32) -> Result<u64, Error> {
        Ok(fs::metadata(&self.entry(seq)?.path)
            .on_not_found(Error::Expunged)?
            .len())
    }

    fn backend_uidl(&mut self, seq: u32) -> Result<String, Error> {
        Ok(self.entry(seq)?.uidl.clone())
    }

    fn header_stream(&mut self, seq: u32) -> Result<Self::Reader, Error> {
        self.open_message(seq)
    }

    fn body_stream(&mut self, seq: u32) -> Result<Self::Reader, Error> {
        self.open_message(seq)
    }

    fn cache_lookup(
        &mut self,
        uid: u32,
        field: CacheField,
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .cache_key(uid)
            .and_then(|key| self.cache.get(&key, field))
            .map(|value| value.to_vec()))
    }

    fn cache_can_add(&self, uid: u32, field: CacheField) -> bool {
        self.cache_key(uid)
            .map_or(false, |key| self.cache.get(&key, field).is_none())
    }

    fn cache_add(&mut self, uid: u32, field: CacheField, data: &[u8]) {
        if let Some(key) = self.cache_key(uid) {
            self.cache.insert(key, field, data);
            self.cache_dirty = true;
        }
    }

    fn commit(&mut self) -> Result<(), Error> {
        if !self.cache_dirty {
            return Ok(());
        }

        let data = serde_cbor::to_vec(&self.cache)?;
        file_ops::spit(&self.root, self.root.join(CACHE_FILE), 0o600, &data)?;
        self.cache_dirty = false;
        Ok(())
    }
}

/// A storage whose only POP3 mailbox is a directory.
#[derive(Clone, Debug)]
pub struct DirStorage {
    pop3_root: PathBuf,
    pop3_name: String,
}

impl DirStorage {
    pub fn new(pop3_root: impl Into<PathBuf>, pop3_name: &str) -> Self {
        DirStorage {
            pop3_root: pop3_root.into(),
            pop3_name: pop3_name.to_owned(),
        }
    }
}

impl Storage for DirStorage {
    type Pop3Mailbox = DirMailbox;

    fn find_namespace(&self, mailbox: &str) -> Option<String> {
        Some(namespace_of(mailbox).to_owned())
    }

    fn open_pop3_mailbox(&mut self, name: &str) -> Result<DirMailbox, Error> {
        if name != self.pop3_name {
            return Err(Error::NxMailbox);
        }

        DirMailbox::open_pop3(&self.pop3_root, name)
    }
}
