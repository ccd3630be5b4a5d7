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

//! In-memory implementations of the backend traits for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::rc::Rc;

use super::backend::*;
use crate::support::error::Error;

#[derive(Default)]
struct Message {
    uid: u32,
    uidl: String,
    data: Vec<u8>,
    /// If set, header fetches only return this many bytes.
    header_len: Option<usize>,
    expunged: bool,
}

#[derive(Default)]
struct Inner {
    label: &'static str,
    messages: Vec<Message>,
    cache: BTreeMap<(u32, CacheField), Vec<u8>>,

    fail_sync: bool,
    fail_search: bool,
    fail_sizes: bool,
    fail_fetches: bool,

    searches: u32,
    size_lookups: u32,
    header_fetches: u32,
    body_fetches: u32,
    commits: u32,
    journal: Option<Rc<RefCell<Vec<String>>>>,
}

impl Inner {
    fn note(&mut self, what: &str) {
        if let Some(ref journal) = self.journal {
            journal.borrow_mut().push(format!("{}:{}", self.label, what));
        }
    }

    fn message(&self, seq: u32) -> Result<&Message, Error> {
        self.messages
            .get(seq as usize - 1)
            .filter(|m| !m.expunged)
            .ok_or(Error::Expunged)
    }
}

/// A mailbox held entirely in memory.
///
/// Clones share the same underlying mailbox, so a test can keep a handle to
/// inspect a mailbox it handed over to the code under test.
#[derive(Clone)]
pub struct MemoryMailbox {
    name: String,
    namespace: String,
    inbox: bool,
    inner: Rc<RefCell<Inner>>,
}

impl MemoryMailbox {
    /// Creates an IMAP INBOX with the given UIDs and contents.
    pub fn imap(messages: &[(u32, &str)]) -> Self {
        let inner = Inner {
            label: "imap",
            messages: messages
                .iter()
                .map(|&(uid, data)| Message {
                    uid,
                    data: data.as_bytes().to_vec(),
                    ..Message::default()
                })
                .collect(),
            ..Inner::default()
        };
        Self::new("INBOX", "", true, inner)
    }

    /// Creates a POP3 mailbox with the given UIDLs and contents.
    pub fn pop3(messages: &[(&str, &str)]) -> Self {
        let inner = Inner {
            label: "pop3",
            messages: messages
                .iter()
                .enumerate()
                .map(|(ix, &(uidl, data))| Message {
                    uid: ix as u32 + 1,
                    uidl: uidl.to_owned(),
                    data: data.as_bytes().to_vec(),
                    ..Message::default()
                })
                .collect(),
            ..Inner::default()
        };
        Self::new(
            "POP3-MIGRATION-NS/INBOX",
            "POP3-MIGRATION-NS/",
            false,
            inner,
        )
    }

    fn new(name: &str, namespace: &str, inbox: bool, inner: Inner) -> Self {
        MemoryMailbox {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            inbox,
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub fn set_name(&mut self, name: &str, inbox: bool) {
        self.name = name.to_owned();
        self.inbox = inbox;
    }

    pub fn set_journal(&self, journal: Rc<RefCell<Vec<String>>>) {
        self.inner.borrow_mut().journal = Some(journal);
    }

    pub fn set_cached(&self, uid: u32, field: CacheField, data: &[u8]) {
        self.inner
            .borrow_mut()
            .cache
            .insert((uid, field), data.to_vec());
    }

    pub fn cached(&self, uid: u32, field: CacheField) -> Option<Vec<u8>> {
        self.inner.borrow().cache.get(&(uid, field)).cloned()
    }

    pub fn truncate_header(&self, uid: u32, len: usize) {
        self.with_message(uid, |m| m.header_len = Some(len));
    }

    pub fn expunge(&self, uid: u32) {
        self.with_message(uid, |m| m.expunged = true);
    }

    fn with_message(&self, uid: u32, f: impl FnOnce(&mut Message)) {
        let mut inner = self.inner.borrow_mut();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.uid == uid)
            .expect("no such message");
        f(message);
    }

    pub fn fail_sync(&self) {
        self.inner.borrow_mut().fail_sync = true;
    }

    pub fn fail_search(&self) {
        self.inner.borrow_mut().fail_search = true;
    }

    pub fn fail_sizes(&self) {
        self.inner.borrow_mut().fail_sizes = true;
    }

    pub fn fail_fetches(&self) {
        self.inner.borrow_mut().fail_fetches = true;
    }

    pub fn searches(&self) -> u32 {
        self.inner.borrow().searches
    }

    pub fn size_lookups(&self) -> u32 {
        self.inner.borrow().size_lookups
    }

    pub fn header_fetches(&self) -> u32 {
        self.inner.borrow().header_fetches
    }

    pub fn body_fetches(&self) -> u32 {
        self.inner.borrow().body_fetches
    }

    pub fn commits(&self) -> u32 {
        self.inner.borrow().commits
    }
}

fn injected_failure() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
}

impl Mailbox for MemoryMailbox {
    type Reader = io::Cursor<Vec<u8>>;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_inbox(&self) -> bool {
        self.inbox
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn sync(&mut self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("sync");
        if inner.fail_sync {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn search_all(
        &mut self,
        _wanted: FetchFields,
    ) -> Result<Vec<MessageEntry>, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("search");
        inner.searches += 1;
        if inner.fail_search {
            return Err(injected_failure());
        }

        Ok(inner
            .messages
            .iter()
            .enumerate()
            .map(|(ix, m)| MessageEntry {
                seq: ix as u32 + 1,
                uid: m.uid,
            })
            .collect())
    }

    fn physical_size(&mut self, seq: u32) -> Result<u64, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("size");
        inner.size_lookups += 1;
        if inner.fail_sizes {
            return Err(injected_failure());
        }
        Ok(inner.message(seq)?.data.len() as u64)
    }

    fn backend_uidl(&mut self, seq: u32) -> Result<String, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("uidl");
        Ok(inner.message(seq)?.uidl.clone())
    }

    fn header_stream(&mut self, seq: u32) -> Result<Self::Reader, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("header");
        inner.header_fetches += 1;
        if inner.fail_fetches {
            return Err(injected_failure());
        }

        let message = inner.message(seq)?;
        let data = match message.header_len {
            Some(len) => message.data[..len].to_vec(),
            None => message.data.clone(),
        };
        Ok(io::Cursor::new(data))
    }

    fn body_stream(&mut self, seq: u32) -> Result<Self::Reader, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.note("body");
        inner.body_fetches += 1;
        if inner.fail_fetches {
            return Err(injected_failure());
        }
        Ok(io::Cursor::new(inner.message(seq)?.data.clone()))
    }

    fn cache_lookup(
        &mut self,
        uid: u32,
        field: CacheField,
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.cached(uid, field))
    }

    fn cache_can_add(&self, uid: u32, field: CacheField) -> bool {
        !self.inner.borrow().cache.contains_key(&(uid, field))
    }

    fn cache_add(&mut self, uid: u32, field: CacheField, data: &[u8]) {
        self.set_cached(uid, field, data);
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.inner.borrow_mut().commits += 1;
        Ok(())
    }
}

/// A storage whose POP3 mailbox is a `MemoryMailbox`.
pub struct MemoryStorage {
    pub pop3: MemoryMailbox,
    pub opens: u32,
}

impl MemoryStorage {
    pub fn new(pop3: MemoryMailbox) -> Self {
        MemoryStorage { pop3, opens: 0 }
    }
}

impl Storage for MemoryStorage {
    type Pop3Mailbox = MemoryMailbox;

    fn find_namespace(&self, mailbox: &str) -> Option<String> {
        let namespace = self.pop3.namespace();
        if !namespace.is_empty() && mailbox.starts_with(namespace) {
            Some(namespace.to_owned())
        } else {
            Some(String::new())
        }
    }

    fn open_pop3_mailbox(
        &mut self,
        name: &str,
    ) -> Result<MemoryMailbox, Error> {
        if name != self.pop3.name() {
            return Err(Error::NxMailbox);
        }

        self.opens += 1;
        Ok(self.pop3.clone())
    }
}

/// A mail whose own special fields are fixed strings.
pub struct MemoryMail {
    pub uid: u32,
}

impl Mail for MemoryMail {
    fn uid(&self) -> u32 {
        self.uid
    }

    fn get_special(&mut self, field: SpecialField) -> Result<String, Error> {
        Ok(format!("inner-{:?}-{}", field, self.uid))
    }
}
