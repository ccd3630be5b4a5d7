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

//! The records manipulated by the matching engine.
//!
//! Cross-links between the two sides are stored as plain identifiers (POP3
//! sequence number on one side, IMAP UID on the other) rather than indices,
//! so each side can be re-sorted freely between matching phases.

use std::cmp::Ordering;

pub use crate::mime::header_hash::Digest;

/// One message on the POP3 side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopRecord {
    /// 1-based position in the POP3 listing at enumeration time.
    pub pop_seq: u32,
    /// The UID the POP3 mailbox assigned to the message, used as the key for
    /// cached fields.
    pub uid: u32,
    /// The UIDL. Never empty.
    pub uidl: String,
    /// The size reported by the POP3 server, unless size checking is
    /// disabled.
    pub size: Option<u64>,
    pub header_digest: Option<Digest>,
    /// The IMAP UID this message has been matched to.
    pub matched_uid: Option<u32>,
}

/// One message on the IMAP side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImapRecord {
    pub uid: u32,
    /// The sequence number at enumeration time.
    pub seq: u32,
    /// The physical size, unless size checking is disabled.
    pub physical_size: Option<u64>,
    /// The POP3 UIDL of this message, either cached from an earlier session
    /// or found by matching.
    pub pop_uidl: Option<String>,
    /// The POP3 sequence number of this message, set only by matching.
    pub pop_seq: Option<u32>,
    pub header_digest: Option<Digest>,
}

impl ImapRecord {
    pub fn new(uid: u32, seq: u32, physical_size: Option<u64>) -> Self {
        ImapRecord {
            uid,
            seq,
            physical_size,
            pop_uidl: None,
            pop_seq: None,
            header_digest: None,
        }
    }
}

/// Links a POP3 record with an IMAP record.
///
/// Panics if either side has already been linked; each phase is responsible
/// for only offering unlinked pairs.
pub fn link(pop: &mut PopRecord, imap: &mut ImapRecord) {
    assert!(pop.matched_uid.is_none(), "POP3 record linked twice");
    assert!(imap.pop_seq.is_none(), "IMAP record linked twice");

    pop.matched_uid = Some(imap.uid);
    imap.pop_seq = Some(pop.pop_seq);
    if imap.pop_uidl.is_none() {
        imap.pop_uidl = Some(pop.uidl.clone());
    }
}

/// Where a mailbox is in its once-per-session matching lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    NotSynced,
    /// Matching is in progress. Only observable if a previous run was
    /// interrupted by a panic, which is treated like a failure.
    Syncing,
    Synced,
    /// Matching failed. This is never retried for the lifetime of the
    /// mailbox object.
    Failed,
}

/// The migration state of one target mailbox.
#[derive(Clone, Debug)]
pub struct MigrationState {
    /// The IMAP messages, in UID order once synced.
    pub imap: Vec<ImapRecord>,
    /// The index at which size-based matching stopped.
    pub first_unfound_index: usize,
    pub sync: SyncState,
}

impl Default for MigrationState {
    fn default() -> Self {
        MigrationState {
            imap: Vec::new(),
            first_unfound_index: 0,
            sync: SyncState::NotSynced,
        }
    }
}

impl MigrationState {
    pub fn synced(&self) -> bool {
        SyncState::Synced == self.sync
    }

    pub fn sync_failed(&self) -> bool {
        matches!(self.sync, SyncState::Failed | SyncState::Syncing)
    }

    /// Finds the record for `uid`. Only meaningful once synced.
    pub fn find(&self, uid: u32) -> Option<&ImapRecord> {
        self.imap
            .binary_search_by_key(&uid, |r| r.uid)
            .ok()
            .map(|ix| &self.imap[ix])
    }
}

/// The POP3 side of the migration, shared by all target mailboxes of a
/// storage.
#[derive(Clone, Debug, Default)]
pub struct PopMailboxState {
    /// The POP3 records, in `pop_seq` order between sessions. `None` until
    /// the POP3 mailbox has been read.
    pub records: Option<Vec<PopRecord>>,
    /// Whether header digests have been computed for every record.
    pub all_digests_set: bool,
}

/// Orders present values before absent ones.
fn cmp_absent_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_pop_by_seq(records: &mut [PopRecord]) {
    records.sort_unstable_by_key(|r| r.pop_seq);
}

pub fn sort_pop_by_uidl(records: &mut [PopRecord]) {
    records.sort_by(|a, b| a.uidl.cmp(&b.uidl));
}

pub fn sort_pop_by_digest(records: &mut [PopRecord]) {
    records.sort_by(|a, b| cmp_absent_last(&a.header_digest, &b.header_digest));
}

pub fn sort_imap_by_uid(records: &mut [ImapRecord]) {
    records.sort_unstable_by_key(|r| r.uid);
}

pub fn sort_imap_by_uidl(records: &mut [ImapRecord]) {
    records.sort_by(|a, b| cmp_absent_last(&a.pop_uidl, &b.pop_uidl));
}

pub fn sort_imap_by_digest(records: &mut [ImapRecord]) {
    records.sort_by(|a, b| cmp_absent_last(&a.header_digest, &b.header_digest));
}
