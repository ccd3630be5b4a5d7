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

//! The per-mailbox matching session and its attachment to the surrounding
//! storage.
//!
//! `MigrationStorage` and `MigrationMailbox` decorate the storage and target
//! mailboxes of the host. The storage owns the POP3 side, which is shared by
//! all target mailboxes; each attached mailbox owns its IMAP side and runs
//! at most one session over its lifetime.

use log::{debug, error};

use super::backend::*;
use super::cache;
use super::matching::*;
use super::model::*;
use super::records;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::MigrationConfig;

/// A storage with POP3 migration support.
pub struct MigrationStorage<S> {
    inner: S,
    /// `None` if migration is disabled.
    config: Option<MigrationConfig>,
    pop3: PopMailboxState,
    log_prefix: LogPrefix,
}

impl<S: Storage> MigrationStorage<S> {
    pub fn new(
        inner: S,
        config: &MigrationConfig,
        log_prefix: LogPrefix,
    ) -> Self {
        let config = if config.is_enabled() {
            Some(config.clone())
        } else {
            debug!(
                "{} No pop3_migration mailbox setting - disabled",
                log_prefix
            );
            None
        };

        MigrationStorage {
            inner,
            config,
            pop3: PopMailboxState::default(),
            log_prefix,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// The POP3 listing, once some mailbox has read it.
    pub fn pop3_state(&self) -> &PopMailboxState {
        &self.pop3
    }

    /// Wraps a freshly opened target mailbox.
    ///
    /// The mailbox only takes part in the migration if this storage is
    /// enabled, the mailbox is the INBOX (or `all_mailboxes` is set), and it
    /// is not itself inside the namespace of the POP3 mailbox.
    pub fn mailbox_allocated<M: Mailbox>(
        &self,
        mailbox: M,
    ) -> MigrationMailbox<M> {
        let log_prefix = self.log_prefix.deep_clone();
        log_prefix.set_mailbox(mailbox.name().to_owned());

        let attachment = self
            .config
            .as_ref()
            .filter(|config| config.all_mailboxes || mailbox.is_inbox())
            .filter(|config| {
                self.inner.find_namespace(&config.mailbox).as_deref()
                    != Some(mailbox.namespace())
            })
            .map(|config| Attachment {
                config: config.clone(),
                state: MigrationState::default(),
            });

        MigrationMailbox {
            inner: mailbox,
            attachment,
            log_prefix,
        }
    }
}

struct Attachment {
    config: MigrationConfig,
    state: MigrationState,
}

/// A target mailbox which can report the POP3 UIDL and order of its
/// messages.
///
/// Every operation which needs the POP3 side takes the storage the mailbox
/// was allocated from.
pub struct MigrationMailbox<M> {
    inner: M,
    /// `None` if the mailbox does not take part in the migration.
    attachment: Option<Attachment>,
    log_prefix: LogPrefix,
}

impl<M: Mailbox> MigrationMailbox<M> {
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    /// The migration state, if attached.
    pub fn state(&self) -> Option<&MigrationState> {
        self.attachment.as_ref().map(|a| &a.state)
    }

    /// Runs the matching session unless it already ran.
    ///
    /// Once a session has failed, this keeps failing with
    /// `Error::UidlSyncFailed` without trying again.
    pub fn sync_if_needed<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
    ) -> Result<(), Error> {
        let attachment = match self.attachment {
            Some(ref mut attachment) => attachment,
            None => return Ok(()),
        };

        match attachment.state.sync {
            SyncState::Synced => return Ok(()),
            SyncState::Failed | SyncState::Syncing => {
                return Err(Error::UidlSyncFailed)
            },
            SyncState::NotSynced => (),
        }

        attachment.state.sync = SyncState::Syncing;
        match uidl_sync(&mut self.inner, attachment, storage, &self.log_prefix)
        {
            Ok(()) => {
                attachment.state.sync = SyncState::Synced;
                Ok(())
            },
            Err(e) => {
                attachment.state.sync = SyncState::Failed;
                Err(e)
            },
        }
    }

    /// Returns the POP3 UIDL of the message with the given UID, if known.
    pub fn get_backend_uidl<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
        uid: u32,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .synced_record(storage, uid)?
            .and_then(|r| r.pop_uidl.clone()))
    }

    /// Returns the 1-based position of the message with the given UID in the
    /// POP3 listing, if it was matched.
    pub fn get_pop3_order<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
        uid: u32,
    ) -> Result<Option<u32>, Error> {
        Ok(self.synced_record(storage, uid)?.and_then(|r| r.pop_seq))
    }

    fn synced_record<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
        uid: u32,
    ) -> Result<Option<&ImapRecord>, Error> {
        // The cause has already been logged by the session itself
        self.sync_if_needed(storage)
            .map_err(|_| Error::UidlSyncFailed)?;

        Ok(self.attachment.as_ref().and_then(|a| a.state.find(uid)))
    }

    /// Starts a search over the whole mailbox.
    ///
    /// If the caller is going to ask for POP3 fields, the session is run
    /// first so that it is not interleaved with the bulk fetch. A failure
    /// here is not reported; the next query reports it instead.
    pub fn search_init<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
        wanted: FetchFields,
    ) -> Result<Vec<MessageEntry>, Error> {
        if self.is_attached()
            && wanted
                .intersects(FetchFields::UIDL_BACKEND | FetchFields::POP3_ORDER)
        {
            let _ = self.sync_if_needed(storage);
        }

        self.inner.search_all(wanted)
    }

    /// Serves a special field of `mail`, a message of this mailbox.
    ///
    /// The POP3 fields are answered from the session when it knows them;
    /// everything else goes to `mail` itself.
    pub fn get_special<S: Storage>(
        &mut self,
        storage: &mut MigrationStorage<S>,
        mail: &mut impl Mail,
        field: SpecialField,
    ) -> Result<String, Error> {
        if self.is_attached() {
            match field {
                SpecialField::UidlBackend => {
                    if let Some(uidl) =
                        self.get_backend_uidl(storage, mail.uid())?
                    {
                        return Ok(uidl);
                    }
                },
                SpecialField::Pop3Order => {
                    if let Some(order) =
                        self.get_pop3_order(storage, mail.uid())?
                    {
                        return Ok(order.to_string());
                    }
                },
                _ => (),
            }
        }

        mail.get_special(field)
    }
}

/// One full matching session.
///
/// The IMAP side is enumerated completely before the POP3 mailbox is even
/// opened, so the POP3 connection does not sit idle while the IMAP side is
/// being read.
fn uidl_sync<M: Mailbox, S: Storage>(
    imap_box: &mut M,
    attachment: &mut Attachment,
    storage: &mut MigrationStorage<S>,
    log_prefix: &LogPrefix,
) -> Result<(), Error> {
    let config = &attachment.config;

    let mut imap = records::read_imap(imap_box, config, log_prefix)?;

    let mut pop3_box =
        storage.inner.open_pop3_mailbox(&config.mailbox).map_err(|e| {
            error!(
                "{} Couldn't open POP3 mailbox {}: {}",
                log_prefix, config.mailbox, e
            );
            Error::Enumeration {
                mailbox: config.mailbox.clone(),
                what: "open POP3 mailbox".to_owned(),
                source: Box::new(e),
            }
        })?;
    records::read_pop3(&mut pop3_box, &mut storage.pop3, config, log_prefix)?;

    let mut pop3 = storage.pop3.records.take().unwrap_or_default();
    let result = run_phases(
        imap_box,
        &mut pop3_box,
        &mut pop3,
        &mut imap,
        &mut storage.pop3.all_digests_set,
        config,
        log_prefix,
    );
    storage.pop3.records = Some(pop3);
    let first_unfound_index = result?;

    if !config.skip_uidl_cache {
        cache::store_uidls(imap_box, &imap, log_prefix);
    }

    attachment.state.imap = imap;
    attachment.state.first_unfound_index = first_unfound_index;
    Ok(())
}

/// Runs the three matching phases, returning the index at which the
/// size-based phase stopped.
fn run_phases<M: Mailbox, P: Mailbox>(
    imap_box: &mut M,
    pop3_box: &mut P,
    pop3: &mut [PopRecord],
    imap: &mut [ImapRecord],
    all_digests_set: &mut bool,
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> Result<usize, Error> {
    if !config.skip_uidl_cache {
        assign_cached(pop3, imap);
    }
    sort_natural(pop3, imap);

    let size_match = assign_by_size(pop3, imap, config, log_prefix);
    if size_match.complete {
        return Ok(size_match.first_unfound_index);
    }

    // Other mailboxes may need any POP3 message, so hash them all once
    let pop3_first = if config.all_mailboxes {
        0
    } else {
        size_match.first_unfound_index
    };
    if !*all_digests_set {
        cache::read_digests(pop3_box, pop3, pop3_first, log_prefix)?;
        if 0 == pop3_first {
            *all_digests_set = true;
        }
    }

    cache::read_digests(
        imap_box,
        imap,
        size_match.first_unfound_index,
        log_prefix,
    )?;
    assign_by_digest(pop3, imap, config, log_prefix)?;

    Ok(size_match.first_unfound_index)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::super::test_support::*;
    use super::*;

    const POP3_MAILBOX: &str = "POP3-MIGRATION-NS/INBOX";

    fn config() -> MigrationConfig {
        MigrationConfig {
            mailbox: POP3_MAILBOX.to_owned(),
            ..MigrationConfig::default()
        }
    }

    fn storage(
        pop3: &MemoryMailbox,
        config: &MigrationConfig,
    ) -> MigrationStorage<MemoryStorage> {
        crate::init_test_log();
        MigrationStorage::new(
            MemoryStorage::new(pop3.clone()),
            config,
            LogPrefix::new("pop3_migration".to_owned()),
        )
    }

    /// Returns `(uid, pop3 order, uidl)` of every IMAP message.
    fn mapping(
        mailbox: &mut MigrationMailbox<MemoryMailbox>,
        storage: &mut MigrationStorage<MemoryStorage>,
    ) -> Vec<(u32, Option<u32>, Option<String>)> {
        let uids = mailbox
            .state()
            .unwrap()
            .imap
            .iter()
            .map(|r| r.uid)
            .collect::<Vec<_>>();

        uids.into_iter()
            .map(|uid| {
                (
                    uid,
                    mailbox.get_pop3_order(storage, uid).unwrap(),
                    mailbox.get_backend_uidl(storage, uid).unwrap(),
                )
            })
            .collect()
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_owned())
    }

    const MSG_A: &str = "Subject: a\r\n\r\n";
    const MSG_B: &str = "Subject: bb\r\n\r\n";
    const MSG_C: &str = "Subject: ccc\r\n\r\n";

    #[test]
    fn same_order_matched_by_size() {
        let pop3 =
            MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_B), (3, MSG_C)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap.clone());

        mailbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(3, mailbox.state().unwrap().first_unfound_index);
        assert_eq!(
            vec![
                (1, Some(1), some("a")),
                (2, Some(2), some("b")),
                (3, Some(3), some("c")),
            ],
            mapping(&mut mailbox, &mut storage)
        );

        assert_eq!(0, pop3.header_fetches());
        assert_eq!(0, imap.header_fetches());
        // The UIDLs are now cached for the next session
        assert_eq!(Some(b"b\0".to_vec()), imap.cached(2, CacheField::Pop3Uidl));
    }

    #[test]
    fn ambiguous_sizes_matched_by_header() {
        let a = "Subject: aa\r\n\r\n";
        let b = "Subject: bb\r\n\r\n";
        let pop3 = MemoryMailbox::pop3(&[("a", a), ("b", b), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, b), (2, a), (3, MSG_C)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap.clone());

        mailbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(0, mailbox.state().unwrap().first_unfound_index);
        assert_eq!(
            vec![
                (1, Some(2), some("b")),
                (2, Some(1), some("a")),
                (3, Some(3), some("c")),
            ],
            mapping(&mut mailbox, &mut storage)
        );

        assert_eq!(3, pop3.header_fetches());
        assert_eq!(3, imap.header_fetches());
        assert!(imap.cached(1, CacheField::HeaderDigest).is_some());
        assert!(pop3.cached(1, CacheField::HeaderDigest).is_some());
    }

    #[test]
    fn empty_uidl_excluded() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A), ("", MSG_B)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_B)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap);

        mailbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(
            vec![(1, Some(1), some("a")), (2, None, None)],
            mapping(&mut mailbox, &mut storage)
        );
    }

    #[test]
    fn strict_reconciliation_failure_is_sticky() {
        let pop3 =
            MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (3, MSG_C)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap.clone());

        assert_matches!(
            Err(Error::Reconciliation {
                missing: 1,
                first_seq: 2,
                all_imap_found: true,
                ..
            }),
            mailbox.sync_if_needed(&mut storage)
        );
        assert_eq!(SyncState::Failed, mailbox.state().unwrap().sync);

        let searches = imap.searches();
        assert_matches!(
            Err(Error::UidlSyncFailed),
            mailbox.get_backend_uidl(&mut storage, 1)
        );
        assert_matches!(
            Err(Error::UidlSyncFailed),
            mailbox.get_pop3_order(&mut storage, 1)
        );
        assert_matches!(
            Err(Error::UidlSyncFailed),
            mailbox.sync_if_needed(&mut storage)
        );
        assert_eq!(searches, imap.searches());
        // Nothing is cached from a failed session
        assert_eq!(None, imap.cached(1, CacheField::Pop3Uidl));
    }

    #[test]
    fn tolerated_missing_uidls() {
        for config in vec![
            MigrationConfig {
                ignore_missing_uidls: true,
                ..config()
            },
            MigrationConfig {
                ignore_extra_uidls: true,
                ..config()
            },
        ] {
            let pop3 = MemoryMailbox::pop3(&[
                ("a", MSG_A),
                ("b", MSG_B),
                ("c", MSG_C),
            ]);
            let imap = MemoryMailbox::imap(&[(1, MSG_A), (3, MSG_C)]);
            let mut storage = storage(&pop3, &config);
            let mut mailbox = storage.mailbox_allocated(imap);

            mailbox.sync_if_needed(&mut storage).unwrap();
            assert_eq!(
                vec![(1, Some(1), some("a")), (3, Some(3), some("c"))],
                mapping(&mut mailbox, &mut storage)
            );
        }
    }

    #[test]
    fn extra_uidls_not_tolerated_if_imap_messages_unmatched() {
        let config = MigrationConfig {
            ignore_extra_uidls: true,
            ..config()
        };
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_C)]);
        let mut storage = storage(&pop3, &config);
        let mut mailbox = storage.mailbox_allocated(imap);

        assert_matches!(
            Err(Error::Reconciliation {
                missing: 1,
                all_imap_found: false,
                ..
            }),
            mailbox.sync_if_needed(&mut storage)
        );
    }

    #[test]
    fn truncated_header_refetched_in_full() {
        let content = "Subject: a\r\n \r\nX-Other: b\r\n\r\nbody\r\n";
        let pop3 = MemoryMailbox::pop3(&[("a", content), ("b", content)]);
        // Make the sizes ambiguous so the headers are needed
        let imap = MemoryMailbox::imap(&[(1, content), (2, content)]);
        imap.truncate_header(1, 12);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap.clone());

        mailbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(1, imap.body_fetches());
        assert_eq!(0, pop3.body_fetches());
        assert_eq!(
            vec![(1, Some(1), some("a")), (2, Some(2), some("b"))],
            mapping(&mut mailbox, &mut storage)
        );
    }

    #[test]
    fn imap_read_before_pop3() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_A)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_A)]);
        pop3.set_journal(Rc::clone(&journal));
        imap.set_journal(Rc::clone(&journal));

        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap);
        mailbox.sync_if_needed(&mut storage).unwrap();

        let journal = journal.borrow();
        let first_pop3 =
            journal.iter().position(|e| e.starts_with("pop3:")).unwrap();
        assert_eq!(
            vec!["imap:search", "imap:size", "imap:size"],
            journal[..first_pop3].to_vec()
        );
        assert_eq!("pop3:sync", journal[first_pop3]);
    }

    #[test]
    fn enumeration_failure_fails_session() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A)]);
        pop3.fail_sync();
        let imap = MemoryMailbox::imap(&[(1, MSG_A)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap);

        assert_matches!(
            Err(Error::Enumeration { .. }),
            mailbox.sync_if_needed(&mut storage)
        );
        assert!(storage.pop3_state().records.is_none());
        assert_matches!(
            Err(Error::UidlSyncFailed),
            mailbox.get_backend_uidl(&mut storage, 1)
        );
    }

    #[test]
    fn missing_pop3_mailbox_fails_session() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A)]);
        let config = MigrationConfig {
            mailbox: "POP3-MIGRATION-NS/Other".to_owned(),
            ..config()
        };
        let mut storage = storage(&pop3, &config);
        let mut mailbox =
            storage.mailbox_allocated(MemoryMailbox::imap(&[(1, MSG_A)]));

        assert_matches!(
            Err(Error::Enumeration { .. }),
            mailbox.sync_if_needed(&mut storage)
        );
    }

    #[test]
    fn skip_uidl_cache_neither_reads_nor_writes_uidls() {
        let config = MigrationConfig {
            skip_uidl_cache: true,
            ..config()
        };
        let pop3 =
            MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_B), (3, MSG_C)]);
        // Would link UID 1 to "c" and stop the size match if it were read
        imap.set_cached(1, CacheField::Pop3Uidl, b"c\0");

        let mut storage = storage(&pop3, &config);
        let mut mailbox = storage.mailbox_allocated(imap.clone());
        mailbox.sync_if_needed(&mut storage).unwrap();

        assert_eq!(3, mailbox.state().unwrap().first_unfound_index);
        assert_eq!(
            vec![
                (1, Some(1), some("a")),
                (2, Some(2), some("b")),
                (3, Some(3), some("c")),
            ],
            mapping(&mut mailbox, &mut storage)
        );

        assert_eq!(3, pop3.size_lookups());
        assert_eq!(3, imap.size_lookups());
        assert_eq!(0, imap.header_fetches());
        assert_eq!(Some(b"c\0".to_vec()), imap.cached(1, CacheField::Pop3Uidl));
        assert_eq!(None, imap.cached(2, CacheField::Pop3Uidl));
        assert_eq!(None, imap.cached(3, CacheField::Pop3Uidl));
    }

    #[test]
    fn skip_size_check_matches_everything_by_header() {
        let config = MigrationConfig {
            skip_size_check: true,
            ..config()
        };
        let pop3 =
            MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_B), (3, MSG_C)]);

        let mut storage = storage(&pop3, &config);
        let mut mailbox = storage.mailbox_allocated(imap.clone());
        mailbox.sync_if_needed(&mut storage).unwrap();

        assert_eq!(0, mailbox.state().unwrap().first_unfound_index);
        assert_eq!(
            vec![
                (1, Some(1), some("a")),
                (2, Some(2), some("b")),
                (3, Some(3), some("c")),
            ],
            mapping(&mut mailbox, &mut storage)
        );

        assert_eq!(0, pop3.size_lookups());
        assert_eq!(0, imap.size_lookups());
        assert_eq!(3, pop3.header_fetches());
        assert_eq!(3, imap.header_fetches());
        assert!(storage.pop3_state().all_digests_set);
        assert!(imap.cached(3, CacheField::HeaderDigest).is_some());
        assert_eq!(Some(b"b\0".to_vec()), imap.cached(2, CacheField::Pop3Uidl));
    }

    #[test]
    fn second_session_uses_cache() {
        let a = "Subject: aa\r\n\r\n";
        let b = "Subject: bb\r\n\r\n";
        let pop3 = MemoryMailbox::pop3(&[("a", a), ("b", b), ("c", MSG_C)]);
        let imap = MemoryMailbox::imap(&[(1, b), (2, a), (3, MSG_C)]);

        let mut storage1 = storage(&pop3, &config());
        let mut mailbox1 = storage1.mailbox_allocated(imap.clone());
        mailbox1.sync_if_needed(&mut storage1).unwrap();
        let first = mapping(&mut mailbox1, &mut storage1);

        let header_fetches = imap.header_fetches() + pop3.header_fetches();
        let mut storage2 = storage(&pop3, &config());
        let mut mailbox2 = storage2.mailbox_allocated(imap.clone());
        mailbox2.sync_if_needed(&mut storage2).unwrap();
        assert_eq!(first, mapping(&mut mailbox2, &mut storage2));
        assert_eq!(
            header_fetches,
            imap.header_fetches() + pop3.header_fetches()
        );
    }

    #[test]
    fn all_mailboxes_share_pop3_listing() {
        let config = MigrationConfig {
            all_mailboxes: true,
            ..config()
        };
        let pop3 =
            MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B), ("c", MSG_C)]);
        let inbox = MemoryMailbox::imap(&[(1, MSG_A), (2, MSG_C)]);
        let mut archive = MemoryMailbox::imap(&[(1, MSG_B)]);
        archive.set_name("Archive", false);

        let mut storage = storage(&pop3, &config);
        let mut inbox = storage.mailbox_allocated(inbox);
        inbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(
            vec![(1, Some(1), some("a")), (2, Some(3), some("c"))],
            mapping(&mut inbox, &mut storage)
        );
        assert_eq!(3, pop3.header_fetches());
        assert!(storage.pop3_state().all_digests_set);

        let mut archive = storage.mailbox_allocated(archive);
        assert!(archive.is_attached());
        archive.sync_if_needed(&mut storage).unwrap();
        assert_eq!(
            vec![(1, Some(2), some("b"))],
            mapping(&mut archive, &mut storage)
        );

        assert_eq!(1, pop3.searches());
        assert_eq!(3, pop3.header_fetches());
        assert_eq!(2, storage.inner().opens);
    }

    #[test]
    fn attachment_rules() {
        let pop3 = MemoryMailbox::pop3(&[]);
        let mut archive = MemoryMailbox::imap(&[]);
        archive.set_name("Archive", false);

        let storage1 = storage(&pop3, &config());
        assert!(storage1.is_enabled());
        assert!(storage1
            .mailbox_allocated(MemoryMailbox::imap(&[]))
            .is_attached());
        assert!(!storage1.mailbox_allocated(archive.clone()).is_attached());
        // The POP3 mailbox never matches against itself
        assert!(!storage1.mailbox_allocated(pop3.clone()).is_attached());

        let storage2 = storage(
            &pop3,
            &MigrationConfig {
                all_mailboxes: true,
                ..config()
            },
        );
        assert!(storage2.mailbox_allocated(archive).is_attached());
        assert!(!storage2.mailbox_allocated(pop3.clone()).is_attached());

        let storage3 = storage(&pop3, &MigrationConfig::default());
        assert!(!storage3.is_enabled());
        assert!(!storage3
            .mailbox_allocated(MemoryMailbox::imap(&[]))
            .is_attached());
    }

    #[test]
    fn unattached_mailbox_falls_back() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A)]);
        let mut storage = storage(&pop3, &MigrationConfig::default());
        let mut mailbox =
            storage.mailbox_allocated(MemoryMailbox::imap(&[(1, MSG_A)]));

        mailbox.sync_if_needed(&mut storage).unwrap();
        assert_eq!(None, mailbox.get_backend_uidl(&mut storage, 1).unwrap());
        assert_eq!(
            "inner-UidlBackend-1",
            mailbox
                .get_special(
                    &mut storage,
                    &mut MemoryMail { uid: 1 },
                    SpecialField::UidlBackend
                )
                .unwrap()
        );
        assert_eq!(0, pop3.searches());
    }

    #[test]
    fn special_fields() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A), ("b", MSG_B)]);
        let imap = MemoryMailbox::imap(&[(5, MSG_A), (6, MSG_C)]);
        let config = MigrationConfig {
            ignore_missing_uidls: true,
            ..config()
        };
        let mut storage = storage(&pop3, &config);
        let mut mailbox = storage.mailbox_allocated(imap);

        let mut special = |uid, field| {
            mailbox
                .get_special(&mut storage, &mut MemoryMail { uid }, field)
                .unwrap()
        };
        assert_eq!("a", special(5, SpecialField::UidlBackend));
        assert_eq!("1", special(5, SpecialField::Pop3Order));
        assert_eq!("inner-Guid-5", special(5, SpecialField::Guid));
        assert_eq!(
            "inner-UidlBackend-6",
            special(6, SpecialField::UidlBackend)
        );
        assert_eq!("inner-Pop3Order-6", special(6, SpecialField::Pop3Order));
    }

    #[test]
    fn search_presyncs_only_for_pop3_fields() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A)]);
        let imap = MemoryMailbox::imap(&[(1, MSG_A)]);
        let mut storage = storage(&pop3, &config());
        let mut mailbox = storage.mailbox_allocated(imap.clone());

        let entries = mailbox
            .search_init(&mut storage, FetchFields::PHYSICAL_SIZE)
            .unwrap();
        assert_eq!(vec![MessageEntry { seq: 1, uid: 1 }], entries);
        assert_eq!(SyncState::NotSynced, mailbox.state().unwrap().sync);

        mailbox
            .search_init(&mut storage, FetchFields::UIDL_BACKEND)
            .unwrap();
        assert_eq!(SyncState::Synced, mailbox.state().unwrap().sync);
    }

    #[test]
    fn search_presync_failure_reported_later() {
        let pop3 = MemoryMailbox::pop3(&[("a", MSG_A)]);
        pop3.fail_sync();
        let mut storage = storage(&pop3, &config());
        let mut mailbox =
            storage.mailbox_allocated(MemoryMailbox::imap(&[(1, MSG_A)]));

        assert_eq!(
            1,
            mailbox
                .search_init(&mut storage, FetchFields::POP3_ORDER)
                .unwrap()
                .len()
        );
        assert_matches!(
            Err(Error::UidlSyncFailed),
            mailbox.get_pop3_order(&mut storage, 1)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn reordered_mailbox_matched_and_stable(
            order in (1usize..12).prop_flat_map(|n| {
                Just((0..n).collect::<Vec<_>>()).prop_shuffle()
            })
        ) {
            let contents = (0..order.len())
                .map(|ix| {
                    format!(
                        "Subject: {:02}\r\nX: {}\r\n\r\n",
                        ix,
                        "x".repeat(ix)
                    )
                })
                .collect::<Vec<_>>();
            let uidls = (0..order.len())
                .map(|ix| format!("uidl-{}", ix))
                .collect::<Vec<_>>();

            let pop3 = MemoryMailbox::pop3(
                &uidls
                    .iter()
                    .zip(&contents)
                    .map(|(u, c)| (u.as_str(), c.as_str()))
                    .collect::<Vec<_>>(),
            );
            let imap = MemoryMailbox::imap(
                &order
                    .iter()
                    .enumerate()
                    .map(|(ix, &src)| (ix as u32 + 1, contents[src].as_str()))
                    .collect::<Vec<_>>(),
            );

            let mut storage1 = storage(&pop3, &config());
            let mut mailbox1 = storage1.mailbox_allocated(imap.clone());
            mailbox1.sync_if_needed(&mut storage1).unwrap();
            let first = mapping(&mut mailbox1, &mut storage1);

            for (ix, &src) in order.iter().enumerate() {
                prop_assert_eq!(
                    (
                        ix as u32 + 1,
                        Some(src as u32 + 1),
                        Some(uidls[src].clone())
                    ),
                    first[ix].clone()
                );
            }

            let mut storage2 = storage(&pop3, &config());
            let mut mailbox2 = storage2.mailbox_allocated(imap.clone());
            mailbox2.sync_if_needed(&mut storage2).unwrap();
            prop_assert_eq!(first, mapping(&mut mailbox2, &mut storage2));
        }
    }
}
