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

//! The matching phases.
//!
//! Nothing here does I/O; header digests must already have been collected
//! by the caller before `assign_by_digest` is called.
//!
//! Between phases, both sides are in their natural order: POP3 records by
//! `pop_seq` and IMAP records by `uid`.

use log::{debug, error, warn};

use super::model::*;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::MigrationConfig;

/// Restores the natural order of both sides.
pub fn sort_natural(pop3: &mut [PopRecord], imap: &mut [ImapRecord]) {
    sort_pop_by_seq(pop3);
    sort_imap_by_uid(imap);
}

/// Phase 1: links IMAP messages whose UIDL was cached by an earlier session
/// to the POP3 message with the same UIDL.
///
/// Leaves both sides sorted by UIDL. Returns the number of links made.
pub fn assign_cached(pop3: &mut [PopRecord], imap: &mut [ImapRecord]) -> usize {
    sort_pop_by_uidl(pop3);
    sort_imap_by_uidl(imap);

    let mut matches = 0;
    let (mut pop_ix, mut imap_ix) = (0, 0);
    while pop_ix < pop3.len() && imap_ix < imap.len() {
        let imap_uidl = match imap[imap_ix].pop_uidl {
            Some(ref uidl) => uidl,
            // Absent UIDLs sort last, so there is nothing more to find
            None => break,
        };

        match pop3[pop_ix].uidl.as_str().cmp(imap_uidl.as_str()) {
            std::cmp::Ordering::Less => pop_ix += 1,
            std::cmp::Ordering::Greater => imap_ix += 1,
            std::cmp::Ordering::Equal => {
                link(&mut pop3[pop_ix], &mut imap[imap_ix]);
                matches += 1;
                pop_ix += 1;
                imap_ix += 1;
            },
        }
    }

    matches
}

/// The result of `assign_by_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeMatch {
    /// The index at which matching stopped.
    pub first_unfound_index: usize,
    /// Whether every message on both sides was matched.
    pub complete: bool,
}

/// Phase 2: walks both sides in lock-step, linking messages at the same
/// position as long as their sizes agree and are unambiguous.
///
/// Mailboxes which were not reorganised keep the relative order of their
/// messages between the protocols, so this usually resolves everything
/// without fetching any headers.
pub fn assign_by_size(
    pop3: &mut [PopRecord],
    imap: &mut [ImapRecord],
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> SizeMatch {
    let count = pop3.len().min(imap.len());
    let (mut uidl_matches, mut size_matches) = (0, 0);

    let mut i = 0;
    while i < count {
        if let Some(ref cached) = imap[i].pop_uidl {
            // The UIDL was cached; positions are only trustworthy as long as
            // the cache agrees with them.
            if *cached == pop3[i].uidl {
                uidl_matches += 1;
                i += 1;
                continue;
            }
            break;
        }

        if config.skip_size_check
            || pop3[i].matched_uid.is_some()
            || pop3[i].size.is_none()
            || pop3[i].size != imap[i].physical_size
        {
            break;
        }

        // Two messages of the same size could be in either order
        if i + 1 < count && pop3[i].size == pop3[i + 1].size {
            break;
        }

        link(&mut pop3[i], &mut imap[i]);
        size_matches += 1;
        i += 1;
    }

    debug!(
        "{} cached uidls={}, size matches={}, total={}",
        log_prefix, uidl_matches, size_matches, count
    );

    SizeMatch {
        first_unfound_index: i,
        complete: i == count && pop3.len() == imap.len(),
    }
}

/// Phase 3: links still-unmatched messages with identical header digests,
/// then decides whether any POP3 messages left over are acceptable.
///
/// Both sides are returned to their natural order, whether or not this
/// succeeds.
pub fn assign_by_digest(
    pop3: &mut [PopRecord],
    imap: &mut [ImapRecord],
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> Result<(), Error> {
    sort_pop_by_digest(pop3);
    sort_imap_by_digest(imap);

    let (mut pop_ix, mut imap_ix) = (0, 0);
    while pop_ix < pop3.len() && imap_ix < imap.len() {
        let pop_digest = match pop3[pop_ix].header_digest {
            Some(digest) if pop3[pop_ix].matched_uid.is_none() => digest,
            _ => {
                pop_ix += 1;
                continue;
            },
        };
        let imap_digest = match imap[imap_ix].header_digest {
            Some(digest) if imap[imap_ix].pop_uidl.is_none() => digest,
            _ => {
                imap_ix += 1;
                continue;
            },
        };

        match pop_digest.cmp(&imap_digest) {
            std::cmp::Ordering::Less => pop_ix += 1,
            std::cmp::Ordering::Greater => imap_ix += 1,
            std::cmp::Ordering::Equal => {
                link(&mut pop3[pop_ix], &mut imap[imap_ix]);
                pop_ix += 1;
                imap_ix += 1;
            },
        }
    }

    sort_natural(pop3, imap);
    check_missing(pop3, imap.len(), config, log_prefix)
}

/// Applies the tolerance policy to POP3 messages left without a match.
///
/// Records without a digest belonged to messages expunged during matching
/// and are not counted.
fn check_missing(
    pop3: &[PopRecord],
    imap_count: usize,
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> Result<(), Error> {
    let mut missing = pop3
        .iter()
        .filter(|r| r.matched_uid.is_none() && r.header_digest.is_some());
    let first = match missing.next() {
        Some(first) => first,
        None => {
            debug!(
                "{} {} mails matched by headers",
                log_prefix,
                pop3.len()
            );
            return Ok(());
        },
    };
    let missing_count = 1 + missing.count();

    if config.all_mailboxes {
        // The rest may well be in some other mailbox
        debug!(
            "{} {} POP3 messages not in this mailbox",
            log_prefix, missing_count
        );
        return Ok(());
    }

    let all_imap_found = imap_count + missing_count == pop3.len();
    let err = Error::Reconciliation {
        missing: missing_count,
        first_seq: first.pop_seq,
        first_uidl: first.uidl.clone(),
        all_imap_found,
    };

    if all_imap_found && config.ignore_extra_uidls {
        // Most likely new mail arrived at the POP3 server in the meantime
        debug!("{} {}", log_prefix, err);
        Ok(())
    } else if !config.ignore_missing_uidls {
        error!(
            "{} {} - set ignore_missing_uidls=yes{} to continue anyway",
            log_prefix,
            err,
            if all_imap_found {
                " or ignore_extra_uidls=yes"
            } else {
                ""
            },
        );
        Err(err)
    } else {
        warn!("{} {}", log_prefix, err);
        Ok(())
    }
}
