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

//! Enumeration of both sides of the migration into record sets.

use log::{error, warn};

use super::backend::{FetchFields, Mailbox};
use super::cache;
use super::model::*;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::MigrationConfig;

fn size_fields(config: &MigrationConfig) -> FetchFields {
    if config.skip_size_check {
        FetchFields::empty()
    } else {
        FetchFields::PHYSICAL_SIZE
    }
}

fn enumeration_error(
    log_prefix: &LogPrefix,
    mailbox: &str,
    what: String,
    source: Error,
) -> Error {
    error!("{} Failed to {}: {}", log_prefix, what, source);
    Error::Enumeration {
        mailbox: mailbox.to_owned(),
        what,
        source: Box::new(source),
    }
}

/// Reads every message of the target mailbox, in UID order.
///
/// Unless disabled, the UIDL cached by an earlier session is pre-populated
/// into each record.
pub fn read_imap<M: Mailbox>(
    mailbox: &mut M,
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> Result<Vec<ImapRecord>, Error> {
    let entries = mailbox.search_all(size_fields(config)).map_err(|e| {
        enumeration_error(
            log_prefix,
            mailbox.name(),
            "search all IMAP mails".to_owned(),
            e,
        )
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let physical_size = if config.skip_size_check {
            None
        } else {
            match mailbox.physical_size(entry.seq) {
                Ok(size) => Some(size),
                Err(e) => {
                    return Err(enumeration_error(
                        log_prefix,
                        mailbox.name(),
                        format!("get psize for imap uid {}", entry.uid),
                        e,
                    ))
                },
            }
        };

        let mut record = ImapRecord::new(entry.uid, entry.seq, physical_size);
        if !config.skip_uidl_cache {
            record.pop_uidl =
                cache::lookup_uidl(mailbox, entry.uid, log_prefix);
        }

        if let Some(last) = records.last().map(|r: &ImapRecord| r.uid) {
            if last >= record.uid {
                return Err(enumeration_error(
                    log_prefix,
                    mailbox.name(),
                    format!("list IMAP mails in UID order (uid {})", entry.uid),
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "UIDs not strictly ascending",
                    )),
                ));
            }
        }

        records.push(record);
    }

    Ok(records)
}

/// Reads the POP3 listing into `state`.
///
/// If `state` already holds a listing from an earlier target mailbox, it is
/// reused as-is after clearing all matches, without talking to the server.
pub fn read_pop3<M: Mailbox>(
    mailbox: &mut M,
    state: &mut PopMailboxState,
    config: &MigrationConfig,
    log_prefix: &LogPrefix,
) -> Result<(), Error> {
    if let Some(ref mut records) = state.records {
        for record in records {
            record.matched_uid = None;
        }
        return Ok(());
    }

    mailbox.sync().map_err(|e| {
        enumeration_error(
            log_prefix,
            mailbox.name(),
            format!("sync mailbox {}", mailbox.name()),
            e,
        )
    })?;

    let entries = mailbox.search_all(size_fields(config)).map_err(|e| {
        enumeration_error(
            log_prefix,
            mailbox.name(),
            "search all POP3 mails".to_owned(),
            e,
        )
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let size = if config.skip_size_check {
            None
        } else {
            match mailbox.physical_size(entry.seq) {
                Ok(size) => Some(size),
                Err(e) => {
                    return Err(enumeration_error(
                        log_prefix,
                        mailbox.name(),
                        format!("get size for msg {}", entry.seq),
                        e,
                    ))
                },
            }
        };

        let uidl = match mailbox.backend_uidl(entry.seq) {
            Ok(uidl) => uidl,
            Err(e) => {
                return Err(enumeration_error(
                    log_prefix,
                    mailbox.name(),
                    format!("get UIDL for msg {}", entry.seq),
                    e,
                ))
            },
        };

        if uidl.is_empty() {
            warn!("{} UIDL for msg {} is empty", log_prefix, entry.seq);
            continue;
        }

        records.push(PopRecord {
            pop_seq: entry.seq,
            uid: entry.uid,
            uidl,
            size,
            header_digest: None,
            matched_uid: None,
        });
    }

    state.records = Some(records);
    Ok(())
}
