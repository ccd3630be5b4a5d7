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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to {what} in {mailbox}: {source}")]
    Enumeration {
        mailbox: String,
        what: String,
        #[source]
        source: Box<Error>,
    },
    #[error(
        "{missing} POP3 messages have no matching IMAP messages \
         (first POP3 msg {first_seq} UIDL {first_uidl}){}",
        all_found_hint(.all_imap_found)
    )]
    Reconciliation {
        missing: usize,
        first_seq: u32,
        first_uidl: String,
        all_imap_found: bool,
    },
    #[error("POP3 UIDLs couldn't be synced")]
    UidlSyncFailed,
    #[error("Message expunged")]
    Expunged,
    #[error("Mailbox not found")]
    NxMailbox,
    #[error("Malformed UIDL listing at line {0}")]
    BadUidlListing(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error, possibly wrapped in `Enumeration`, indicates that
    /// the message in question went away.
    pub fn is_expunged(&self) -> bool {
        match *self {
            Error::Expunged => true,
            Error::Enumeration { ref source, .. } => source.is_expunged(),
            _ => false,
        }
    }
}

fn all_found_hint(all_imap_found: &bool) -> &'static str {
    if *all_imap_found {
        " - all IMAP messages were found (POP3 contains more than IMAP \
         INBOX - you may want to set all_mailboxes=yes)"
    } else {
        ""
    }
}
