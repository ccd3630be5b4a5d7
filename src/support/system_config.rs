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

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The configuration file read by the command-line tool.
///
/// Only the `[pop3_migration]` table is meaningful here; anything else in the
/// file is ignored so that the same file can be shared with the rest of the
/// system.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub pop3_migration: MigrationConfig,
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}

/// Settings controlling how POP3 UIDLs are mapped onto IMAP messages.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    /// The name of the mailbox which accesses the old POP3 server.
    ///
    /// If empty, migration support is disabled entirely.
    pub mailbox: String,

    /// If true, UIDLs are assigned to every mailbox and not just the INBOX.
    ///
    /// POP3 messages with no match in a particular mailbox are then never
    /// an error, since they may well live in some other mailbox.
    pub all_mailboxes: bool,

    /// If true, POP3 messages which could not be matched to any IMAP message
    /// are only logged instead of failing the whole session.
    pub ignore_missing_uidls: bool,

    /// If true and every IMAP message was matched, extra messages on the POP3
    /// side are silently tolerated.
    ///
    /// This typically happens when new mail arrives at the POP3 server
    /// between the two listings.
    pub ignore_extra_uidls: bool,

    /// If true, message sizes are neither fetched nor used for matching.
    ///
    /// Everything beyond the cached UIDLs is then matched by header hashes.
    pub skip_size_check: bool,

    /// If true, UIDLs cached by a previous session are neither read nor
    /// written.
    pub skip_uidl_cache: bool,
}

impl MigrationConfig {
    pub fn is_enabled(&self) -> bool {
        !self.mailbox.is_empty()
    }
}
