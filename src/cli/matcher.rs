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

use std::io::{self, Write};

use log::info;

use super::main::MatchSubcommand;
use crate::dirbox::{DirMailbox, DirStorage};
use crate::migration::model::ImapRecord;
use crate::migration::session::MigrationStorage;
use crate::support::{
    error::Error, log_prefix::LogPrefix, sysexits::*,
    system_config::MigrationConfig,
};

pub(super) fn run(config: MigrationConfig, cmd: MatchSubcommand) {
    if !cmd.pop3.is_dir() {
        die!(EX_NOINPUT, "'{}' is not a directory", cmd.pop3.display());
    }

    let imap = match DirMailbox::open_imap(&cmd.imap, &cmd.mailbox_name) {
        Ok(mailbox) => mailbox,
        Err(Error::NxMailbox) => {
            die!(EX_NOINPUT, "'{}' is not a directory", cmd.imap.display())
        },
        Err(e) => die!(
            Sysexit::from(&e),
            "Failed to read '{}': {}",
            cmd.imap.display(),
            e
        ),
    };

    let log_prefix = LogPrefix::new("pop3_migration".to_owned());
    let mut storage = MigrationStorage::new(
        DirStorage::new(&cmd.pop3, &config.mailbox),
        &config,
        log_prefix,
    );
    let mut mailbox = storage.mailbox_allocated(imap);
    if !mailbox.is_attached() {
        die!(
            EX_USAGE,
            "{} is not the INBOX; use --all-mailboxes to match it anyway",
            cmd.mailbox_name
        );
    }

    if let Err(e) = mailbox.sync_if_needed(&mut storage) {
        die!(EX_TEMPFAIL, "Matching {} failed: {}", cmd.mailbox_name, e);
    }

    let records = match mailbox.state() {
        Some(state) => &state.imap[..],
        None => &[],
    };
    info!(
        "{} of {} messages in {} matched",
        records.iter().filter(|r| r.pop_seq.is_some()).count(),
        records.len(),
        cmd.mailbox_name
    );

    let stdout = io::stdout();
    if let Err(e) = print_records(&mut stdout.lock(), records) {
        die!(EX_IOERR, "Failed to write output: {}", e);
    }
}

fn print_records(
    out: &mut impl Write,
    records: &[ImapRecord],
) -> io::Result<()> {
    for record in records {
        write!(out, "{}\t", record.uid)?;
        match record.pop_seq {
            Some(seq) => write!(out, "{}\t", seq)?,
            None => write!(out, "-\t")?,
        }
        writeln!(out, "{}", record.pop_uidl.as_deref().unwrap_or("-"))?;
    }
    out.flush()
}
