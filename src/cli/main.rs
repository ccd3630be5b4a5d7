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

use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::dirbox;
use crate::support::sysexits::*;
use crate::support::system_config::{MigrationConfig, SystemConfig};

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Match(MatchSubcommand),
}

/// Match the messages of a POP3 mailbox against an IMAP mailbox.
///
/// Both mailboxes are directories. The POP3 directory contains the message
/// files and a file named `uidl` which lists them in POP3 order, one
/// `<file> <uidl>` per line. The IMAP directory contains one `<uid>.eml` file
/// per message.
///
/// For every IMAP message, the UID, the POP3 order and the POP3 UIDL are
/// printed, separated by tabs, with `-` for messages that have no match.
///
/// Matching results and header hashes are cached in a
/// `.pop3-migration-cache` file in each directory, so later runs only need
/// to look at new messages.
#[derive(StructOpt)]
pub(super) struct MatchSubcommand {
    /// The directory holding the POP3 messages and their `uidl` listing.
    #[structopt(long, parse(from_os_str))]
    pub(super) pop3: PathBuf,

    /// The directory holding the IMAP messages.
    #[structopt(long, parse(from_os_str))]
    pub(super) imap: PathBuf,

    /// The name of the IMAP mailbox. Only the INBOX is matched unless
    /// --all-mailboxes is given.
    #[structopt(long, default_value = "INBOX")]
    pub(super) mailbox_name: String,

    /// A TOML file with a `[pop3_migration]` table. Flags given on the
    /// command line are applied on top of it.
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,

    /// A log4rs configuration file, used when standard error is not a
    /// terminal. Without it, messages go to syslog.
    #[structopt(long, parse(from_os_str))]
    pub(super) log_config: Option<PathBuf>,

    /// Match every mailbox, not just the INBOX.
    #[structopt(long)]
    pub(super) all_mailboxes: bool,

    /// Do not fail if some POP3 messages have no IMAP counterpart.
    #[structopt(long)]
    pub(super) ignore_missing_uidls: bool,

    /// Do not fail if the only unmatched messages are on the POP3 side.
    #[structopt(long)]
    pub(super) ignore_extra_uidls: bool,

    /// Do not use message sizes for matching.
    #[structopt(long)]
    pub(super) skip_size_check: bool,

    /// Neither use nor update UIDLs cached by earlier runs.
    #[structopt(long)]
    pub(super) skip_uidl_cache: bool,
}

impl MatchSubcommand {
    fn apply_flags(&self, config: &mut MigrationConfig) {
        config.all_mailboxes |= self.all_mailboxes;
        config.ignore_missing_uidls |= self.ignore_missing_uidls;
        config.ignore_extra_uidls |= self.ignore_extra_uidls;
        config.skip_size_check |= self.skip_size_check;
        config.skip_uidl_cache |= self.skip_uidl_cache;
    }
}

/// The POP3 mailbox name used when the configuration does not name one.
const DEFAULT_POP3_MAILBOX: &str = "POP3-MIGRATION-NS/INBOX";

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::Match(cmd) => match_mailboxes(cmd),
    }
}

fn match_mailboxes(cmd: MatchSubcommand) {
    let mut config = match cmd.config {
        Some(ref path) => match SystemConfig::load(path) {
            Ok(config) => config.pop3_migration,
            Err(e) => die!(
                EX_CONFIG,
                "Error in config file at '{}': {}",
                path.display(),
                e
            ),
        },
        None => MigrationConfig::default(),
    };

    cmd.apply_flags(&mut config);
    if !config.is_enabled() {
        config.mailbox = DEFAULT_POP3_MAILBOX.to_owned();
    }
    if dirbox::namespace_of(&config.mailbox).is_empty() {
        die!(
            EX_CONFIG,
            "The POP3 mailbox '{}' must be inside its own namespace, \
             e.g. '{}'",
            config.mailbox,
            DEFAULT_POP3_MAILBOX
        );
    }

    init_log(&cmd);
    super::matcher::run(config, cmd);
}

fn init_log(cmd: &MatchSubcommand) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
    } else if let Some(ref log_config_file) = cmd.log_config {
        if let Err(e) = load_log_config(log_config_file).and_then(|config| {
            log4rs::init_config(config)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => die!(EX_SOFTWARE, "Failed to connect to syslog: {}", e),
        };
        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
        {
            die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
        }
    }
}

fn load_log_config(path: &Path) -> Result<log4rs::config::Config, String> {
    log4rs::load_config_file(path, log4rs::file::Deserializers::new())
        .map_err(|e| e.to_string())
}
