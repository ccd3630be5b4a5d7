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

//! The UIDL matching engine.
//!
//! `records` enumerates both sides, `matching` pairs them up in three
//! phases, `cache` carries results between sessions, and `session` ties it
//! all to the lifecycle of a target mailbox.

pub mod backend;
pub mod cache;
pub mod matching;
pub mod model;
pub mod records;
pub mod session;

#[cfg(test)]
mod test_support;
