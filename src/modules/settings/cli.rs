// Copyright (c) 2025 Mailsync Engine Contributors
//
// This file is part of the Mailsync Engine project.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use clap::Parser;
use std::{env, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(|| {
    let root_dir = env::var("ENGINE_DATA_DIR").unwrap_or_else(|_| "/tmp/mailsync_test".to_string());
    std::fs::create_dir_all(&root_dir).ok();

    Settings {
        engine_log_level: "info".to_string(),
        engine_ansi_logs: true,
        engine_log_to_file: false,
        engine_json_logs: false,
        engine_max_log_files: 5,
        engine_encrypt_password: "test-password".to_string(),
        engine_data_dir: root_dir,
        engine_batch_size: 50,
        engine_since_days: 30,
        engine_worker_pool_size: 1,
        engine_cycle_interval_secs: 300,
        engine_connect_timeout_secs: 10,
        engine_greeting_timeout_secs: 10,
        engine_socket_timeout_secs: 30,
        engine_debug_bounces: false,
    }
});

/// Every knob the sync engine reads, settable by flag or environment
/// variable. See spec.md 6.2 for the semantics of each.
#[derive(Debug, Parser)]
#[clap(
    name = "mailsync-engine",
    about = "A periodic IMAP sync, classification and bounce-tracking engine",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    #[clap(long, default_value = "info", env, help = "Log level for the engine")]
    pub engine_log_level: String,

    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub engine_ansi_logs: bool,

    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub engine_log_to_file: bool,

    #[clap(long, default_value = "false", env, help = "Enable JSON formatted logs")]
    pub engine_json_logs: bool,

    #[clap(
        long,
        default_value = "5",
        env,
        help = "Maximum number of rolled server log files"
    )]
    pub engine_max_log_files: usize,

    #[clap(
        long,
        default_value = "change-this-default-password-now",
        env,
        help = "Password used to derive the key that decrypts stored IMAP credentials"
    )]
    pub engine_encrypt_password: String,

    #[clap(
        long,
        env,
        default_value = "./data",
        help = "Directory the embedded store and logs live under"
    )]
    pub engine_data_dir: String,

    /// Maximum number of messages fetched per mailbox per cycle (spec.md 4.1, 6.2).
    #[clap(
        long,
        default_value = "50",
        env,
        help = "Maximum number of messages fetched per mailbox per sync cycle"
    )]
    pub engine_batch_size: u32,

    /// Recency bound: on a mailbox's first sync, only messages from the last
    /// N days are fetched (spec.md 4.1 step 2, B1).
    #[clap(
        long,
        default_value = "30",
        env,
        help = "On first sync, only fetch messages from the last N days"
    )]
    pub engine_since_days: u32,

    /// Cross-mailbox concurrency bound (spec.md 5).
    #[clap(
        long,
        default_value = "1",
        env,
        help = "Maximum number of mailboxes synced concurrently"
    )]
    pub engine_worker_pool_size: usize,

    #[clap(
        long,
        default_value = "300",
        env,
        help = "Seconds between sync cycle triggers"
    )]
    pub engine_cycle_interval_secs: u64,

    #[clap(
        long,
        default_value = "10",
        env,
        help = "Timeout in seconds for establishing the IMAP TCP/TLS connection"
    )]
    pub engine_connect_timeout_secs: u64,

    #[clap(
        long,
        default_value = "10",
        env,
        help = "Timeout in seconds for reading the IMAP server greeting"
    )]
    pub engine_greeting_timeout_secs: u64,

    #[clap(
        long,
        default_value = "30",
        env,
        help = "Timeout in seconds for any single IMAP command round-trip"
    )]
    pub engine_socket_timeout_secs: u64,

    /// When set, bounce parsing that falls through to UNKNOWN retains the
    /// stripped subject line alongside the diagnostic text (spec.md Open
    /// Questions).
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Retain extra diagnostic context for unparseable bounce messages"
    )]
    pub engine_debug_bounces: bool,
}
