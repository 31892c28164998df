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

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;

/// Initializes the global `tracing` subscriber from [`SETTINGS`]: ANSI or
/// JSON formatting, stdout or a daily-rolled file under the data
/// directory's `logs/` folder. Must be called once, before any other
/// component logs.
pub fn init_logging() {
    let filter = EnvFilter::try_new(&SETTINGS.engine_log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if SETTINGS.engine_log_to_file {
        let file_appender = tracing_appender::rolling::daily(&DATA_DIR_MANAGER.log_dir, "mailsync.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive the process, and this
        // function runs exactly once at startup.
        Box::leak(Box::new(guard));

        if SETTINGS.engine_json_logs {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
        }
    } else if SETTINGS.engine_json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(SETTINGS.engine_ansi_logs))
            .init();
    }
}
