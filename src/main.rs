//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Bichon Email Archiving Project
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

use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::modules::error::EngineResult;
use crate::modules::settings::dir::DataDirManager;
use crate::modules::store::native_db_store::NativeDbStore;
use crate::modules::store::Store;
use crate::modules::{logger, worker};

#[macro_use]
mod macros;
mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
 _      _        _
| |    (_)      | |
| |__   _   ___ | |__    ___   _ __
| '_ \ | | / __|| '_ \  / _ \ | '_ \
| |_) || || (__ | | | || (_) || | | |
|_.__/ |_| \___||_| |_| \___/ |_| |_|

"#;

#[cfg(not(test))]
#[tokio::main]
async fn main() -> EngineResult<()> {
    logger::init_logging();
    info!("{}", LOGO);
    info!("Starting mailsync-engine");
    info!("Version:  {}", env!("CARGO_PKG_VERSION"));

    if let Err(error) = run().await {
        eprintln!("{:?}", error);
        return Err(error);
    }
    Ok(())
}

async fn run() -> EngineResult<()> {
    DataDirManager::initialize().await?;
    let store: Arc<dyn Store> = Arc::new(NativeDbStore::open()?);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        listen_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    worker::run(store, shutdown).await;
    info!("mailsync-engine stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl-C). Shutdown is cooperative: the
/// worker pool finishes in-flight cycles before the process exits,
/// consistent with spec.md 5's "no explicit cancellation channel".
async fn listen_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
