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

//! Cross-mailbox scheduling (spec.md 5): mailboxes sync concurrently with
//! each other but at most one cycle in flight per mailbox at a time, bounded
//! overall by a worker pool. The trigger itself (cron, on-demand) is out of
//! scope; this is the minimal interval-driven loop that stands in for it.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::modules::model::MailboxStatus;
use crate::modules::store::Store;
use crate::modules::{coordinator, settings::cli::SETTINGS};

/// Drives sync cycles for every mailbox in `store` on a fixed interval
/// until `shutdown` is cancelled, letting any cycle already running finish
/// before the process exits (cooperative shutdown, spec.md 5).
pub async fn run(store: Arc<dyn Store>, shutdown: CancellationToken) {
    let permits = Arc::new(Semaphore::new(SETTINGS.engine_worker_pool_size.max(1)));
    let in_flight: Arc<DashSet<u64>> = Arc::new(DashSet::new());
    let mut ticker = interval(Duration::from_secs(SETTINGS.engine_cycle_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("worker pool stopping, waiting for in-flight cycles to finish");
                let _ = permits.acquire_many(SETTINGS.engine_worker_pool_size.max(1) as u32).await;
                break;
            }
            _ = ticker.tick() => {
                run_cycle(Arc::clone(&store), Arc::clone(&permits), Arc::clone(&in_flight)).await;
            }
        }
    }
}

/// Triggers one cycle attempt per mailbox. A mailbox already mid-cycle is
/// skipped for this trigger (at-most-one-in-flight, spec.md 5); it picks
/// back up on the next tick.
async fn run_cycle(store: Arc<dyn Store>, permits: Arc<Semaphore>, in_flight: Arc<DashSet<u64>>) {
    let mailboxes = match store.list_mailboxes().await {
        Ok(mailboxes) => mailboxes,
        Err(e) => {
            warn!(error = %e, "failed to list mailboxes for this cycle trigger");
            return;
        }
    };

    for mailbox in mailboxes {
        // DISABLED mailboxes are a terminal, user-set state; the coordinator
        // itself also guards this, but skipping here avoids even spawning
        // the task (spec.md 4.6 step 1).
        if mailbox.status == MailboxStatus::Disabled {
            continue;
        }
        if !in_flight.insert(mailbox.id) {
            continue;
        }
        let store = Arc::clone(&store);
        let permits = Arc::clone(&permits);
        let in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire().await else {
                in_flight.remove(&mailbox.id);
                return;
            };
            if let Err(e) = coordinator::sync(mailbox.id, store.as_ref()).await {
                warn!(mailbox_id = mailbox.id, error = %e, "sync cycle returned an error");
            }
            in_flight.remove(&mailbox.id);
        });
    }
}
