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

//! The mailbox sync cycle (spec.md 4.6): load, decrypt, fetch, then drive
//! each message through classify -> thread -> persist in UID order,
//! advancing the checkpoint only over an unbroken prefix of successes.

use tracing::{error, info, warn};

use crate::modules::classifier;
use crate::modules::crypto;
use crate::modules::error::EngineResult;
use crate::modules::imap::fetcher::{self, FetchOptions};
use crate::modules::model::MailboxStatus;
use crate::modules::persist::{self, PersistOutcome};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::store::Store;

/// Runs one sync cycle for `mailbox_id` against `store`. Returns once the
/// cycle has ended, whether by completing, hitting a fetcher-level error,
/// or finding nothing to do; never panics on a per-message failure.
pub async fn sync(mailbox_id: u64, store: &dyn Store) -> EngineResult<()> {
    let Some(mailbox) = store.get_mailbox(mailbox_id).await? else {
        return Ok(());
    };

    // DISABLED is terminal and user-set; the coordinator never syncs it and
    // never transitions it back on its own (spec.md 3, 4.6 step 1). ERROR
    // mailboxes are still retried here so they can recover to ACTIVE.
    if mailbox.status == MailboxStatus::Disabled {
        return Ok(());
    }

    let password = match crypto::decrypt_string(&mailbox.imap.encrypted_password) {
        Ok(password) => password,
        Err(e) => {
            error!(mailbox_id, error = %e, "credential decryption failed, marking mailbox ERROR");
            store
                .set_mailbox_status(mailbox_id, MailboxStatus::Error, Some(e.to_string()))
                .await?;
            return Ok(());
        }
    };

    let options = FetchOptions {
        batch_size: SETTINGS.engine_batch_size,
        since_days: SETTINGS.engine_since_days,
    };

    let messages = match fetcher::fetch(&mailbox, &password, options).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(mailbox_id, error = %e, "fetch failed, cycle aborted");
            store
                .set_mailbox_status(mailbox_id, MailboxStatus::Error, Some(e.to_string()))
                .await?;
            return Ok(());
        }
    };

    if messages.is_empty() {
        store.touch_synced_at(mailbox_id, crate::utc_now!()).await?;
        store
            .set_mailbox_status(mailbox_id, MailboxStatus::Active, None)
            .await?;
        return Ok(());
    }

    // max_uid only advances over an unbroken prefix of successes (spec.md
    // 4.6 step 7, S5): once a message fails, later successes in the same
    // batch do not move the checkpoint past it.
    let mut max_uid = mailbox.last_synced_uid;
    let mut saw_failure = false;

    for message in &messages {
        let (category, confidence) = classifier::classify(message);
        match persist::persist_message(message, category, confidence, store).await {
            Ok(PersistOutcome::Inserted) | Ok(PersistOutcome::AlreadyPresent) => {
                if !saw_failure {
                    max_uid = max_uid.max(message.uid);
                }
            }
            Err(e) => {
                // Fatal codes reaching here (store unavailable escalating
                // past retries, etc.) are still handled as per-message per
                // spec.md 4.6 step 7: the cycle does not abort mid-batch,
                // only the checkpoint stops advancing.
                let category = e.code().category();
                warn!(
                    mailbox_id,
                    uid = message.uid,
                    error = %e,
                    category = ?category,
                    "failed to persist message, skipping"
                );
                saw_failure = true;
            }
        }
    }

    store.advance_checkpoint(mailbox_id, max_uid).await?;
    store.touch_synced_at(mailbox_id, crate::utc_now!()).await?;
    store
        .set_mailbox_status(mailbox_id, MailboxStatus::Active, None)
        .await?;
    info!(
        mailbox_id,
        fetched = messages.len(),
        checkpoint = max_uid,
        had_failure = saw_failure,
        "sync cycle complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::model::{ImapConfig, ImapEncryption, Mailbox};
    use crate::modules::raw::RawMessage;
    use crate::modules::store::memory::MemoryStore;

    fn mailbox(id: u64, last_synced_uid: u32) -> Mailbox {
        Mailbox {
            id,
            user_id: 1,
            imap: ImapConfig {
                host: "imap.example.com".into(),
                port: 993,
                encryption: ImapEncryption::Tls,
                username: "user@example.com".into(),
                encrypted_password: crypto::encrypt_string("hunter2").unwrap(),
            },
            folder_name: "INBOX".into(),
            uid_validity: None,
            last_synced_uid,
            last_synced_at: None,
            status: MailboxStatus::Active,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn missing_mailbox_is_a_silent_no_op() {
        let store = MemoryStore::new();
        sync(999, &store).await.unwrap();
    }

    #[tokio::test]
    async fn credential_decryption_failure_marks_mailbox_error() {
        let store = MemoryStore::new();
        let mut mb = mailbox(1, 0);
        mb.imap.encrypted_password = "not-valid-ciphertext".into();
        store.seed_mailbox(mb).await;

        sync(1, &store).await.unwrap();

        let mb = store.get_mailbox(1).await.unwrap().unwrap();
        assert!(matches!(mb.status, MailboxStatus::Error));
        assert!(mb.last_error.is_some());
    }

    #[tokio::test]
    async fn persisting_a_message_directly_advances_checkpoint() {
        // Exercises the persist/checkpoint half of the cycle directly,
        // since the fetch half needs a live IMAP socket (spec.md 4.1).
        let store = MemoryStore::new();
        store.seed_mailbox(mailbox(1, 0)).await;

        let message = RawMessage {
            user_id: 1,
            mailbox_id: 1,
            uid: 5,
            message_id: "<5@example.com>".into(),
            subject: "hi".into(),
            ..Default::default()
        };
        let (category, confidence) = classifier::classify(&message);
        persist::persist_message(&message, category, confidence, &store)
            .await
            .unwrap();
        store.advance_checkpoint(1, message.uid).await.unwrap();

        assert_eq!(store.get_mailbox(1).await.unwrap().unwrap().last_synced_uid, 5);
    }

    #[tokio::test]
    async fn disabled_mailbox_is_skipped_and_untouched() {
        let store = MemoryStore::new();
        let mut mb = mailbox(1, 0);
        mb.status = MailboxStatus::Disabled;
        mb.imap.encrypted_password = "not-valid-ciphertext".into();
        store.seed_mailbox(mb).await;

        sync(1, &store).await.unwrap();

        let mb = store.get_mailbox(1).await.unwrap().unwrap();
        assert!(matches!(mb.status, MailboxStatus::Disabled));
        assert!(mb.last_error.is_none());
    }
}

#[cfg(test)]
mod coordinator_tests;
