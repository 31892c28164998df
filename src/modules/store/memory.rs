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

//! An in-memory [`Store`] used by tests so the coordinator's scenario
//! suite can run without a real `native_db` file, the same role the base
//! project lets `DB_MANAGER` play behind a single access point.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::model::{BounceAggregate, BounceEvent, Email, Mailbox, MailboxStatus, Thread};
use crate::raise_error;

use super::Store;

#[derive(Default)]
struct Inner {
    mailboxes: HashMap<u64, Mailbox>,
    emails_by_uid: HashMap<String, Email>,
    emails_by_message_id: HashMap<String, String>,
    threads: HashMap<String, Thread>,
    bounce_aggregates: HashMap<String, BounceAggregate>,
    bounce_events: Vec<BounceEvent>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn seed_mailbox(&self, mailbox: Mailbox) {
        self.inner.lock().await.mailboxes.insert(mailbox.id, mailbox);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_mailbox(&self, mailbox_id: u64) -> EngineResult<Option<Mailbox>> {
        Ok(self.inner.lock().await.mailboxes.get(&mailbox_id).cloned())
    }

    async fn list_mailboxes(&self) -> EngineResult<Vec<Mailbox>> {
        Ok(self.inner.lock().await.mailboxes.values().cloned().collect())
    }

    async fn advance_checkpoint(&self, mailbox_id: u64, uid: u32) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mailbox) = inner.mailboxes.get_mut(&mailbox_id) {
            if uid > mailbox.last_synced_uid {
                mailbox.last_synced_uid = uid;
            }
        }
        Ok(())
    }

    async fn touch_synced_at(&self, mailbox_id: u64, at: i64) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mailbox) = inner.mailboxes.get_mut(&mailbox_id) {
            mailbox.last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn set_mailbox_status(
        &self,
        mailbox_id: u64,
        status: MailboxStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mailbox) = inner.mailboxes.get_mut(&mailbox_id) {
            mailbox.status = status;
            mailbox.last_error = error;
        }
        Ok(())
    }

    async fn find_email(&self, mailbox_id: u64, uid: u32) -> EngineResult<Option<Email>> {
        let inner = self.inner.lock().await;
        Ok(inner.emails_by_uid.get(&Email::uid_key(mailbox_id, uid)).cloned())
    }

    async fn find_email_by_message_id(
        &self,
        mailbox_id: u64,
        message_id: &str,
    ) -> EngineResult<Option<Email>> {
        let inner = self.inner.lock().await;
        let key = Email::message_id_key(mailbox_id, message_id);
        Ok(inner
            .emails_by_message_id
            .get(&key)
            .and_then(|uid_key| inner.emails_by_uid.get(uid_key))
            .cloned())
    }

    async fn find_emails_by_message_ids(
        &self,
        mailbox_id: u64,
        ids: &[String],
    ) -> EngineResult<Vec<Email>> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let key = Email::message_id_key(mailbox_id, id);
                inner
                    .emails_by_message_id
                    .get(&key)
                    .and_then(|uid_key| inner.emails_by_uid.get(uid_key))
                    .cloned()
            })
            .collect())
    }

    async fn insert_email(&self, email: Email) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.emails_by_uid.contains_key(&email.mailbox_uid_key) {
            return Err(raise_error!(
                format!(
                    "email with uid_key='{}' already exists",
                    email.mailbox_uid_key
                ),
                ErrorCode::StoreUniqueViolation
            ));
        }
        if inner
            .emails_by_message_id
            .contains_key(&email.mailbox_message_id_key)
        {
            return Err(raise_error!(
                format!(
                    "email with message_id_key='{}' already exists",
                    email.mailbox_message_id_key
                ),
                ErrorCode::StoreUniqueViolation
            ));
        }
        inner
            .emails_by_message_id
            .insert(email.mailbox_message_id_key.clone(), email.mailbox_uid_key.clone());
        inner.emails_by_uid.insert(email.mailbox_uid_key.clone(), email);
        Ok(())
    }

    async fn find_thread(&self, thread_id: &str) -> EngineResult<Option<Thread>> {
        Ok(self.inner.lock().await.threads.get(thread_id).cloned())
    }

    async fn find_thread_by_normalized_subject(
        &self,
        mailbox_id: u64,
        normalized_subject: &str,
        since: i64,
    ) -> EngineResult<Option<Thread>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .threads
            .values()
            .filter(|t| {
                t.mailbox_id == mailbox_id
                    && t.normalized_subject == normalized_subject
                    && t.last_message_at >= since
            })
            .max_by_key(|t| t.last_message_at)
            .cloned())
    }

    async fn insert_thread(&self, thread: Thread) -> EngineResult<()> {
        self.inner.lock().await.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn list_emails_in_thread(&self, thread_id: &str) -> EngineResult<Vec<Email>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .emails_by_uid
            .values()
            .filter(|e| e.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn update_thread_aggregate(
        &self,
        thread_id: &str,
        message_count: u32,
        last_message_at: i64,
        participants: Vec<String>,
        is_unread: bool,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(thread) = inner.threads.get_mut(thread_id) {
            thread.message_count = message_count;
            thread.last_message_at = last_message_at;
            thread.participants = participants;
            thread.is_unread = is_unread;
        }
        Ok(())
    }

    async fn find_bounce(
        &self,
        user_id: u64,
        mailbox_id: u64,
        email: &str,
    ) -> EngineResult<Option<BounceAggregate>> {
        let key = BounceAggregate::key(mailbox_id, email);
        let inner = self.inner.lock().await;
        Ok(inner
            .bounce_aggregates
            .get(&key)
            .filter(|b| b.user_id == user_id)
            .cloned())
    }

    async fn insert_bounce(&self, aggregate: BounceAggregate) -> EngineResult<()> {
        self.inner
            .lock()
            .await
            .bounce_aggregates
            .insert(aggregate.id.clone(), aggregate);
        Ok(())
    }

    async fn increment_bounce_failure(&self, bounce_id: &str, at: i64) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(aggregate) = inner.bounce_aggregates.get_mut(bounce_id) {
            aggregate.failure_count += 1;
            aggregate.last_failed_at = at;
        }
        Ok(())
    }

    async fn insert_bounce_event(&self, event: BounceEvent) -> EngineResult<()> {
        self.inner.lock().await.bounce_events.push(event);
        Ok(())
    }
}
