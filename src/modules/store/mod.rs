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

//! The abstract persistence seam (spec.md 6.3). Persistence itself is out
//! of scope; every component above this trait talks only to [`Store`], the
//! same way the engine treats the credential cipher as an opaque
//! collaborator. [`native_db_store::NativeDbStore`] and [`memory::MemoryStore`]
//! are the two implementations this repository carries: one for real use,
//! one as a test double.

pub mod memory;
pub mod native_db_store;

use async_trait::async_trait;

use crate::modules::error::EngineResult;
use crate::modules::model::{BounceAggregate, BounceEvent, Email, Mailbox, MailboxStatus, Thread};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_mailbox(&self, mailbox_id: u64) -> EngineResult<Option<Mailbox>>;
    async fn list_mailboxes(&self) -> EngineResult<Vec<Mailbox>>;

    /// Advances the checkpoint to `uid`. Callers must only pass a UID that
    /// was already durably persisted (I2); the store does not re-validate
    /// monotonicity beyond refusing to move it backwards.
    async fn advance_checkpoint(&self, mailbox_id: u64, uid: u32) -> EngineResult<()>;

    /// Stamps `last_synced_at`, independent of whether the checkpoint moved
    /// (spec.md 4.6 step 5: a zero-message cycle still updates it).
    async fn touch_synced_at(&self, mailbox_id: u64, at: i64) -> EngineResult<()>;

    async fn set_mailbox_status(
        &self,
        mailbox_id: u64,
        status: MailboxStatus,
        error: Option<String>,
    ) -> EngineResult<()>;

    async fn find_email(&self, mailbox_id: u64, uid: u32) -> EngineResult<Option<Email>>;
    async fn find_email_by_message_id(
        &self,
        mailbox_id: u64,
        message_id: &str,
    ) -> EngineResult<Option<Email>>;

    /// Looks up every Email in `mailbox_id` whose `message_id` is in `ids`,
    /// used by the thread resolver's References step (spec.md 4.3 step 2).
    async fn find_emails_by_message_ids(
        &self,
        mailbox_id: u64,
        ids: &[String],
    ) -> EngineResult<Vec<Email>>;

    /// Inserts a new message record. Implementations must reject a record
    /// whose `(mailbox_id, uid)` or `(mailbox_id, message_id)` already
    /// exists (I1) with [`crate::modules::error::code::ErrorCode::StoreUniqueViolation`].
    async fn insert_email(&self, email: Email) -> EngineResult<()>;

    async fn find_thread(&self, thread_id: &str) -> EngineResult<Option<Thread>>;

    /// Finds the most recently active thread in `mailbox_id` whose
    /// normalized subject matches, with `last_message_at >= since`
    /// (spec.md 4.3's 7-day window).
    async fn find_thread_by_normalized_subject(
        &self,
        mailbox_id: u64,
        normalized_subject: &str,
        since: i64,
    ) -> EngineResult<Option<Thread>>;

    async fn insert_thread(&self, thread: Thread) -> EngineResult<()>;

    /// Returns every Email currently filed under `thread_id`, used to
    /// recompute the thread's aggregate fields after an insert (spec.md
    /// 4.3 post-persist update, I4).
    async fn list_emails_in_thread(&self, thread_id: &str) -> EngineResult<Vec<Email>>;

    /// Overwrites the recomputed aggregate fields on a thread.
    /// `first_message_at` is never part of this call: it is immutable
    /// after creation (spec.md 3).
    async fn update_thread_aggregate(
        &self,
        thread_id: &str,
        message_count: u32,
        last_message_at: i64,
        participants: Vec<String>,
        is_unread: bool,
    ) -> EngineResult<()>;

    async fn find_bounce(
        &self,
        user_id: u64,
        mailbox_id: u64,
        email: &str,
    ) -> EngineResult<Option<BounceAggregate>>;
    async fn insert_bounce(&self, aggregate: BounceAggregate) -> EngineResult<()>;

    /// Atomically increments `failure_count` by 1 and sets `last_failed_at`
    /// (spec.md 4.5 step 4b). Does not touch `bounce_type`/`error_code`/
    /// `reason`, which reflect the bounce that created the aggregate.
    async fn increment_bounce_failure(&self, bounce_id: &str, at: i64) -> EngineResult<()>;

    /// Appends to the bounce event log. Never updates or removes an
    /// existing event (I1).
    async fn insert_bounce_event(&self, event: BounceEvent) -> EngineResult<()>;
}
