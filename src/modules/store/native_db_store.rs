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

//! The `native_db`-backed [`Store`], following the transaction-per-call
//! shape of the base project's `modules::database` helpers: every
//! operation opens its own transaction inside `spawn_blocking`, since
//! `native_db` transactions are not `Send` across `.await` points.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use itertools::Itertools;
use native_db::*;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::model::{
    BounceAggregate, BounceAggregateKey, BounceEvent, Email, EmailKey, Mailbox, MailboxStatus,
    Thread,
};
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::raise_error;

use super::Store;

static MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut models = Models::new();
    models.define::<Mailbox>().expect("failed to define Mailbox model");
    models.define::<Email>().expect("failed to define Email model");
    models.define::<Thread>().expect("failed to define Thread model");
    models
        .define::<BounceAggregate>()
        .expect("failed to define BounceAggregate model");
    models
        .define::<BounceEvent>()
        .expect("failed to define BounceEvent model");
    models
});

pub struct NativeDbStore {
    db: Arc<Database<'static>>,
}

impl NativeDbStore {
    pub fn open() -> EngineResult<Self> {
        let db = Builder::new()
            .create(&MODELS, &DATA_DIR_MANAGER.store_path)
            .map_err(|e| {
                raise_error!(
                    format!("failed to open store at {:?}: {e:?}", DATA_DIR_MANAGER.store_path),
                    ErrorCode::InternalError
                )
            })?;
        Ok(Self { db: Arc::new(db) })
    }
}

macro_rules! blocking_rw {
    ($db:expr, $body:expr) => {{
        let db = $db.clone();
        tokio::task::spawn_blocking(move || {
            let rw = db
                .rw_transaction()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            let out = $body(&rw)?;
            rw.commit()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(out)
        })
        .await
        .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
    }};
}

macro_rules! blocking_ro {
    ($db:expr, $body:expr) => {{
        let db = $db.clone();
        tokio::task::spawn_blocking(move || {
            let r = db
                .r_transaction()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            $body(&r)
        })
        .await
        .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
    }};
}

#[async_trait]
impl Store for NativeDbStore {
    async fn get_mailbox(&self, mailbox_id: u64) -> EngineResult<Option<Mailbox>> {
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            r.get()
                .primary(mailbox_id)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))
        })
    }

    async fn list_mailboxes(&self) -> EngineResult<Vec<Mailbox>> {
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            r.scan()
                .primary::<Mailbox>()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))
        })
    }

    async fn advance_checkpoint(&self, mailbox_id: u64, uid: u32) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            let Some(current): Option<Mailbox> = rw
                .get()
                .primary(mailbox_id)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
            else {
                return Ok(());
            };
            if uid > current.last_synced_uid {
                let mut updated = current.clone();
                updated.last_synced_uid = uid;
                rw.update(current, updated)
                    .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            }
            Ok(())
        })
    }

    async fn touch_synced_at(&self, mailbox_id: u64, at: i64) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            let Some(current): Option<Mailbox> = rw
                .get()
                .primary(mailbox_id)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
            else {
                return Ok(());
            };
            let mut updated = current.clone();
            updated.last_synced_at = Some(at);
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn set_mailbox_status(
        &self,
        mailbox_id: u64,
        status: MailboxStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            let Some(current): Option<Mailbox> = rw
                .get()
                .primary(mailbox_id)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
            else {
                return Ok(());
            };
            let mut updated = current.clone();
            updated.status = status;
            updated.last_error = error;
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn find_email(&self, mailbox_id: u64, uid: u32) -> EngineResult<Option<Email>> {
        let key = Email::uid_key(mailbox_id, uid);
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            r.get()
                .secondary(EmailKey::mailbox_uid_key, key.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))
        })
    }

    async fn find_email_by_message_id(
        &self,
        mailbox_id: u64,
        message_id: &str,
    ) -> EngineResult<Option<Email>> {
        let key = Email::message_id_key(mailbox_id, message_id);
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            r.get()
                .secondary(EmailKey::mailbox_message_id_key, key.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))
        })
    }

    async fn find_emails_by_message_ids(
        &self,
        mailbox_id: u64,
        ids: &[String],
    ) -> EngineResult<Vec<Email>> {
        let keys: Vec<String> = ids
            .iter()
            .map(|id| Email::message_id_key(mailbox_id, id))
            .collect();
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            let mut found = Vec::new();
            for key in &keys {
                let email: Option<Email> = r
                    .get()
                    .secondary(EmailKey::mailbox_message_id_key, key.clone())
                    .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
                if let Some(email) = email {
                    found.push(email);
                }
            }
            Ok(found)
        })
    }

    async fn insert_email(&self, email: Email) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            rw.insert(email.clone()).map_err(|e| {
                raise_error!(format!("{e:?}"), ErrorCode::StoreUniqueViolation)
            })?;
            Ok(())
        })
    }

    async fn find_thread(&self, thread_id: &str) -> EngineResult<Option<Thread>> {
        let id = thread_id.to_string();
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            r.get()
                .primary(id.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))
        })
    }

    async fn find_thread_by_normalized_subject(
        &self,
        mailbox_id: u64,
        normalized_subject: &str,
        since: i64,
    ) -> EngineResult<Option<Thread>> {
        let subject = normalized_subject.to_string();
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            let candidates: Vec<Thread> = r
                .scan()
                .primary::<Thread>()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(candidates
                .into_iter()
                .filter(|t| {
                    t.mailbox_id == mailbox_id
                        && t.normalized_subject == subject
                        && t.last_message_at >= since
                })
                .max_by_key(|t| t.last_message_at))
        })
    }

    async fn insert_thread(&self, thread: Thread) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            rw.insert(thread.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn list_emails_in_thread(&self, thread_id: &str) -> EngineResult<Vec<Email>> {
        let id = thread_id.to_string();
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            let all: Vec<Email> = r
                .scan()
                .primary::<Email>()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(all.into_iter().filter(|e| e.thread_id == id).collect())
        })
    }

    async fn update_thread_aggregate(
        &self,
        thread_id: &str,
        message_count: u32,
        last_message_at: i64,
        participants: Vec<String>,
        is_unread: bool,
    ) -> EngineResult<()> {
        let id = thread_id.to_string();
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            let Some(current): Option<Thread> = rw
                .get()
                .primary(id.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
            else {
                return Ok(());
            };
            let mut updated = current.clone();
            updated.message_count = message_count;
            updated.last_message_at = last_message_at;
            updated.participants = participants.clone();
            updated.is_unread = is_unread;
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn find_bounce(
        &self,
        user_id: u64,
        mailbox_id: u64,
        email: &str,
    ) -> EngineResult<Option<BounceAggregate>> {
        let key = BounceAggregate::key(mailbox_id, email);
        blocking_ro!(self.db, |r: &transaction::RTransaction| {
            let found: Option<BounceAggregate> = r
                .get()
                .secondary(BounceAggregateKey::id, key.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(found.filter(|b| b.user_id == user_id))
        })
    }

    async fn insert_bounce(&self, aggregate: BounceAggregate) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            rw.insert(aggregate.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn increment_bounce_failure(&self, bounce_id: &str, at: i64) -> EngineResult<()> {
        let id = bounce_id.to_string();
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            let Some(current): Option<BounceAggregate> = rw
                .get()
                .secondary(BounceAggregateKey::id, id.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?
            else {
                return Ok(());
            };
            let mut updated = current.clone();
            updated.failure_count += 1;
            updated.last_failed_at = at;
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }

    async fn insert_bounce_event(&self, event: BounceEvent) -> EngineResult<()> {
        blocking_rw!(self.db, |rw: &transaction::RwTransaction| {
            rw.insert(event.clone())
                .map_err(|e| raise_error!(format!("{e:?}"), ErrorCode::InternalError))?;
            Ok(())
        })
    }
}
