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

//! Persistence of a single classified message (spec.md 4.5): dedup guard,
//! Email insert, post-insert thread aggregate recompute, and — for
//! bounces — the per-recipient aggregate plus an immutable event.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::modules::bounce;
use crate::modules::classifier::Confidence;
use crate::modules::error::EngineResult;
use crate::modules::model::{BounceAggregate, BounceEvent, Category, Email};
use crate::modules::raw::RawMessage;
use crate::modules::store::Store;
use crate::modules::thread;
use crate::{id, utc_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// Already present under `(mailbox_id, uid)` or `(mailbox_id,
    /// message_id)` — a no-op re-run of an already-persisted message (P7).
    AlreadyPresent,
}

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const BODY_PREVIEW_MAX_LEN: usize = 300;

/// Persists `message`, already assigned `category`/`confidence` by the
/// classifier. Idempotent: re-persisting the same `(mailbox_id, uid)` or
/// `(mailbox_id, message_id)` is a no-op (P7), so the coordinator can
/// safely retry a batch that partially succeeded.
pub async fn persist_message(
    message: &RawMessage,
    category: Category,
    confidence: Confidence,
    store: &dyn Store,
) -> EngineResult<PersistOutcome> {
    if store
        .find_email(message.mailbox_id, message.uid)
        .await?
        .is_some()
    {
        return Ok(PersistOutcome::AlreadyPresent);
    }
    if store
        .find_email_by_message_id(message.mailbox_id, &message.message_id)
        .await?
        .is_some()
    {
        return Ok(PersistOutcome::AlreadyPresent);
    }

    let thread_id = thread::resolve(message.user_id, message, store).await?;

    let email = Email {
        mailbox_uid_key: Email::uid_key(message.mailbox_id, message.uid),
        mailbox_message_id_key: Email::message_id_key(message.mailbox_id, &message.message_id),
        user_id: message.user_id,
        mailbox_id: message.mailbox_id,
        uid: message.uid,
        message_id: message.message_id.clone(),
        message_id_synthesized: message.message_id_synthesized,
        in_reply_to: message.in_reply_to.clone(),
        references: message.references.clone(),
        subject: message.subject.clone(),
        from_address: message.from.as_deref().map(str::to_lowercase),
        from_name: from_name(message),
        to_addresses: normalize_addresses(&message.to),
        cc_addresses: normalize_addresses(&message.cc),
        bcc_addresses: normalize_addresses(&message.bcc),
        category,
        confidence,
        thread_id: thread_id.clone(),
        body_preview: body_preview(message),
        has_attachments: message.has_attachments,
        is_read: false,
        is_starred: false,
        is_archived: false,
        received_at: message.received_at,
        size_bytes: message.size_bytes,
        headers: raw_header_map(message),
        created_at: utc_now!(),
    };
    store.insert_email(email).await?;

    // Thread aggregates are recomputed from the full member set strictly
    // after this insert succeeds (spec.md 4.3 post-persist update, I4): a
    // failure above this line leaves no trace, so the thread is never
    // corrupted by a message that was never actually recorded.
    thread::recompute_aggregate(&thread_id, store).await?;

    if category == Category::Bounce {
        persist_bounce(message, store).await?;
    }

    Ok(PersistOutcome::Inserted)
}

fn from_name(message: &RawMessage) -> Option<String> {
    if let Some(name) = &message.from_name {
        if !name.trim().is_empty() {
            return Some(name.clone());
        }
    }
    message
        .from
        .as_deref()
        .and_then(|addr| addr.split('@').next())
        .map(str::to_string)
}

fn normalize_addresses(addrs: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for addr in addrs {
        let lower = addr.to_lowercase();
        if seen.insert(lower.clone()) {
            out.push(lower);
        }
    }
    out
}

fn body_preview(message: &RawMessage) -> String {
    let source = message
        .body_text
        .as_deref()
        .or(message.body_html.as_deref())
        .unwrap_or_default();
    let without_tags = HTML_TAG.replace_all(source, " ");
    let collapsed = WHITESPACE.replace_all(without_tags.trim(), " ");
    collapsed.chars().take(BODY_PREVIEW_MAX_LEN).collect()
}

fn raw_header_map(message: &RawMessage) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in &message.raw_headers {
        map.entry(name.clone()).or_insert_with(|| value.clone());
    }
    map
}

async fn persist_bounce(message: &RawMessage, store: &dyn Store) -> EngineResult<()> {
    let Some(parsed) = bounce::parse(message) else {
        debug!(
            mailbox_id = message.mailbox_id,
            uid = message.uid,
            "bounce message did not yield a usable recipient (BounceUnparseable)"
        );
        return Ok(());
    };

    let now = utc_now!();
    let bounce_id = match store
        .find_bounce(message.user_id, message.mailbox_id, &parsed.failed_recipient)
        .await?
    {
        Some(existing) => {
            store.increment_bounce_failure(&existing.id, now).await?;
            existing.id
        }
        None => {
            let id = BounceAggregate::key(message.mailbox_id, &parsed.failed_recipient);
            let aggregate = BounceAggregate {
                id: id.clone(),
                user_id: message.user_id,
                mailbox_id: message.mailbox_id,
                email: parsed.failed_recipient.clone(),
                bounce_type: parsed.bounce_type,
                error_code: parsed.error_code.clone(),
                reason: parsed.diagnostic.clone(),
                failure_count: 1,
                first_failed_at: now,
                last_failed_at: now,
            };
            store.insert_bounce(aggregate).await?;
            id
        }
    };

    let event = BounceEvent {
        id: format!("{bounce_id}:{:x}", id!(64)),
        bounce_id,
        user_id: message.user_id,
        mailbox_id: message.mailbox_id,
        message_uid: message.uid,
        error_code: parsed.error_code,
        diagnostic: parsed.diagnostic,
        bounce_type: parsed.bounce_type,
        occurred_at: now,
    };
    store.insert_bounce_event(event).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::memory::MemoryStore;

    fn message(uid: u32) -> RawMessage {
        RawMessage {
            user_id: 1,
            mailbox_id: 1,
            uid,
            message_id: format!("<{uid}@example.com>"),
            subject: "hello".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repersisting_same_uid_is_a_no_op() {
        let store = MemoryStore::new();
        let msg = message(1);
        let first = persist_message(&msg, Category::Human, 0.5, &store).await.unwrap();
        let second = persist_message(&msg, Category::Human, 0.5, &store).await.unwrap();
        assert_eq!(first, PersistOutcome::Inserted);
        assert_eq!(second, PersistOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn repersisting_same_message_id_under_new_uid_is_a_no_op() {
        let store = MemoryStore::new();
        let msg = message(1);
        persist_message(&msg, Category::Human, 0.5, &store).await.unwrap();
        let mut moved = message(2);
        moved.message_id = msg.message_id.clone();
        let outcome = persist_message(&moved, Category::Human, 0.5, &store).await.unwrap();
        assert_eq!(outcome, PersistOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn bounce_message_creates_aggregate_and_event() {
        let store = MemoryStore::new();
        let mut msg = message(1);
        msg.from = Some("mailer-daemon@example.com".into());
        msg.subject = "Undelivered Mail Returned to Sender".into();
        msg.body_text = Some(
            "Final-Recipient: rfc822; jane@example.com\nStatus: 5.1.1\n550 5.1.1 user unknown"
                .to_string(),
        );
        persist_message(&msg, Category::Bounce, 1.0, &store).await.unwrap();
        let aggregate = store
            .find_bounce(1, 1, "jane@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.failure_count, 1);
        assert_eq!(aggregate.error_code, "550");
    }

    #[tokio::test]
    async fn second_bounce_for_same_recipient_increments_failure_count() {
        let store = MemoryStore::new();
        let mut first = message(1);
        first.body_text = Some("Final-Recipient: rfc822; jane@example.com\n550 user unknown".into());
        persist_message(&first, Category::Bounce, 1.0, &store).await.unwrap();

        let mut second = message(2);
        second.body_text = Some("Final-Recipient: rfc822; jane@example.com\n550 user unknown".into());
        persist_message(&second, Category::Bounce, 1.0, &store).await.unwrap();

        let aggregate = store
            .find_bounce(1, 1, "jane@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.failure_count, 2);
    }

    #[tokio::test]
    async fn body_preview_strips_html_and_truncates() {
        let store = MemoryStore::new();
        let mut msg = message(1);
        msg.body_html = Some("<p>Hello <b>world</b></p>".into());
        persist_message(&msg, Category::Human, 0.7, &store).await.unwrap();
        let email = store.find_email(1, 1).await.unwrap().unwrap();
        assert_eq!(email.body_preview, "Hello world");
    }
}
