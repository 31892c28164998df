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

//! Conversation thread assignment (spec.md 4.3): `In-Reply-To` lookup,
//! then `References`, then a normalized-subject match within a 7-day
//! window, falling back to a brand new thread. The thread's aggregate
//! fields (`message_count`, `last_message_at`, `participants`, `is_unread`)
//! are never mutated here; [`recompute_aggregate`] is called by the
//! persister strictly after the triggering Email row is durably inserted,
//! so a failure between resolution and insert never leaves a thread with
//! a count that doesn't match its members (I4).

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::id;
use crate::modules::error::EngineResult;
use crate::modules::model::Thread;
use crate::modules::raw::RawMessage;
use crate::modules::store::Store;
use crate::utc_now;

const THREAD_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;
const MIN_NORMALIZED_SUBJECT_LEN: usize = 5;

static REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(re|fwd?|fw)\s*:\s*").unwrap());
static EXTERNAL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\[external\]\s*").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strips repeated `Re:`/`Fwd:`/`Fw:` prefixes and a leading `[External]`
/// tag, collapses internal whitespace, and lowercases the result. Applying
/// this twice is a no-op (L1), and two subjects differing only in
/// reply/forward prefixes and casing normalize to the same string (L2).
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim().to_string();
    loop {
        let stripped_tag = EXTERNAL_TAG.replace(&s, "").into_owned();
        let stripped = REPLY_PREFIX.replace(&stripped_tag, "").into_owned();
        if stripped == s {
            break;
        }
        s = stripped;
    }
    let s = WHITESPACE.replace_all(s.trim(), " ");
    s.to_lowercase()
}

/// Resolves `message` to a thread id, creating a new [`Thread`] row via
/// `store` if none of the lookups match (spec.md 4.3). Idempotent:
/// resolving the same message twice returns the same id, provided the
/// first resolution was persisted.
pub async fn resolve(user_id: u64, message: &RawMessage, store: &dyn Store) -> EngineResult<String> {
    if let Some(in_reply_to) = &message.in_reply_to {
        if let Some(parent) = store
            .find_email_by_message_id(message.mailbox_id, in_reply_to)
            .await?
        {
            return Ok(parent.thread_id);
        }
    }

    if !message.references.is_empty() {
        let matches = store
            .find_emails_by_message_ids(message.mailbox_id, &message.references)
            .await?;
        // References is ordered oldest-to-newest; the last entry is the
        // immediate parent, so prefer it when more than one matches.
        for reference in message.references.iter().rev() {
            if let Some(parent) = matches.iter().find(|e| &e.message_id == reference) {
                return Ok(parent.thread_id.clone());
            }
        }
    }

    let normalized = normalize_subject(&message.subject);
    let received_at = message.received_at;
    if normalized.len() > MIN_NORMALIZED_SUBJECT_LEN {
        if let Some(existing) = store
            .find_thread_by_normalized_subject(
                message.mailbox_id,
                &normalized,
                received_at - THREAD_WINDOW_SECS * 1000,
            )
            .await?
        {
            return Ok(existing.id);
        }
    }

    let subject = if message.subject.trim().is_empty() {
        "(No Subject)".to_string()
    } else {
        message.subject.clone()
    };
    let participants = thread_participants(message);

    let thread_id = format!("{}-{:x}", message.mailbox_id, id!(64));
    let thread = Thread {
        id: thread_id.clone(),
        user_id,
        mailbox_id: message.mailbox_id,
        subject,
        normalized_subject: normalized,
        participants,
        message_count: 1,
        first_message_at: received_at,
        last_message_at: received_at,
        is_unread: true,
        is_archived: false,
        created_at: utc_now!(),
    };
    store.insert_thread(thread).await?;
    Ok(thread_id)
}

fn thread_participants(message: &RawMessage) -> Vec<String> {
    let mut set = BTreeSet::new();
    if let Some(from) = &message.from {
        set.insert(from.to_lowercase());
    }
    for addr in message.to.iter().chain(message.cc.iter()) {
        set.insert(addr.to_lowercase());
    }
    set.into_iter().collect()
}

/// Recomputes `message_count`, `last_message_at`, `participants`, and
/// `is_unread` for `thread_id` from the full set of its member emails
/// (spec.md 4.3 post-persist update, I4). Never touches `first_message_at`.
pub async fn recompute_aggregate(thread_id: &str, store: &dyn Store) -> EngineResult<()> {
    let emails = store.list_emails_in_thread(thread_id).await?;
    if emails.is_empty() {
        return Ok(());
    }

    let message_count = emails.len() as u32;
    let last_message_at = emails.iter().map(|e| e.received_at).max().unwrap_or(0);
    let is_unread = emails.iter().any(|e| !e.is_read);

    let mut participants = BTreeSet::new();
    for email in &emails {
        if let Some(from) = &email.from_address {
            participants.insert(from.to_lowercase());
        }
        for addr in email.to_addresses.iter().chain(email.cc_addresses.iter()) {
            participants.insert(addr.to_lowercase());
        }
    }

    store
        .update_thread_aggregate(
            thread_id,
            message_count,
            last_message_at,
            participants.into_iter().collect(),
            is_unread,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_repeated_reply_and_forward_prefixes() {
        assert_eq!(
            normalize_subject("Re: Fwd: RE: Hello there"),
            normalize_subject("Hello there")
        );
    }

    #[test]
    fn strips_external_tag() {
        assert_eq!(
            normalize_subject("[External] Re: Quarterly report"),
            normalize_subject("Quarterly report")
        );
    }

    #[test]
    fn collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_subject("  Hello   World  "), "hello world");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_subject("Re: Re: Hi");
        assert_eq!(normalize_subject(&once), once);
    }
}
