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

//! The data model (spec.md 3): one entity per persisted record, expressed
//! as `native_db` models the same way the base project versions its
//! `AccountV1`/`V2`/`V3` chain. Each entity here starts at version 1 since
//! none of them existed before this schema.

use std::collections::BTreeMap;

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// One of the seven buckets the classifier assigns every message to
/// (spec.md 4.2), in strict priority order from most to least specific.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Category {
    Bounce,
    Transactional,
    Notification,
    Newsletter,
    Marketing,
    Human,
    #[default]
    Unknown,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Bounce => "BOUNCE",
            Category::Transactional => "TRANSACTIONAL",
            Category::Notification => "NOTIFICATION",
            Category::Newsletter => "NEWSLETTER",
            Category::Marketing => "MARKETING",
            Category::Human => "HUMAN",
            Category::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Severity of a bounce, derived from its SMTP status code or, failing
/// that, from body heuristics (spec.md 4.4).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum BounceType {
    Hard,
    Soft,
    #[default]
    Unknown,
}

impl std::fmt::Display for BounceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BounceType::Hard => "HARD",
            BounceType::Soft => "SOFT",
            BounceType::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Health of a mailbox's last sync cycle (spec.md 3, 4.6). `Disabled` is a
/// terminal, user-set state: the coordinator never syncs a disabled
/// mailbox and never transitions it back to `Active` on its own.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum MailboxStatus {
    #[default]
    Active,
    Error,
    Disabled,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ImapEncryption {
    Tls,
    StartTls,
    None,
}

/// IMAP connection parameters for one mailbox. `encrypted_password` is
/// ciphertext produced by whatever scheme sits in front of this engine
/// (spec.md 6.1); the engine only calls [`crate::modules::crypto::decrypt_string`]
/// on it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub encryption: ImapEncryption,
    pub username: String,
    pub encrypted_password: String,
}

/// A mailbox under sync (spec.md 3, 4.6). `last_synced_uid` is the
/// checkpoint: the highest UID known to be durably persisted. It only ever
/// moves forward, and only past UIDs that were actually written (P2, S5).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[native_model(id = 100, version = 1)]
#[native_db(primary_key(pk -> u64))]
pub struct Mailbox {
    #[secondary_key(unique)]
    pub id: u64,
    pub user_id: u64,
    pub imap: ImapConfig,
    pub folder_name: String,
    pub uid_validity: Option<u32>,
    pub last_synced_uid: u32,
    pub last_synced_at: Option<i64>,
    pub status: MailboxStatus,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Mailbox {
    fn pk(&self) -> u64 {
        self.id
    }
}

/// A normalized, persisted message record (spec.md 3, 4.5). Uniqueness is
/// enforced on `(mailbox_id, uid)` and `(mailbox_id, message_id)` (I1).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[native_model(id = 101, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Email {
    #[secondary_key(unique)]
    pub mailbox_uid_key: String,
    #[secondary_key(unique)]
    pub mailbox_message_id_key: String,
    pub user_id: u64,
    pub mailbox_id: u64,
    pub uid: u32,
    pub message_id: String,
    pub message_id_synthesized: bool,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub category: Category,
    pub confidence: f32,
    #[secondary_key]
    pub thread_id: String,
    pub body_preview: String,
    pub has_attachments: bool,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub received_at: i64,
    pub size_bytes: usize,
    pub headers: BTreeMap<String, String>,
    pub created_at: i64,
}

impl Email {
    fn pk(&self) -> String {
        Self::uid_key(self.mailbox_id, self.uid)
    }

    pub fn uid_key(mailbox_id: u64, uid: u32) -> String {
        format!("{mailbox_id}:{uid}")
    }

    pub fn message_id_key(mailbox_id: u64, message_id: &str) -> String {
        format!("{mailbox_id}:{message_id}")
    }
}

/// A conversation thread within a mailbox (spec.md 3, 4.3). `first_message_at`
/// is set once at creation and never mutated again; every other aggregate
/// field is recomputed from the full set of member emails after each insert
/// (I4).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[native_model(id = 102, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Thread {
    #[secondary_key(unique)]
    pub id: String,
    pub user_id: u64,
    pub mailbox_id: u64,
    pub subject: String,
    #[secondary_key]
    pub normalized_subject: String,
    pub participants: Vec<String>,
    pub message_count: u32,
    pub first_message_at: i64,
    pub last_message_at: i64,
    pub is_unread: bool,
    pub is_archived: bool,
    pub created_at: i64,
}

impl Thread {
    fn pk(&self) -> String {
        self.id.clone()
    }
}

/// Per-recipient rollup of bounce activity within a mailbox (spec.md 3,
/// 4.4, 4.5, I4/I5). One row per `(user_id, mailbox_id, email)`, created
/// from the first bounce seen for that recipient; `bounce_type`/`error_code`/
/// `reason` reflect that first bounce, while `failure_count` increments and
/// `last_failed_at` advances on every subsequent one.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[native_model(id = 103, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct BounceAggregate {
    #[secondary_key(unique)]
    pub id: String,
    pub user_id: u64,
    pub mailbox_id: u64,
    pub email: String,
    pub bounce_type: BounceType,
    pub error_code: String,
    pub reason: String,
    pub failure_count: u32,
    pub first_failed_at: i64,
    pub last_failed_at: i64,
}

impl BounceAggregate {
    fn pk(&self) -> String {
        self.id.clone()
    }

    pub fn key(mailbox_id: u64, recipient: &str) -> String {
        format!("{mailbox_id}:{}", recipient.to_lowercase())
    }
}

/// One immutable bounce observation (I1: the event log has at most one row
/// per processed bounce message; it is never rewritten or deleted).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[native_model(id = 104, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct BounceEvent {
    #[secondary_key(unique)]
    pub id: String,
    #[secondary_key]
    pub bounce_id: String,
    pub user_id: u64,
    pub mailbox_id: u64,
    pub message_uid: u32,
    pub error_code: String,
    pub diagnostic: String,
    pub bounce_type: BounceType,
    pub occurred_at: i64,
}

impl BounceEvent {
    fn pk(&self) -> String {
        self.id.clone()
    }
}
