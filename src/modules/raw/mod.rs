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

//! The parsed-but-not-yet-classified form of a fetched message (spec.md 4.1
//! step 7), the common input every downstream component (classifier,
//! thread resolver, bounce parser) reads from instead of re-parsing MIME.

use gethostname::gethostname;
use mail_parser::{Message, MessageParser, MimeHeaders};

use crate::utc_now;

/// A single fetched message, normalized out of its raw RFC 5322 bytes.
/// Header lookups are case-insensitive per spec.md 9; `to`/`cc`/`bcc` are
/// always flattened to a list of address strings regardless of whether the
/// original header was a single mailbox or a group.
#[derive(Clone, Debug, Default)]
pub struct RawMessage {
    pub user_id: u64,
    pub mailbox_id: u64,
    pub uid: u32,
    pub message_id: String,
    pub message_id_synthesized: bool,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from: Option<String>,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    /// Envelope date, or the time of parsing when absent (spec.md 4.1 step 7).
    pub received_at: i64,
    pub list_unsubscribe: Option<String>,
    pub list_post: Option<String>,
    pub list_id: Option<String>,
    pub precedence: Option<String>,
    pub auto_submitted: Option<String>,
    pub content_type: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub has_attachments: bool,
    pub size_bytes: usize,
    pub raw_headers: Vec<(String, String)>,
}

impl RawMessage {
    /// Parses a RFC 5322 byte stream fetched for `uid` in `mailbox_id` into
    /// a [`RawMessage`]. Returns `None` on unparseable bytes, which the
    /// fetcher treats as a per-message error and skips (spec.md 4.1, edge
    /// case: malformed message).
    pub fn parse(user_id: u64, mailbox_id: u64, uid: u32, bytes: &[u8]) -> Option<Self> {
        let message = MessageParser::default().parse(bytes)?;
        Some(Self::from_parsed(user_id, mailbox_id, uid, bytes.len(), &message))
    }

    fn from_parsed(
        user_id: u64,
        mailbox_id: u64,
        uid: u32,
        size_bytes: usize,
        message: &Message<'_>,
    ) -> Self {
        let (message_id, synthesized) = match message.message_id() {
            Some(id) if !id.trim().is_empty() => (id.to_string(), false),
            _ => (
                format!("<{uid}@{}>", gethostname().to_string_lossy()),
                true,
            ),
        };

        let in_reply_to = message.in_reply_to().as_text().map(|s| s.to_string());

        let references = match message.references() {
            mail_parser::HeaderValue::Text(text) => vec![text.to_string()],
            mail_parser::HeaderValue::TextList(list) => {
                list.iter().map(|s| s.to_string()).collect()
            }
            _ => Vec::new(),
        };

        let subject = message.subject().unwrap_or_default().to_string();
        let from_addr = message.from().and_then(|a| a.first());
        let from = from_addr.and_then(|a| a.address()).map(|s| s.to_string());
        let from_name = from_addr.and_then(|a| a.name()).map(|s| s.to_string());
        let to = Self::flatten_addresses(message.to());
        let cc = Self::flatten_addresses(message.cc());
        let bcc = Self::flatten_addresses(message.bcc());
        let reply_to = message
            .reply_to()
            .and_then(|a| a.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());
        let received_at = message.date().map(|d| d.to_timestamp() * 1000).unwrap_or_else(|| utc_now!());
        let has_attachments = message.attachments().next().is_some();

        let raw_headers = message
            .headers()
            .iter()
            .map(|h| {
                (
                    h.name().to_string(),
                    h.value().as_text().unwrap_or_default().to_string(),
                )
            })
            .collect();

        Self {
            user_id,
            mailbox_id,
            uid,
            message_id,
            message_id_synthesized: synthesized,
            in_reply_to,
            references,
            subject,
            from,
            from_name,
            to,
            cc,
            bcc,
            reply_to,
            received_at,
            list_unsubscribe: message
                .header("List-Unsubscribe")
                .and_then(|h| h.as_text())
                .map(|s| s.to_string()),
            list_post: message
                .header("List-Post")
                .and_then(|h| h.as_text())
                .map(|s| s.to_string()),
            list_id: message
                .header("List-Id")
                .and_then(|h| h.as_text())
                .map(|s| s.to_string()),
            precedence: message
                .header("Precedence")
                .and_then(|h| h.as_text())
                .map(|s| s.to_string()),
            auto_submitted: message
                .header("Auto-Submitted")
                .and_then(|h| h.as_text())
                .map(|s| s.to_string()),
            content_type: message.content_type().map(|c| {
                format!(
                    "{}/{}",
                    c.c_type.as_ref(),
                    c.c_subtype.as_deref().unwrap_or("")
                )
            }),
            body_text: message.body_text(0).map(|c| c.into_owned()),
            body_html: message.body_html(0).map(|c| c.into_owned()),
            has_attachments,
            size_bytes,
            raw_headers,
        }
    }

    fn flatten_addresses(addr: Option<&mail_parser::Address<'_>>) -> Vec<String> {
        match addr {
            Some(mail_parser::Address::List(list)) => {
                list.iter().filter_map(|a| a.address()).map(|s| s.to_string()).collect()
            }
            Some(mail_parser::Address::Group(groups)) => groups
                .iter()
                .flat_map(|g| g.addresses.iter())
                .filter_map(|a| a.address())
                .map(|s| s.to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Case-insensitive header lookup against the raw header list, used by
    /// the classifier and bounce parser for headers not promoted to a
    /// dedicated field.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
