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

//! Per-cycle message retrieval (spec.md 4.1): select the folder, build the
//! `UID SEARCH` criteria from the checkpoint and recency bound, stream
//! matching sources in UID-ascending order, and stop once `batch_size`
//! messages have been emitted.

use chrono::{Duration as ChronoDuration, Utc};
use futures::TryStreamExt;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::imap::connection::{self, with_socket_timeout, ImapSession};
use crate::modules::model::Mailbox;
use crate::modules::raw::RawMessage;
use crate::raise_error;

/// Bounds applied to a single fetch call, drawn from `SETTINGS` by the
/// coordinator (spec.md 6.2).
#[derive(Clone, Copy, Debug)]
pub struct FetchOptions {
    pub batch_size: u32,
    pub since_days: u32,
}

/// Opens one connection, selects `mailbox.folder_name`, and streams up to
/// `options.batch_size` messages newer than `mailbox.last_synced_uid` in
/// UID-ascending order. Unparseable messages are skipped, not failed
/// (spec.md 4.1 step 7, edge case: malformed message); the fetcher itself
/// performs no database I/O.
pub async fn fetch(
    mailbox: &Mailbox,
    password: &str,
    options: FetchOptions,
) -> EngineResult<Vec<RawMessage>> {
    let mut session = connection::connect(&mailbox.imap, password).await?;
    let result = fetch_with_session(&mut session, mailbox, options).await;

    // Best-effort logout regardless of how the fetch went; the connection
    // is never reused across cycles.
    let _ = with_socket_timeout(session.logout()).await;
    result
}

async fn fetch_with_session(
    session: &mut ImapSession,
    mailbox: &Mailbox,
    options: FetchOptions,
) -> EngineResult<Vec<RawMessage>> {
    with_socket_timeout(session.examine(&mailbox.folder_name))
        .await
        .map_err(|e| {
            raise_error!(
                format!("EXAMINE {} failed: {e}", mailbox.folder_name),
                ErrorCode::ImapCommandFailed
            )
        })?;

    let query = search_query(mailbox.last_synced_uid, options.since_days);
    let uid_set = with_socket_timeout(session.uid_search(&query)).await?;
    let mut uids: Vec<u32> = uid_set.into_iter().filter(|uid| *uid > mailbox.last_synced_uid).collect();
    uids.sort_unstable();
    uids.truncate(options.batch_size as usize);

    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let sequence = uids
        .iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut messages = Vec::with_capacity(uids.len());
    let mut stream = with_socket_timeout(session.uid_fetch(&sequence, "(UID BODY.PEEK[])")).await?;
    while let Some(fetched) = with_socket_timeout(stream.try_next()).await? {
        let Some(uid) = fetched.uid else { continue };
        let Some(body) = fetched.body() else { continue };
        match RawMessage::parse(mailbox.user_id, mailbox.id, uid, body) {
            Some(message) => messages.push(message),
            None => tracing::warn!(
                mailbox_id = mailbox.id,
                uid,
                "skipping unparseable message body"
            ),
        }
    }
    drop(stream);

    messages.sort_by_key(|m| m.uid);
    Ok(messages)
}

/// Builds the `UID SEARCH` criteria string (spec.md 4.1 steps 4-5, B1):
/// never a bare `UID >0` range on first sync, always anchored by
/// `SINCE <DD-Mon-YYYY>`.
fn search_query(last_synced_uid: u32, since_days: u32) -> String {
    let since_date = (Utc::now() - ChronoDuration::days(since_days as i64))
        .format("%d-%b-%Y")
        .to_string();
    if last_synced_uid > 0 {
        format!("UID {}:* SINCE {since_date}", last_synced_uid + 1)
    } else {
        format!("SINCE {since_date}")
    }
}
