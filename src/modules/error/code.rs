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

/// Stable numeric codes attached to every [`super::EngineError`], grouped by
/// the component that raises them (no HTTP surface in this crate).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // Configuration / input errors (10000-10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10020,

    // Credential errors (20000-20999)
    CredentialDecryptionFailed = 20000,

    // Resource errors (30000-30999)
    ResourceNotFound = 30000,

    // IMAP / network errors (40000-40999)
    ImapConnectTimeout = 40000,
    ImapGreetingTimeout = 40010,
    ImapSocketTimeout = 40030,
    ImapAuthenticationFailed = 40040,
    ImapCommandFailed = 40050,
    ImapUnexpectedResult = 40060,

    // Store errors (50000-50999)
    StoreUniqueViolation = 50000,
    StoreUnavailable = 50010,

    // Message processing errors (60000-60999)
    MessageParseFailed = 60000,
    BounceUnparseable = 60010,

    // Internal errors (70000-70999)
    InternalError = 70000,
    IoError = 70010,
}

/// Which arm of the spec.md 7 propagation policy an error falls into,
/// driving how the coordinator reacts to it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    /// Mark the mailbox ERROR, end the cycle without advancing the checkpoint.
    Fatal,
    /// Abort the current cycle; the checkpoint reflects only persisted UIDs.
    Transient,
    /// Log and skip this one message; the checkpoint does not pass its UID.
    PerMessage,
}

impl ErrorCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::ImapAuthenticationFailed | ErrorCode::CredentialDecryptionFailed => {
                ErrorCategory::Fatal
            }
            ErrorCode::ImapConnectTimeout
            | ErrorCode::ImapGreetingTimeout
            | ErrorCode::ImapSocketTimeout
            | ErrorCode::ImapCommandFailed
            | ErrorCode::ImapUnexpectedResult
            | ErrorCode::StoreUnavailable
            | ErrorCode::IoError => ErrorCategory::Transient,
            ErrorCode::MessageParseFailed
            | ErrorCode::BounceUnparseable
            | ErrorCode::StoreUniqueViolation
            | ErrorCode::InvalidParameter
            | ErrorCode::MissingConfiguration
            | ErrorCode::ResourceNotFound
            | ErrorCode::InternalError => ErrorCategory::PerMessage,
        }
    }
}
