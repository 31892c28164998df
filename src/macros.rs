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

/// Builds an [`crate::modules::error::EngineError::Generic`] at the call site,
/// capturing file/line via snafu's implicit `Location`.
#[macro_export]
macro_rules! raise_error {
    ($message:expr, $code:expr) => {
        $crate::modules::error::EngineError::Generic {
            message: $message,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

/// Current unix timestamp in milliseconds, the timebase every entity's
/// `created_at`/`updated_at` and every bounce event's `occurred_at` uses.
#[macro_export]
macro_rules! utc_now {
    () => {
        chrono::Utc::now().timestamp_millis()
    };
}

/// Generates a random identifier with the given bit width (64 or 128),
/// used for primary keys that aren't derived from mailbox/UID.
#[macro_export]
macro_rules! id {
    (64) => {{
        use rand::Rng;
        rand::rng().random::<u64>()
    }};
    (128) => {{
        use rand::Rng;
        rand::rng().random::<u128>()
    }};
}
