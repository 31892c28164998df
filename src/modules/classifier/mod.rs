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

//! Pure message classification (spec.md 4.2). `classify` never touches the
//! network or the store; it is a total function of a [`RawMessage`],
//! evaluated in strict priority order so that a message matching more than
//! one bucket's surface pattern always lands in the highest-priority one.

use std::sync::LazyLock;

use regex::Regex;

use crate::modules::model::Category;
use crate::modules::raw::RawMessage;

static BOUNCE_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(mailer-daemon|postmaster|mail-daemon)").unwrap()
});

static BOUNCE_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(undelivered|failure notice|returned mail|delivery status notification|mail delivery failed|undeliverable|bounce|permanent error|delivery failure)").unwrap()
});

static TRANSACTIONAL_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(noreply@|no-reply@|notifications?@|notify@|support@|security@|billing@|invoices?@|receipts?@|orders?@|accounts?@|team@)").unwrap()
});

static TRANSACTIONAL_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password reset|reset your password|verify your email|confirm your email|email verification|order confirmation|order #\d+|receipt|invoice|payment received|subscription|welcome to|account created|security alert|suspicious activity)").unwrap()
});

static NOTIFICATION_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(notifications?@|alerts?@|updates?@|activity@|digest@)").unwrap()
});

static NOTIFICATION_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(activity on|you have \d+ new|new (comment|reply|message|mention)|reminder:|upcoming|(daily|weekly|monthly) (summary|digest|report)|someone (liked|commented|shared)|\d+ new notification)").unwrap()
});

static NEWSLETTER_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(newsletter|weekly roundup|this week in|edition #\d+|volume \d+)").unwrap()
});

static MARKETING_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(sale|\d+% off|discount|limited time|exclusive offer|deal of the day|free shipping|(buy|shop) now|don't miss|last chance|special offer|promotion)").unwrap()
});

static HUMAN_FROM_NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(noreply|no-reply|notifications|alert|updates|newsletter|marketing|info|support)").unwrap()
});

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://").unwrap());

/// How strongly the matched rule signals its category, on a 0.0-1.0 scale.
pub type Confidence = f32;

/// Assigns `message` to exactly one [`Category`], evaluated BOUNCE >
/// TRANSACTIONAL > NOTIFICATION > NEWSLETTER > MARKETING > HUMAN > UNKNOWN
/// (spec.md 4.2), first match wins.
pub fn classify(message: &RawMessage) -> (Category, Confidence) {
    let from = message.from.as_deref().unwrap_or_default();
    let has_list_unsubscribe = message.list_unsubscribe.is_some();
    let has_list_post = message.list_post.is_some();
    let has_list_id = message.list_id.is_some();

    if BOUNCE_FROM.is_match(from) || BOUNCE_SUBJECT.is_match(&message.subject) {
        return (Category::Bounce, 1.00);
    }

    if (TRANSACTIONAL_FROM.is_match(from) || TRANSACTIONAL_SUBJECT.is_match(&message.subject))
        && !has_list_unsubscribe
    {
        return (Category::Transactional, 0.90);
    }

    if NOTIFICATION_FROM.is_match(from) || NOTIFICATION_SUBJECT.is_match(&message.subject) {
        return (Category::Notification, 0.85);
    }

    if (has_list_unsubscribe && has_list_post) || NEWSLETTER_SUBJECT.is_match(&message.subject) {
        return (Category::Newsletter, 0.75);
    }

    if has_list_unsubscribe || (MARKETING_SUBJECT.is_match(&message.subject) && url_count(message) > 5) {
        return (Category::Marketing, 0.80);
    }

    let recipient_count = message.to.len() + message.cc.len();
    let has_personal_reply_to = message.reply_to.is_some();
    if !HUMAN_FROM_NEGATIVE.is_match(from)
        && (has_personal_reply_to || recipient_count == 1)
        && !has_list_unsubscribe
        && !has_list_id
    {
        return (Category::Human, 0.70);
    }

    (Category::Unknown, 0.00)
}

fn url_count(message: &RawMessage) -> usize {
    let text = message.body_text.as_deref().unwrap_or_default();
    let html = message.body_html.as_deref().unwrap_or_default();
    URL.find_iter(text).count() + URL.find_iter(html).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RawMessage {
        RawMessage {
            mailbox_id: 1,
            uid: 1,
            message_id: "<1@example.com>".into(),
            ..Default::default()
        }
    }

    #[test]
    fn bounce_from_mailer_daemon_wins() {
        let mut m = base();
        m.from = Some("mailer-daemon@example.com".into());
        m.subject = "Undeliverable: Your order confirmation".into();
        assert_eq!(classify(&m).0, Category::Bounce);
    }

    #[test]
    fn bounce_from_mail_daemon_literal() {
        let mut m = base();
        m.from = Some("mail-daemon@example.com".into());
        assert_eq!(classify(&m).0, Category::Bounce);
    }

    #[test]
    fn bounce_subject_literal_keywords() {
        for subject in [
            "Your message bounced",
            "Permanent error",
            "Delivery failure notice",
        ] {
            let mut m = base();
            m.subject = subject.into();
            assert_eq!(classify(&m).0, Category::Bounce, "subject: {subject}");
        }
    }

    #[test]
    fn transactional_password_reset() {
        let mut m = base();
        m.subject = "Reset your password".into();
        assert_eq!(classify(&m).0, Category::Transactional);
    }

    #[test]
    fn transactional_from_set() {
        let mut m = base();
        m.from = Some("receipts@store.example".into());
        m.subject = "Your recent purchase".into();
        assert_eq!(classify(&m).0, Category::Transactional);
    }

    #[test]
    fn transactional_suppressed_by_list_unsubscribe() {
        let mut m = base();
        m.subject = "Reset your password".into();
        m.list_unsubscribe = Some("<mailto:unsub@example.com>".into());
        assert_ne!(classify(&m).0, Category::Transactional);
    }

    #[test]
    fn notification_from_set() {
        let mut m = base();
        m.from = Some("alerts@service.example".into());
        assert_eq!(classify(&m).0, Category::Notification);
    }

    #[test]
    fn newsletter_requires_list_id_and_list_post() {
        let mut m = base();
        m.subject = "This week's roundup".into();
        m.list_id = Some("<weekly.example.com>".into());
        m.list_unsubscribe = Some("<mailto:unsub@example.com>".into());
        m.list_post = Some("<mailto:list@example.com>".into());
        assert_eq!(classify(&m).0, Category::Newsletter);
    }

    #[test]
    fn newsletter_by_subject_alone() {
        let mut m = base();
        m.subject = "Our monthly newsletter".into();
        assert_eq!(classify(&m).0, Category::Newsletter);
    }

    #[test]
    fn marketing_beats_transactional_when_list_unsubscribe_present() {
        let mut m = base();
        m.from = Some("noreply@store.example".into());
        m.subject = "Your order confirmation".into();
        m.list_unsubscribe = Some("<mailto:unsub@example.com>".into());
        assert_eq!(classify(&m).0, Category::Marketing);
    }

    #[test]
    fn marketing_subject_needs_more_than_five_urls() {
        let mut m = base();
        m.subject = "Big sale this weekend".into();
        m.body_text = Some("one link http://a.example".into());
        assert_ne!(classify(&m).0, Category::Marketing);

        let mut m = base();
        m.subject = "Big sale this weekend".into();
        m.body_text = Some(
            "http://a.example http://b.example http://c.example http://d.example \
             http://e.example http://f.example"
                .into(),
        );
        assert_eq!(classify(&m).0, Category::Marketing);
    }

    #[test]
    fn human_is_the_fallback_for_plain_mail() {
        let mut m = base();
        m.from = Some("friend@example.com".into());
        m.to = vec!["me@example.com".into()];
        m.subject = "Dinner on Friday?".into();
        assert_eq!(classify(&m).0, Category::Human);
    }

    #[test]
    fn human_requires_no_list_headers() {
        let mut m = base();
        m.from = Some("friend@example.com".into());
        m.to = vec!["me@example.com".into()];
        m.list_id = Some("<some.list>".into());
        assert_ne!(classify(&m).0, Category::Human);
    }

    #[test]
    fn unknown_when_no_signals_at_all() {
        let m = base();
        assert_eq!(classify(&m).0, Category::Unknown);
    }
}
