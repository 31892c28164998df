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

//! Bounce parsing (spec.md 4.4): pulls the failed recipient, SMTP status
//! code, and a cleaned diagnostic string out of a message already
//! classified as [`crate::modules::model::Category::Bounce`]. Messages
//! that don't yield a usable recipient are not an error — they're recorded
//! as `BounceUnparseable`, an informational sentinel, not a hard failure
//! (spec.md 7).

use std::sync::LazyLock;

use regex::Regex;

use crate::modules::model::BounceType;
use crate::modules::raw::RawMessage;

/// Outcome of attempting to parse bounce details out of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBounce {
    pub failed_recipient: String,
    pub error_code: String,
    pub diagnostic: String,
    pub bounce_type: BounceType,
}

const ADDR: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

const NO_DIAGNOSTIC: &str = "No diagnostic information available";
const DIAGNOSTIC_MAX_LEN: usize = 300;

const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".mp4", ".pdf", ".doc", ".zip",
];
const SYSTEM_PREFIXES: &[&str] = &["mailer-daemon@", "postmaster@", "noreply@", "no-reply@"];
const BOUNCE_TERMS: &[&str] = &[
    "deliver", "bounce", "fail", "reject", "error", "invalid", "exist", "quota", "full",
    "unknown", "temporary", "permanent",
];
const RECIPIENT_TERMS: &[&str] = &["recipient", "mailbox", "address"];
const MARKETING_PHRASES: &[&str] = &[
    "unsubscribe",
    "view this email in your browser",
    "update your preferences",
    "privacy policy",
    "shop now",
    "% off",
    "limited time offer",
];
const DISCLAIMER_FRAGMENTS: &[&str] = &[
    "this is an automatically generated",
    "this message was created automatically",
    "do not reply to this",
    "this email has been scanned",
    "confidentiality notice",
];

fn addr_pattern(inner: &str) -> Regex {
    Regex::new(&inner.replace("ADDR", ADDR)).unwrap()
}

static RECIPIENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        addr_pattern(r"(?i)(?:failed|undelivered).{0,80}?(?:to|for|recipient)[:\s]+<?(ADDR)>?"),
        addr_pattern(r"(?im)^Final-Recipient:\s*rfc822;\s*<?(ADDR)>?\s*$"),
        addr_pattern(r"(?im)^Original-Recipient:\s*(?:rfc822;\s*)?<?(ADDR)>?\s*$"),
        addr_pattern(r"<(ADDR)>"),
        addr_pattern(r"(?i)(?:to|for|recipient|user):\s*<?(ADDR)>?"),
        addr_pattern(r"\b(ADDR)\b"),
    ]
});

static UUID_LOCAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});
static LONG_HEX_LOCAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?i)[0-9a-f]{8}").unwrap());
static ADDR_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{ADDR}$")).unwrap()
});
static MX_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@mx\.(google|yahoo|outlook)\.com$").unwrap()
});

static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[245]\d{2}").unwrap());

static ENHANCED_STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^.*\b[245]\.\d\.\d\b.*$").unwrap());
static DIAGNOSTIC_CODE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^Diagnostic-Code:\s*smtp;\s*(.+)$").unwrap());
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?im)^Status:\s*(5\.\d\.\d.*)$").unwrap());
static GMAIL_PHRASING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)address not found[^.\n]*because[^.\n]*\.?").unwrap()
});
static OUTLOOK_PHRASING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)did not reach the following recipient[^.\n]*\.?").unwrap()
});
static GENERIC_SMTP_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[245]\d{2}[ -][^\n]{0,100}").unwrap());

static UNKNOWN_HARD_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(user|mailbox).*not.*found|account.*disabled").unwrap());
static UNKNOWN_SOFT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mailbox.*full|quota.*exceeded").unwrap());

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&[a-zA-Z#0-9]+;").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static DECORATIVE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*=\-]{3,}").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Validity predicate for a candidate recipient address (spec.md 4.4
/// `V(addr)`).
fn is_valid_recipient(addr: &str) -> bool {
    if addr.len() < 5 || addr.len() > 254 {
        return false;
    }
    if !ADDR_SHAPE.is_match(addr) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.len() > 64 {
        return false;
    }
    if LONG_HEX_LOCAL.is_match(local) {
        return false;
    }
    if UUID_LOCAL.is_match(local) {
        return false;
    }
    if local.contains("..") || local.chars().any(char::is_whitespace) {
        return false;
    }
    if addr.contains(['<', '>', '"', '\'']) || addr.to_lowercase().contains("http://") {
        return false;
    }
    if domain.len() < 3 || domain.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    if let Some(sub_tld) = labels.get(labels.len().saturating_sub(2)) {
        if !sub_tld.is_empty() && sub_tld.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    let lower = addr.to_lowercase();
    if BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    if MX_HOST.is_match(&lower) {
        return false;
    }
    if SYSTEM_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return false;
    }
    true
}

/// Attempts to extract bounce details from `message`. Returns `None` when
/// no candidate recipient can be found with sufficient confidence; callers
/// treat that as `BounceUnparseable`, not an error.
pub fn parse(message: &RawMessage) -> Option<ParsedBounce> {
    let headers: String = message
        .raw_headers
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n");
    let full_text = format!(
        "{}\n{}\n{}",
        message.subject,
        message.body_text.as_deref().unwrap_or_default(),
        headers
    );

    let failed_recipient = extract_recipient(&full_text)?;
    let error_code = extract_code(&full_text);
    let diagnostic = extract_diagnostic(&full_text, message.body_html.as_deref());
    let bounce_type = classify_bounce_type(&error_code, &full_text);

    Some(ParsedBounce {
        failed_recipient,
        error_code,
        diagnostic,
        bounce_type,
    })
}

fn extract_recipient(text: &str) -> Option<String> {
    for pattern in RECIPIENT_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(candidate) = caps.get(1) else { continue };
            let lowered = candidate.as_str().to_lowercase();
            if is_valid_recipient(&lowered) {
                return Some(lowered);
            }
        }
    }
    None
}

/// First `[245]\d{2}` substring in the body, or `"UNKNOWN"`.
fn extract_code(text: &str) -> String {
    CODE.find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn classify_bounce_type(code: &str, body: &str) -> BounceType {
    match code {
        "550" | "551" | "552" | "553" | "554" => return BounceType::Hard,
        "450" | "451" | "452" | "453" => return BounceType::Soft,
        _ => {}
    }
    if let Some(first) = code.chars().next() {
        match first {
            '5' => return BounceType::Hard,
            '4' => return BounceType::Soft,
            _ => {}
        }
    }

    let lower = body.to_lowercase();
    if UNKNOWN_HARD_HINT.is_match(&lower) {
        BounceType::Hard
    } else if UNKNOWN_SOFT_HINT.is_match(&lower) || lower.contains("temporarily") {
        BounceType::Soft
    } else {
        BounceType::Unknown
    }
}

/// Tries a prioritized list of diagnostic-text patterns, cleaning and
/// validating each candidate, and falls back to the literal sentinel when
/// none is accepted.
fn extract_diagnostic(text: &str, html: Option<&str>) -> String {
    let candidates = [
        ENHANCED_STATUS_LINE.find(text).map(|m| m.as_str().to_string()),
        DIAGNOSTIC_CODE_LINE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        STATUS_LINE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        GMAIL_PHRASING.find(text).map(|m| m.as_str().to_string()),
        OUTLOOK_PHRASING.find(text).map(|m| m.as_str().to_string()),
        GENERIC_SMTP_RESPONSE.find(text).map(|m| m.as_str().to_string()),
    ];

    for candidate in candidates.into_iter().flatten() {
        let cleaned = clean_diagnostic(&candidate);
        if is_acceptable_diagnostic(&cleaned) {
            return truncate(&cleaned);
        }
    }

    // Last resort: clean the whole HTML body, in case the structured
    // patterns above all missed a non-standard bounce format.
    if let Some(html) = html {
        let cleaned = clean_diagnostic(html);
        if is_acceptable_diagnostic(&cleaned) {
            return truncate(&cleaned);
        }
    }

    NO_DIAGNOSTIC.to_string()
}

fn clean_diagnostic(text: &str) -> String {
    let without_tags = HTML_TAG.replace_all(text, " ");
    let without_entities = ENTITY.replace_all(&without_tags, " ");
    let without_urls = URL.replace_all(&without_entities, " ");
    let without_decoration = DECORATIVE_RUN.replace_all(&without_urls, " ");
    let mut cleaned = WHITESPACE.replace_all(without_decoration.trim(), " ").into_owned();
    for fragment in DISCLAIMER_FRAGMENTS {
        if let Some(pos) = cleaned.to_lowercase().find(fragment) {
            cleaned.truncate(pos);
        }
    }
    cleaned.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace()).to_string()
}

fn is_acceptable_diagnostic(text: &str) -> bool {
    if text.chars().count() < 10 {
        return false;
    }
    if !text.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    let total = text.chars().count() as f32;
    let non_alnum = text.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count() as f32;
    if total > 0.0 && non_alnum / total > 0.4 {
        return false;
    }
    let lower = text.to_lowercase();
    if MARKETING_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return false;
    }
    let has_bounce_term = BOUNCE_TERMS.iter().any(|term| lower.contains(term));
    let has_recipient_term = RECIPIENT_TERMS.iter().any(|term| lower.contains(term));
    let has_code = CODE.is_match(&lower);
    has_bounce_term || has_recipient_term || has_code
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= DIAGNOSTIC_MAX_LEN {
        text.to_string()
    } else {
        text.chars().take(DIAGNOSTIC_MAX_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounce_message(body: &str) -> RawMessage {
        RawMessage {
            mailbox_id: 1,
            uid: 1,
            message_id: "<bounce@mx.example.com>".into(),
            body_text: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn extracts_final_recipient_and_hard_code() {
        let body = "Final-Recipient: rfc822; jane.doe@example.com\nStatus: 5.1.1\n550 5.1.1 user unknown in local table";
        let parsed = parse(&bounce_message(body)).unwrap();
        assert_eq!(parsed.failed_recipient, "jane.doe@example.com");
        assert_eq!(parsed.error_code, "550");
        assert_eq!(parsed.bounce_type, BounceType::Hard);
    }

    #[test]
    fn soft_bounce_from_4xx_code() {
        let body = "Final-Recipient: rfc822; bob@example.com\nStatus: 4.2.2\n452 4.2.2 mailbox full";
        let parsed = parse(&bounce_message(body)).unwrap();
        assert_eq!(parsed.bounce_type, BounceType::Soft);
    }

    #[test]
    fn unknown_code_falls_back_to_body_heuristic() {
        let body = "the following recipient's mailbox is full, please try again";
        let parsed = parse(&bounce_message(&format!(
            "Final-Recipient: rfc822; carol@example.com\n{body}"
        )))
        .unwrap();
        assert_eq!(parsed.error_code, "UNKNOWN");
        assert_eq!(parsed.bounce_type, BounceType::Soft);
    }

    #[test]
    fn strips_disclaimer_lines_and_urls() {
        let body = "Final-Recipient: rfc822; x@example.com\nStatus: 5.0.0\nDiagnostic-Code: smtp; 550 the message could not be delivered to the recipient mailbox";
        let parsed = parse(&bounce_message(body)).unwrap();
        assert!(!parsed.diagnostic.contains("https://"));
        assert!(parsed.diagnostic.to_lowercase().contains("recipient"));
    }

    #[test]
    fn failed_to_pattern_has_top_priority() {
        let body = "delivery failed to alice@example.com\nFinal-Recipient: rfc822; mailer-daemon@example.com";
        let parsed = parse(&bounce_message(body)).unwrap();
        assert_eq!(parsed.failed_recipient, "alice@example.com");
    }

    #[test]
    fn system_prefix_recipient_is_rejected() {
        let body = "the message to mailer-daemon@example.com could not be delivered";
        assert!(!is_valid_recipient("mailer-daemon@example.com"));
        // no other candidate: nothing else in the body is address-shaped.
        assert!(parse(&bounce_message(body)).is_none());
    }

    #[test]
    fn uuid_shaped_local_part_is_rejected() {
        assert!(!is_valid_recipient("550e8400-e29b-41d4-a716-446655440000@example.com"));
    }

    #[test]
    fn mx_host_is_rejected() {
        assert!(!is_valid_recipient("bounce@mx.google.com"));
    }

    #[test]
    fn binary_extension_is_rejected() {
        assert!(!is_valid_recipient("attachment@files.example.png"));
    }

    #[test]
    fn returns_none_when_no_recipient_found() {
        let body = "This mailbox is no longer monitored.";
        assert!(parse(&bounce_message(body)).is_none());
    }

    #[test]
    fn no_diagnostic_sentinel_when_nothing_acceptable() {
        let body = "Final-Recipient: rfc822; valid@example.com\n***";
        let parsed = parse(&bounce_message(body)).unwrap();
        assert_eq!(parsed.diagnostic, NO_DIAGNOSTIC);
    }
}
