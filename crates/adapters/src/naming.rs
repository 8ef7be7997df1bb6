// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes-safe names derived from outpost ids.
//!
//! Ids allow upper-case, `_` and `.`, and may be up to 128 characters. Object
//! names must be DNS-1123 labels (63 chars, `[a-z0-9-]`). Ids that do not
//! survive sanitization unchanged get a hash suffix so distinct ids never
//! collide.

const MAX_LABEL: usize = 63;

/// `prefix` + sanitized `raw`, at most `max_len` characters.
pub(crate) fn object_name(prefix: &str, raw: &str, max_len: usize) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let budget = max_len.saturating_sub(prefix.len());

    if sanitized == raw && sanitized.len() <= budget {
        return format!("{prefix}{sanitized}");
    }

    let suffix = format!("{:08x}", fnv1a(raw));
    let keep = budget.saturating_sub(suffix.len() + 1);
    let head = sanitized[..sanitized.len().min(keep)].trim_end_matches('-');
    if head.is_empty() {
        format!("{prefix}{suffix}")
    } else {
        format!("{prefix}{head}-{suffix}")
    }
}

/// A label value: at most 63 characters of `[A-Za-z0-9-_.]`, alphanumeric at
/// both ends.
pub(crate) fn label_value(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .take(MAX_LABEL)
        .collect();
    cleaned.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string()
}

fn fnv1a(s: &str) -> u32 {
    s.bytes().fold(0x811c_9dc5u32, |hash, b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}
