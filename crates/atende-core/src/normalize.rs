// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity normalization for phones, documents, and provider ids.
//!
//! Every lookup key in the engine passes through one of these functions
//! before it touches the store, so the same identity arriving in different
//! spellings converges on one row. All of them are idempotent.

/// Minimum digit count for a phone to be considered usable.
const MIN_PHONE_DIGITS: usize = 10;

fn digits_of(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a phone-like string to `+<digits>`.
///
/// Strips everything but ASCII digits and requires at least 10 of them;
/// returns `None` otherwise. `"5511 99999-9999"` and `"+5511999999999"`
/// normalize to the same key.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = digits_of(raw);
    if digits.len() < MIN_PHONE_DIGITS {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Normalize a tax-id-like document to its digits.
///
/// Returns `None` when no digits remain.
pub fn normalize_document(raw: &str) -> Option<String> {
    let digits = digits_of(raw);
    if digits.is_empty() { None } else { Some(digits) }
}

/// Normalize a provider-assigned external id: trim, reject empty.
pub fn normalize_external_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
