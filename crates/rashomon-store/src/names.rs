//! Name Encoder — deterministic keyspace/identifier derivation
//!
//! Derives identifiers valid under the store's naming rules (<=48
//! alphanumeric/underscore chars, first char alpha) from an arbitrary
//! (domain, table) pair, and quotes identifiers for use in emitted CQL.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha1::{Digest, Sha1};

const MAX_IDENTIFIER_LEN: usize = 48;

/// Derive the keyspace name for a (reverse-dotted domain, table) pair.
///
/// `org.wikipedia.en` + `someTable` -> `org_wikipedia_en_T_someTable`-shaped
/// (subject to truncation/hashing once either component gets long).
pub fn keyspace_name(reverse_domain: &str, table: &str) -> String {
    let budget = MAX_IDENTIFIER_LEN.saturating_sub(table.len()).saturating_sub(3);
    let prefix = make_valid_key(reverse_domain, budget.max(26));
    let suffix_budget = MAX_IDENTIFIER_LEN.saturating_sub(prefix.len()).saturating_sub(3);
    let suffix = make_valid_key(table, suffix_budget);
    format!("{prefix}_T_{suffix}")
}

/// Derive a valid `[A-Za-z][A-Za-z0-9_]{0,L-1}` identifier from `s`, at
/// most `max_len` characters, by escaping and — if that still doesn't fit
/// or still contains invalid characters — truncating a clean prefix and
/// appending a hash suffix of the original input.
pub fn make_valid_key(s: &str, max_len: usize) -> String {
    let escaped = s.replace('_', "__").replace('.', "_");

    if is_simple_identifier(&escaped) && escaped.len() <= max_len {
        return ensure_leading_alpha(escaped);
    }

    let clean_prefix: String = escaped
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    let prefix_budget = (2 * max_len) / 3;
    let truncated_prefix: String = clean_prefix.chars().take(prefix_budget).collect();

    let hash = hash_suffix(s);
    let remaining = max_len.saturating_sub(truncated_prefix.len());
    let hash_part: String = hash.chars().take(remaining).collect();

    ensure_leading_alpha(format!("{truncated_prefix}{hash_part}"))
}

fn is_simple_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A naive truncate-and-hash derivation can land on a string starting
/// with `_` or a digit, violating the "first char alpha" identifier
/// rule; prefix with a fixed letter rather than let that through.
fn ensure_leading_alpha(s: String) -> String {
    match s.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => s,
        _ => format!("t{s}"),
    }
}

fn hash_suffix(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(digest).replace(['+', '/'], "_")
}

/// Quote an identifier for use in emitted CQL, doubling any interior `"`.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
