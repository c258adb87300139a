//! Payload transform hook.
//!
//! Every decoded payload passes through a [`PayloadTransform`] in both
//! directions before it is relayed. Implementations must be total and
//! idempotent: applying one twice gives the same result as applying it once.

use serde_json::Value;

/// Stateless payload rewrite applied to all traffic.
pub trait PayloadTransform: Send + Sync {
    /// Rewrite `payload`, or return it unchanged.
    fn apply(&self, payload: String) -> String;
}

/// Leaves payloads untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl PayloadTransform for Passthrough {
    fn apply(&self, payload: String) -> String {
        payload
    }
}

/// Normalizes `file:` URIs anywhere inside a JSON payload.
///
/// For every string value starting with `file:`:
///
/// - backslashes become forward slashes,
/// - a percent-encoded colon (`%3A` / `%3a`) is decoded,
/// - a drive letter directly after `file://` gains the missing slash:
///   `file://C:/x` → `file:///C:/x`.
///
/// Payloads that are not JSON, or contain nothing to rewrite, are returned
/// byte-for-byte unchanged. A rewritten payload is serialized again in compact
/// form: object key order is kept, but insignificant whitespace is not, and
/// numbers outside the `i64`/`u64`/`f64` range lose precision.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileUriNormalizer;

impl PayloadTransform for FileUriNormalizer {
    fn apply(&self, payload: String) -> String {
        let Ok(mut value) = serde_json::from_str::<Value>(&payload) else {
            return payload;
        };
        if !normalize_value(&mut value) {
            return payload;
        }
        serde_json::to_string(&value).unwrap_or(payload)
    }
}

const FILE_AUTHORITY: &str = "file://";

/// Normalize a single URI string. Non-`file:` strings are returned as-is.
#[must_use]
pub fn normalize_file_uri(uri: &str) -> String {
    if !is_file_uri(uri) {
        return uri.to_owned();
    }

    let mut out = uri.replace('\\', "/").replace("%3A", ":").replace("%3a", ":");

    // `file://C:/…` lost the empty authority; restore `file:///C:/…`.
    let has_authority = out
        .get(..FILE_AUTHORITY.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FILE_AUTHORITY));
    let starts_with_drive = out.get(FILE_AUTHORITY.len()..).is_some_and(|rest| {
        let bytes = rest.as_bytes();
        bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
    });
    if has_authority && starts_with_drive {
        out.insert(FILE_AUTHORITY.len(), '/');
    }
    out
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn is_file_uri(s: &str) -> bool {
    s.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("file:"))
}

/// Rewrite every `file:` string inside `value`; returns whether anything changed.
fn normalize_value(value: &mut Value) -> bool {
    match value {
        Value::String(s) if is_file_uri(s) => {
            let normalized = normalize_file_uri(s);
            if normalized == *s {
                false
            } else {
                *s = normalized;
                true
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| normalize_value(item) || changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| normalize_value(item) || changed),
        _ => false,
    }
}
