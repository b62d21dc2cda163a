//! Shared utility functions used across multiple modules.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string names a network endpoint rather than a local database file.
pub fn is_network_url(value: &str) -> bool {
    ["http://", "https://", "libsql://", "ws://", "wss://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Lock a registry mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_registry<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Convert a duration to whole milliseconds for timestamp arithmetic.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" libsql://school.turso.io ".to_string())),
            Some("libsql://school.turso.io".to_string())
        );
    }

    #[test]
    fn is_network_url_accepts_remote_schemes() {
        assert!(is_network_url("libsql://school.turso.io"));
        assert!(is_network_url("https://example.com"));
        assert!(!is_network_url("file:shared.db"));
        assert!(!is_network_url("/var/lib/robolab/shared.db"));
    }

    #[test]
    fn duration_millis_converts() {
        assert_eq!(duration_millis(Duration::from_secs(30)), 30_000);
    }
}
