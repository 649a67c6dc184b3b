//! Process-local identifier minting for dialogs, stories and actions.
//!
//! Identifiers combine the wall clock with an atomic sequence so ids stay
//! unique within a process even when minted in the same millisecond. Global
//! uniqueness across processes is the timeline store's concern, not ours.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Milliseconds since the Unix epoch, saturating on clock anomalies.
///
/// Also stamps action envelopes and dialog/entity update times.
pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Mints a process-unique identifier with the given prefix.
pub fn mint_id(prefix: &str) -> String {
    let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", current_unix_timestamp_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_timestamp_ms_is_monotonic_enough_for_stamping() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[test]
    fn unit_mint_id_sequence_is_strictly_increasing() {
        let ids: Vec<String> = (0..64).map(|_| mint_id("act")).collect();
        let mut seen = std::collections::HashSet::new();
        for id in &ids {
            assert!(seen.insert(id.clone()), "duplicate id {id}");
        }
    }

    #[test]
    fn unit_mint_id_rejects_nothing_and_keeps_prefix_verbatim() {
        assert!(mint_id("usr").starts_with("usr-"));
        assert!(mint_id("").starts_with('-'));
    }
}
