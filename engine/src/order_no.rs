//! Order number generation.

use chrono::{DateTime, Utc};
use flash_sale_core::types::OrderNo;
use uuid::Uuid;

/// `ORD{unix_seconds}{8 hex chars}`.
///
/// Numbers sort roughly by creation second. The suffix comes from a v4
/// UUID, so two purchases in the same second collide with probability
/// 2^-32; the record store's unique constraint rejects a collision.
#[must_use]
pub fn generate(now: DateTime<Utc>) -> OrderNo {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    OrderNo::new(format!("ORD{}{suffix}", now.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_sale_testing::test_epoch;

    #[test]
    fn format_is_prefix_seconds_and_hex_suffix() {
        let order_no = generate(test_epoch());
        let rest = order_no.as_str().strip_prefix("ORD1735689600").unwrap_or_default();
        assert_eq!(rest.len(), 8);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_second_numbers_differ() {
        assert_ne!(generate(test_epoch()), generate(test_epoch()));
    }
}
