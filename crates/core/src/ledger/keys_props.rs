//! Property-based tests for the time key codec.
//!
//! - Ordering: `t1 < t2` implies `key(t1) > key(t2)`, as numbers and as strings
//! - Identity: decoding an encoded key yields the instant at ms precision

use chrono::DateTime;
use proptest::prelude::*;

use super::keys::{ANCHOR_MILLIS, TimeKey, decode, encode};

/// Milliseconds covering the whole encodable range.
fn encodable_millis() -> impl Strategy<Value = i64> {
    (ANCHOR_MILLIS - 999_999_999_999)..=ANCHOR_MILLIS
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_order_is_reversed(a in encodable_millis(), b in encodable_millis()) {
        prop_assume!(a != b);
        let (earlier, later) = if a < b { (a, b) } else { (b, a) };
        let earlier = encode(DateTime::from_timestamp_millis(earlier).unwrap()).unwrap();
        let later = encode(DateTime::from_timestamp_millis(later).unwrap()).unwrap();

        prop_assert!(later < earlier);
        prop_assert!(later.to_string() < earlier.to_string());
    }

    #[test]
    fn prop_decode_encode_identity(millis in encodable_millis()) {
        let instant = DateTime::from_timestamp_millis(millis).unwrap();
        let key = encode(instant).unwrap();

        prop_assert_eq!(key.to_string().len(), 12);
        prop_assert_eq!(decode(&key.to_string()).unwrap(), instant);
        prop_assert_eq!(TimeKey::parse(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn prop_beyond_anchor_rejected(extra in 1i64..1_000_000_000) {
        let instant = DateTime::from_timestamp_millis(ANCHOR_MILLIS + extra).unwrap();
        prop_assert!(encode(instant).is_err());
    }
}
