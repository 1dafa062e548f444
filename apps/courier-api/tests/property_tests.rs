//! Property-based tests for the Courier API wire formats.
//!
//! Exercises the encodings the API and the job store exchange: status
//! strings, recipient list JSON, RFC 3339 timestamps, and data URLs.

use proptest::prelude::*;

/// Valid job statuses on the wire.
fn job_status() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("pending"),
        Just("processing"),
        Just("sent"),
        Just("failed"),
        Just("cancelled"),
    ]
}

fn address() -> impl Strategy<Value = String> {
    "[a-z]{1,12}@[a-z]{1,12}\\.[a-z]{2,4}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ============================================================
    // Status Encoding Tests
    // ============================================================

    #[test]
    fn status_values_are_lowercase_identifiers(status in job_status()) {
        prop_assert!(!status.is_empty());
        prop_assert!(status.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn terminal_statuses_are_recognized(
        terminal in prop_oneof![Just("sent"), Just("failed"), Just("cancelled")]
    ) {
        let is_terminal = matches!(terminal, "sent" | "failed" | "cancelled");
        prop_assert!(is_terminal);
    }

    // ============================================================
    // Recipient Encoding Tests
    // ============================================================

    #[test]
    fn recipient_arrays_round_trip_through_json(
        addrs in proptest::collection::vec(address(), 1..6)
    ) {
        let encoded = serde_json::to_string(&addrs).unwrap();
        let decoded: Vec<String> = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(addrs, decoded);
    }

    #[test]
    fn double_encoded_recipients_still_decode(
        addrs in proptest::collection::vec(address(), 1..6)
    ) {
        // The legacy storage shape: a JSON array serialized into a string.
        let inner = serde_json::to_string(&addrs).unwrap();
        let outer = serde_json::to_string(&inner).unwrap();

        let unwrapped: String = serde_json::from_str(&outer).unwrap();
        let decoded: Vec<String> = serde_json::from_str(&unwrapped).unwrap();
        prop_assert_eq!(addrs, decoded);
    }

    #[test]
    fn email_shape_is_preserved(addr in address()) {
        prop_assert!(addr.contains('@'));
        prop_assert!(addr.contains('.'));
        let re = regex::Regex::new(r"^[a-z]+@[a-z]+\.[a-z]{2,4}$").unwrap();
        prop_assert!(re.is_match(&addr));
    }

    // ============================================================
    // Timestamp Format Tests
    // ============================================================

    #[test]
    fn rfc3339_timestamps_sort_like_instants(
        year in 2020i32..2030,
        month in 1u32..13,
        day in 1u32..29,
        hour in 0u32..24,
        minute in 0u32..60,
    ) {
        let earlier = format!("{:04}-{:02}-{:02}T{:02}:{:02}:00.000000Z", year, month, day, hour, minute);
        let later = format!("{:04}-{:02}-{:02}T{:02}:{:02}:59.000000Z", year, month, day, hour, minute);
        // Fixed-width encoding means TEXT comparison agrees with time order.
        prop_assert!(earlier < later);
        prop_assert_eq!(earlier.len(), later.len());
    }

    // ============================================================
    // Inline Image Payload Tests
    // ============================================================

    #[test]
    fn base64_data_url_format(data in "[A-Za-z0-9+/]{16,128}") {
        let data_url = format!("data:image/png;base64,{}", data);
        prop_assert!(data_url.starts_with("data:image/"));
        prop_assert!(data_url.contains(";base64,"));
    }

    #[test]
    fn base64_payload_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..256)) {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let encoded = STANDARD.encode(&data);
        let decoded = STANDARD.decode(&encoded).unwrap();
        prop_assert_eq!(data, decoded);
    }

    // ============================================================
    // Pagination Bounds
    // ============================================================

    #[test]
    fn page_limits_clamp_into_range(requested in -1000i64..1000) {
        let clamped = requested.clamp(1, 100);
        prop_assert!(clamped >= 1);
        prop_assert!(clamped <= 100);
    }
}
