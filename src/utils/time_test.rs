use crate::utils::{get_now_as_secs, timestamp_utc_ms, timestamp_utc_ms_string};

use std::thread::sleep;

#[test]
fn test_timestamp_utc_ms() {
    let t1 = timestamp_utc_ms();
    sleep(std::time::Duration::from_millis(10));
    let t2 = timestamp_utc_ms();

    // Ensure time is moving forward
    assert!(t2 > t1);
    assert!(t2 - t1 >= 10);
}

#[test]
fn test_timestamp_string_is_decimal_ms() {
    let s = timestamp_utc_ms_string();
    let parsed: u64 = s.parse().expect("timestamp string should be numeric");
    // Should be a reasonable value (somewhere after 2021-01-01)
    assert!(parsed > 1_609_459_200_000);
}

#[test]
fn test_get_now_as_secs() {
    let t = get_now_as_secs();
    assert!(t > 1_609_459_200); // Greater than 2021-01-01
}
