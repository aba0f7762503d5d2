use std::time::{SystemTime, UNIX_EPOCH};

/// return millisecond
pub fn timestamp_utc_ms() -> u64 {
    let now = SystemTime::now();
    let since_epoch = now.duration_since(UNIX_EPOCH).expect("Time went backwards");
    since_epoch.as_millis() as u64
}

/// Wire form: operation timestamps travel as decimal-millisecond strings.
pub fn timestamp_utc_ms_string() -> String {
    timestamp_utc_ms().to_string()
}

/// return second
pub(crate) fn get_now_as_secs() -> u64 {
    let now = SystemTime::now();
    let since_epoch = now.duration_since(UNIX_EPOCH).expect("Time went backwards");
    since_epoch.as_secs()
}
