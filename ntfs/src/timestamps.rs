// FILETIME handling.
//
// NTFS stores times as 100ns ticks since 1601-01-01 UTC. Records keep the
// raw value; conversion to `SystemTime` happens at the destination seam.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the Windows epoch (1601) and the Unix epoch (1970).
const WINDOWS_EPOCH_DIFF: u64 = 11_644_473_600;

const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Convert a FILETIME to `SystemTime`. Values before the Unix epoch map
/// to `None`.
pub fn filetime_to_system(filetime: u64) -> Option<SystemTime> {
    let seconds = filetime / FILETIME_TICKS_PER_SECOND;
    if seconds < WINDOWS_EPOCH_DIFF {
        return None;
    }
    let unix_seconds = seconds - WINDOWS_EPOCH_DIFF;
    let nanos = ((filetime % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    UNIX_EPOCH.checked_add(Duration::new(unix_seconds, nanos))
}

/// Convert a `SystemTime` to FILETIME. Times before the Unix epoch clamp
/// to the Windows epoch.
pub fn system_to_filetime(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => {
            let seconds = duration.as_secs() + WINDOWS_EPOCH_DIFF;
            seconds * FILETIME_TICKS_PER_SECOND + duration.subsec_nanos() as u64 / 100
        }
        Err(_) => 0,
    }
}

/// Human-readable UTC rendering of a FILETIME, for diagnostics.
pub fn format_filetime(filetime: u64) -> String {
    if let Some(time) = filetime_to_system(filetime) {
        if let Ok(duration) = time.duration_since(UNIX_EPOCH) {
            if let Some(datetime) =
                chrono::DateTime::<chrono::Utc>::from_timestamp(duration.as_secs() as i64, 0)
            {
                return datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string();
            }
        }
    }
    format!("invalid FILETIME {}", filetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_boundaries() {
        assert!(filetime_to_system(0).is_none());

        let unix_epoch = WINDOWS_EPOCH_DIFF * FILETIME_TICKS_PER_SECOND;
        assert_eq!(filetime_to_system(unix_epoch), Some(UNIX_EPOCH));
    }

    #[test]
    fn test_round_trip() {
        let now = SystemTime::now();
        let filetime = system_to_filetime(now);
        let back = filetime_to_system(filetime).unwrap();
        let diff = now.duration_since(back).unwrap_or_else(|e| e.duration());
        assert!(diff.as_micros() < 10);
    }

    #[test]
    fn test_known_timestamp() {
        // 2000-01-01 00:00:00 UTC.
        let year_2000_unix = 946_684_800u64;
        let filetime = (year_2000_unix + WINDOWS_EPOCH_DIFF) * FILETIME_TICKS_PER_SECOND;

        let converted = filetime_to_system(filetime).unwrap();
        assert_eq!(converted.duration_since(UNIX_EPOCH).unwrap().as_secs(), year_2000_unix);
        assert_eq!(format_filetime(filetime), "2000-01-01 00:00:00 UTC");
    }
}
