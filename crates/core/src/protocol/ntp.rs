//! NTP timestamp conversion (RFC 5905 §6).
//!
//! RTCP sender reports carry a 64-bit NTP timestamp: seconds since
//! 1900-01-01 in the high word and a binary fraction in the low word.
//! The pipeline keys presentation on Unix-epoch milliseconds.

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Convert an NTP timestamp to Unix-epoch milliseconds.
pub fn ntp_to_millis(most: u32, least: u32) -> f64 {
    let secs = most as f64 - NTP_UNIX_OFFSET_SECS as f64;
    secs * 1000.0 + least as f64 * 1000.0 / 4_294_967_296.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_is_zero() {
        assert_eq!(ntp_to_millis(NTP_UNIX_OFFSET_SECS as u32, 0), 0.0);
    }

    #[test]
    fn half_second_fraction() {
        let ms = ntp_to_millis(NTP_UNIX_OFFSET_SECS as u32 + 10, 0x8000_0000);
        assert_eq!(ms, 10_500.0);
    }
}
