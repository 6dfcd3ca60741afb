//! ISO 7816 constants and small byte-slice helpers shared across modules.

/// Status word meaning "success, no further data".
pub const SW_SUCCESS: u16 = 0x9000;

/// Status word returned by `SELECT`/`GET DATA` when the applet or file is absent.
pub const SW_NOT_FOUND: u16 = 0x6A82;

/// Status word returned by ARA-M `GET DATA` when there is no rule data to return.
pub const SW_REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;

/// `Le` byte ARA-M uses instead of `0x00`, for modems that reject `Le=0x00`.
pub const ARA_SHORT_LE: u8 = 0xF0;

/// Maximum single-fragment length the ARA-M chaining driver requests.
pub const ARA_MAX_FRAGMENT: usize = 0xF0;

pub fn split_sw(sw: u16) -> (u8, u8) {
    ((sw >> 8) as u8, (sw & 0xFF) as u8)
}

/// `true` when `sw1` indicates a warning (`0x62`/`0x63`), i.e. the command
/// succeeded but with a caveat (such as more response data remaining).
pub fn is_warning_sw1(sw1: u8) -> bool {
    sw1 == 0x62 || sw1 == 0x63
}

/// Uppercase hex encoding, used throughout error messages to match the
/// convention of logging AIDs/hashes in GlobalPlatform tooling.
pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sw_roundtrips() {
        assert_eq!(split_sw(0x9000), (0x90, 0x00));
        assert_eq!(split_sw(0x6A88), (0x6A, 0x88));
    }

    #[test]
    fn warning_sw1() {
        assert!(is_warning_sw1(0x62));
        assert!(is_warning_sw1(0x63));
        assert!(!is_warning_sw1(0x90));
    }
}
