//! ISO 7816-4 command/response APDU codec (component C1).
//!
//! Supports cases 1-4 in both short and extended length form. This is
//! deliberately minimal: it knows nothing about secure messaging, chaining
//! semantics beyond SW1=0x61, or any higher-layer protocol. Those live in
//! `ara` and `arf`.

use crate::{
    error::{Error, Result},
    util::is_warning_sw1,
};
use std::fmt;

/// A status word, the two trailing bytes of every response APDU.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    pub fn new(value: u16) -> Self {
        StatusWord(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn sw1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// `true` iff this status word is `9000`.
    pub fn is_success(&self) -> bool {
        self.0 == 0x9000
    }

    /// `true` for the `62xx`/`63xx` warning classes (command executed, with
    /// a non-fatal caveat).
    pub fn is_warning(&self) -> bool {
        is_warning_sw1(self.sw1())
    }

    /// `Some(n)` when SW1 is `0x61` ("more data available"), carrying the
    /// number of bytes still to fetch with `GET RESPONSE`.
    pub fn data_remaining(&self) -> Option<u8> {
        if self.sw1() == 0x61 {
            Some(self.sw2())
        } else {
            None
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord(value)
    }
}

/// A command APDU, decomposed into its ISO 7816-4 fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Option<Vec<u8>>,
    pub le: Option<u32>,
}

impl CommandApdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Option<Vec<u8>>, le: Option<u32>) -> Result<Self> {
        if cla == 0xFF {
            return Err(Error::invalid_argument("CLA 0xFF is reserved"));
        }
        if ins & 0xF0 == 0x60 || ins & 0xF0 == 0x90 {
            return Err(Error::invalid_argument(format!(
                "INS {ins:02X} is reserved for TPDU/TPDUD indication"
            )));
        }
        if let Some(d) = &data {
            if d.is_empty() {
                return Err(Error::invalid_argument("command data must not be empty"));
            }
            if d.len() > 65535 {
                return Err(Error::invalid_argument("command data exceeds 65535 bytes"));
            }
        }
        if let Some(le) = le {
            if le > 65536 {
                return Err(Error::invalid_argument("Le exceeds 65536"));
            }
        }
        Ok(CommandApdu {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        })
    }

    pub fn case1(cla: u8, ins: u8, p1: u8, p2: u8) -> Result<Self> {
        Self::new(cla, ins, p1, p2, None, None)
    }

    /// Encode per the form-selection rules of SPEC_FULL.md section 4.1.
    pub fn encode(&self) -> Vec<u8> {
        let header = [self.cla, self.ins, self.p1, self.p2];
        match (&self.data, self.le) {
            (None, None) => header.to_vec(),
            (None, Some(le)) if le <= 256 => {
                let mut out = header.to_vec();
                out.push((le & 0xFF) as u8);
                out
            }
            (Some(data), None) if data.len() <= 255 => {
                let mut out = header.to_vec();
                out.push(data.len() as u8);
                out.extend_from_slice(data);
                out
            }
            (Some(data), Some(le)) if data.len() <= 255 && le <= 256 => {
                let mut out = header.to_vec();
                out.push(data.len() as u8);
                out.extend_from_slice(data);
                out.push((le & 0xFF) as u8);
                out
            }
            (data, le) => {
                let mut out = header.to_vec();
                out.push(0x00);
                if let Some(data) = data {
                    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
                    out.extend_from_slice(data);
                }
                if let Some(le) = le {
                    let encoded = if le == 65536 { 0u16 } else { le as u16 };
                    out.extend_from_slice(&encoded.to_be_bytes());
                }
                out
            }
        }
    }

    /// Decode a command APDU produced by [`encode`](Self::encode). Performs
    /// the inverse of form selection; see SPEC_FULL.md section 8 for the
    /// round-trip invariant this satisfies.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::parse("command APDU shorter than 4 bytes"));
        }
        let cla = bytes[0];
        let ins = bytes[1];
        let p1 = bytes[2];
        let p2 = bytes[3];

        if bytes.len() == 4 {
            return Self::new(cla, ins, p1, p2, None, None);
        }

        let p3 = bytes[4];

        if bytes.len() == 5 {
            let le = if p3 == 0 { 256 } else { p3 as u32 };
            return Self::new(cla, ins, p1, p2, None, Some(le));
        }

        if p3 != 0 {
            let lc = p3 as usize;
            if bytes.len() == 5 + lc {
                let data = bytes[5..5 + lc].to_vec();
                return Self::new(cla, ins, p1, p2, Some(data), None);
            }
            if bytes.len() == 5 + lc + 1 {
                let data = bytes[5..5 + lc].to_vec();
                let leb = bytes[5 + lc];
                let le = if leb == 0 { 256 } else { leb as u32 };
                return Self::new(cla, ins, p1, p2, Some(data), Some(le));
            }
            return Err(Error::parse("short-form APDU length does not match Lc"));
        }

        // Extended form: P3 == 0x00.
        if bytes.len() == 7 {
            let le16 = u16::from_be_bytes([bytes[5], bytes[6]]);
            let le = if le16 == 0 { 65536 } else { le16 as u32 };
            return Self::new(cla, ins, p1, p2, None, Some(le));
        }
        if bytes.len() < 7 {
            return Err(Error::parse("extended-form APDU too short"));
        }
        let lc = u16::from_be_bytes([bytes[5], bytes[6]]) as usize;
        if bytes.len() == 7 + lc {
            let data = bytes[7..7 + lc].to_vec();
            return Self::new(cla, ins, p1, p2, Some(data), None);
        }
        if bytes.len() == 7 + lc + 2 {
            let data = bytes[7..7 + lc].to_vec();
            let le16 = u16::from_be_bytes([bytes[7 + lc], bytes[8 + lc]]);
            let le = if le16 == 0 { 65536 } else { le16 as u32 };
            return Self::new(cla, ins, p1, p2, Some(data), Some(le));
        }
        Err(Error::parse("extended-form APDU length does not match Lc"))
    }
}

/// A response APDU: trailing data plus its status word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseApdu {
    data: Vec<u8>,
    sw: StatusWord,
}

impl ResponseApdu {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 || bytes.len() > 65538 {
            return Err(Error::parse("response APDU length out of range"));
        }
        let split = bytes.len() - 2;
        let sw = u16::from_be_bytes([bytes[split], bytes[split + 1]]);
        Ok(ResponseApdu {
            data: bytes[..split].to_vec(),
            sw: StatusWord::new(sw),
        })
    }

    pub fn new(data: Vec<u8>, sw: StatusWord) -> Self {
        ResponseApdu { data, sw }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sw(&self) -> StatusWord {
        self.sw
    }

    pub fn sw_value(&self) -> u16 {
        self.sw.value()
    }

    pub fn is_success(&self) -> bool {
        self.sw.is_success()
    }

    pub fn is_warning(&self) -> bool {
        self.sw.is_warning()
    }
}

/// Rewrite `cla`'s logical channel number per GP 2.2 section 11.1.4.
pub fn set_channel_to_class_byte(cla: u8, channel: u8) -> Result<u8> {
    if channel > 19 {
        return Err(Error::invalid_argument("logical channel number out of range"));
    }
    if channel <= 3 {
        // First interindustry class byte: bit 7 clear, channel in the two
        // low-order bits, chaining/SM bits preserved.
        Ok((cla & 0x7C) | channel)
    } else {
        // Further interindustry class byte: bit 7 set, channel-4 in the
        // four low-order bits, SM indication folded into bit 0x20.
        let sm_bit = if cla & 0x0C != 0 { 0x20 } else { 0x00 };
        let base = 0x80 | sm_bit | (cla & 0x40);
        Ok(base | (channel - 4))
    }
}

/// Extract the logical channel number encoded in `cla`.
pub fn parse_channel_number(cla: u8) -> u8 {
    if cla & 0x80 == 0 {
        cla & 0x03
    } else {
        (cla & 0x0F) + 4
    }
}

/// Reset `cla`'s channel number to 0 (the basic channel), preserving the
/// rest of the class byte.
pub fn clear_channel_number(cla: u8) -> u8 {
    if cla & 0x80 == 0 {
        cla & !0x03
    } else {
        cla & !0x0F
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_cla() {
        assert!(CommandApdu::new(0xFF, 0xA4, 0, 0, None, None).is_err());
    }

    #[test]
    fn rejects_reserved_ins() {
        assert!(CommandApdu::new(0x00, 0x6F, 0, 0, None, None).is_err());
        assert!(CommandApdu::new(0x00, 0x90, 0, 0, None, None).is_err());
    }

    #[test]
    fn rejects_empty_data() {
        assert!(CommandApdu::new(0x00, 0xA4, 0, 0, Some(vec![]), None).is_err());
    }

    #[test]
    fn case1_encode() {
        let apdu = CommandApdu::case1(0x00, 0xA4, 0x04, 0x00).unwrap();
        assert_eq!(apdu.encode(), vec![0x00, 0xA4, 0x04, 0x00]);
    }

    #[test]
    fn case2_short_encode_wraps_256_to_zero() {
        let apdu = CommandApdu::new(0x00, 0xCA, 0x00, 0x00, None, Some(256)).unwrap();
        assert_eq!(apdu.encode(), vec![0x00, 0xCA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn case3_short_encode() {
        let apdu = CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![0xA0, 0x00]), None).unwrap();
        assert_eq!(apdu.encode(), vec![0x00, 0xA4, 0x04, 0x0C, 0x02, 0xA0, 0x00]);
    }

    #[test]
    fn case4_short_encode() {
        let apdu = CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![0xA0, 0x00]), Some(0)).unwrap();
        assert_eq!(
            apdu.encode(),
            vec![0x00, 0xA4, 0x04, 0x0C, 0x02, 0xA0, 0x00, 0x00]
        );
    }

    #[test]
    fn case4_extended_round_trip() {
        let data = vec![0xAB; 300];
        let apdu = CommandApdu::new(0x00, 0xCA, 0xFF, 0x40, Some(data.clone()), Some(512)).unwrap();
        let encoded = apdu.encode();
        assert_eq!(encoded[4], 0x00);
        assert_eq!(&encoded[5..7], &[0x01, 0x2C]);
        assert_eq!(&encoded[7..307], &data[..]);
        assert_eq!(&encoded[307..309], &[0x02, 0x00]);
        let decoded = CommandApdu::decode(&encoded).unwrap();
        assert_eq!(decoded, apdu);
    }

    #[test]
    fn round_trip_all_cases() {
        let cases = vec![
            CommandApdu::new(0x00, 0xA4, 0x04, 0x00, None, None).unwrap(),
            CommandApdu::new(0x00, 0xCA, 0xFF, 0x40, None, Some(240)).unwrap(),
            CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![1, 2, 3]), None).unwrap(),
            CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![1, 2, 3]), Some(256)).unwrap(),
            CommandApdu::new(0x00, 0xCA, 0xFF, 0x40, None, Some(65536)).unwrap(),
            CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![9; 300]), None).unwrap(),
            CommandApdu::new(0x00, 0xA4, 0x04, 0x0C, Some(vec![9; 300]), Some(65536)).unwrap(),
        ];
        for apdu in cases {
            let encoded = apdu.encode();
            let decoded = CommandApdu::decode(&encoded).unwrap();
            assert_eq!(decoded, apdu);
        }
    }

    #[test]
    fn response_apdu_parse() {
        let r = ResponseApdu::parse(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert_eq!(r.data(), &[0x01, 0x02]);
        assert!(r.is_success());
        assert_eq!(r.sw_value(), 0x9000);
    }

    #[test]
    fn response_apdu_rejects_too_short() {
        assert!(ResponseApdu::parse(&[0x90]).is_err());
    }

    #[test]
    fn status_word_data_remaining() {
        let sw = StatusWord::new(0x6112);
        assert_eq!(sw.data_remaining(), Some(0x12));
        assert_eq!(StatusWord::new(0x9000).data_remaining(), None);
    }

    #[test]
    fn channel_number_round_trip() {
        for ch in 0..=19u8 {
            let cla = set_channel_to_class_byte(0x00, ch).unwrap();
            assert_eq!(parse_channel_number(cla), ch, "channel {ch}");
        }
    }

    #[test]
    fn channel_number_rejects_out_of_range() {
        assert!(set_channel_to_class_byte(0x00, 20).is_err());
    }

    #[test]
    fn clear_channel_number_resets_basic_channel() {
        let cla = set_channel_to_class_byte(0x00, 7).unwrap();
        assert_eq!(parse_channel_number(clear_channel_number(cla)), 0);
    }
}
