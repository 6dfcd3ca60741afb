//! The ARA-M protocol driver (component C5): opens a logical channel
//! against the Access Rule Applet - Master and issues `GET DATA`
//! [All]/[Specific]/[Next]/[RefreshTag], including the multi-APDU
//! chaining `[All]`/`[Specific]` responses require when the rule set
//! overflows one fragment (SPEC_FULL.md section 4.5).

use crate::{
    do_objects::{self, AidRefDo, ArDo, RefArDo, ResponseDo},
    error::{Error, Result},
    terminal::Terminal,
    tlv,
    util::{ARA_MAX_FRAGMENT, ARA_SHORT_LE, SW_NOT_FOUND, SW_REFERENCED_DATA_NOT_FOUND, SW_SUCCESS},
};

/// `A0 00 00 01 51 41 43 4C 00`, the ARA-M applet AID.
pub const ARA_M_AID: [u8; 9] = [0xA0, 0x00, 0x00, 0x01, 0x51, 0x41, 0x43, 0x4C, 0x00];

const CLA: u8 = 0x80;
const INS_GET_DATA: u8 = 0xCA;
const P1P2_ALL: (u8, u8) = (0xFF, 0x40);
const P1P2_SPECIFIC: (u8, u8) = (0xFF, 0x50);
const P1P2_NEXT: (u8, u8) = (0xFF, 0x60);
const P1P2_REFRESH_TAG: (u8, u8) = (0xDF, 0x20);

/// Drives the ARA-M wire protocol over a [`Terminal`]. Stateless: every
/// call opens its own logical channel and closes it before returning, per
/// the concurrency model's "never holding a channel across decisions"
/// rule (SPEC_FULL.md section 5).
#[derive(Default)]
pub struct AraDriver;

impl AraDriver {
    pub fn new() -> Self {
        AraDriver
    }

    /// Fetch the SE's current 8-byte refresh tag.
    pub fn read_refresh_tag(&self, terminal: &mut dyn Terminal) -> Result<[u8; 8]> {
        let channel = self.open_channel(terminal)?;
        let result = (|| {
            let apdu = build_get_data(P1P2_REFRESH_TAG, None);
            let (data, sw) = exchange(terminal, channel, &apdu)?;
            if sw != SW_SUCCESS {
                return Err(card_error(sw));
            }
            let header = tlv::decode_header(&data, 0, true)?;
            match do_objects::interpret_response(header.tag, header.value(&data)?)? {
                ResponseDo::RefreshTag(tag) => Ok(tag.tag),
                _ => Err(Error::parse("GET DATA [RefreshTag] returned unexpected DO")),
            }
        })();
        terminal.close_logical_channel(channel)?;
        result
    }

    /// Fetch every rule the ARA-M currently holds (`GET DATA [All]`),
    /// transparently chaining `[Next]` calls until the declared TLV
    /// length is fully buffered.
    pub fn load_all_rules(&self, terminal: &mut dyn Terminal) -> Result<Vec<RefArDo>> {
        let channel = self.open_channel(terminal)?;
        let result = (|| {
            let first = build_get_data(P1P2_ALL, None);
            let buffer = self.fetch_chained(terminal, channel, &first)?;
            match buffer {
                None => Ok(Vec::new()),
                Some(buffer) => {
                    let header = tlv::decode_header(&buffer, 0, true)?;
                    match do_objects::interpret_response(header.tag, header.value(&buffer)?)? {
                        ResponseDo::All(all) => Ok(all.rules),
                        _ => Err(Error::parse("GET DATA [All] returned unexpected DO")),
                    }
                }
            }
        })();
        terminal.close_logical_channel(channel)?;
        result
    }

    /// `GET DATA [Specific]` for a single AID.
    pub fn load_specific(
        &self,
        terminal: &mut dyn Terminal,
        aid: &AidRefDo,
    ) -> Result<Option<ArDo>> {
        let channel = self.open_channel(terminal)?;
        let result = (|| {
            let mut request_value = Vec::new();
            aid.build(&mut request_value);
            let first = build_get_data(P1P2_SPECIFIC, Some(&request_value));
            let buffer = self.fetch_chained(terminal, channel, &first)?;
            match buffer {
                None => Ok(None),
                Some(buffer) => {
                    let header = tlv::decode_header(&buffer, 0, true)?;
                    match do_objects::interpret_response(header.tag, header.value(&buffer)?)? {
                        ResponseDo::Specific(response) => Ok(response.rule),
                        _ => Err(Error::parse("GET DATA [Specific] returned unexpected DO")),
                    }
                }
            }
        })();
        terminal.close_logical_channel(channel)?;
        result
    }

    fn open_channel(&self, terminal: &mut dyn Terminal) -> Result<u8> {
        match terminal.open_logical_channel(Some(&ARA_M_AID), 0x00) {
            Ok((channel, _select_response)) => Ok(channel),
            Err(Error::Card(sw)) if sw == SW_NOT_FOUND => {
                Err(Error::NoSuchElement("ARA-M applet not present".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Issue `first`, then repeat `[Next]` until the declared outer TLV
    /// length is fully buffered. Returns `None` when the initial exchange
    /// reports "no data" (`6A88`), meaning an empty rule set.
    fn fetch_chained(
        &self,
        terminal: &mut dyn Terminal,
        channel: u8,
        first: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let (data, sw) = exchange(terminal, channel, first)?;
        if sw == SW_REFERENCED_DATA_NOT_FOUND {
            return Ok(None);
        }
        if sw != SW_SUCCESS {
            return Err(card_error(sw));
        }

        let mut buffer = data;
        let header = tlv::decode_header(&buffer, 0, false)?;
        let expected = header.end();

        while buffer.len() < expected {
            let remaining = expected - buffer.len();
            let le = remaining.min(ARA_MAX_FRAGMENT);
            let next = build_get_data(P1P2_NEXT, None).clone_with_le(le as u8);
            let (chunk, sw) = exchange(terminal, channel, &next)?;
            if sw != SW_SUCCESS {
                return Err(card_error(sw));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Some(buffer))
    }
}

fn card_error(sw: u16) -> Error {
    Error::Card(sw)
}

/// Build a `GET DATA` command APDU (`CLA=80 INS=CA`) with the ARA-M's
/// conventional short `Le=0xF0`.
fn build_get_data(p1p2: (u8, u8), data: Option<&[u8]>) -> GetDataApdu {
    GetDataApdu {
        p1: p1p2.0,
        p2: p1p2.1,
        data: data.map(|d| d.to_vec()),
        le: ARA_SHORT_LE,
    }
}

/// A thin, chaining-specific APDU builder. The general-purpose
/// [`crate::apdu::CommandApdu`] form-selection rules would pick a
/// different encoding for a bare `Le`-only command than the fixed
/// `CLA INS P1 P2 Lc Data Le` shape ARA-M expects, so `GET DATA` is built
/// directly here rather than through `CommandApdu::encode`.
struct GetDataApdu {
    p1: u8,
    p2: u8,
    data: Option<Vec<u8>>,
    le: u8,
}

impl GetDataApdu {
    fn clone_with_le(&self, le: u8) -> GetDataApdu {
        GetDataApdu {
            p1: self.p1,
            p2: self.p2,
            data: self.data.clone(),
            le,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![CLA, INS_GET_DATA, self.p1, self.p2];
        if let Some(data) = &self.data {
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }
        out.push(self.le);
        out
    }
}

fn exchange(terminal: &mut dyn Terminal, channel: u8, apdu: &GetDataApdu) -> Result<(Vec<u8>, u16)> {
    let raw = apdu.encode();
    let response = terminal.transmit(channel, &raw)?;
    if response.len() < 2 {
        return Err(Error::parse("response APDU shorter than 2 bytes"));
    }
    let split = response.len() - 2;
    let sw = u16::from_be_bytes([response[split], response[split + 1]]);
    Ok((response[..split].to_vec(), sw))
}
