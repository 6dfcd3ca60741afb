//! Typed wrappers for the GlobalPlatform access-control data-object family
//! (component C3): `AID-REF-DO`, `Hash-REF-DO`, `REF-DO`, `APDU-AR-DO`,
//! `NFC-AR-DO`, `AR-DO`, `REF-AR-DO`, and the three response containers.
//!
//! Each type exposes `interpret` (parse its value region, given the already
//! decoded outer tag/length) and `build` (append canonical TLV bytes).
//! Equality and hashing are always defined on those canonical bytes, so two
//! DOs built from differently-ordered-but-equivalent input never compare
//! equal unless their wire encodings would actually be identical.

use crate::{
    error::{Error, Result},
    tlv::{self, TlvIter},
};

/// Tag of a `REF-DO` container.
pub const TAG_REF_DO: u16 = 0xE1;
/// Tag of an `AR-DO` container.
pub const TAG_AR_DO: u16 = 0xE3;
/// Tag of a `REF-AR-DO` container.
pub const TAG_REF_AR_DO: u16 = 0xE2;
/// Tag of an `APDU-AR-DO`.
pub const TAG_APDU_AR_DO: u16 = 0xD0;
/// Tag of an `NFC-AR-DO`.
pub const TAG_NFC_AR_DO: u16 = 0xD1;
/// Tag of the specific/all-SE-applications form of `AID-REF-DO`.
pub const TAG_AID_REF_DO: u16 = 0x4F;
/// Tag of the default-application form of `AID-REF-DO`.
pub const TAG_AID_REF_DO_DEFAULT: u16 = 0xC0;
/// Tag of a `Hash-REF-DO`.
pub const TAG_HASH_REF_DO: u16 = 0xC1;
/// Tag of a `Response-ALL-AR-DO`.
pub const TAG_RESPONSE_ALL_AR_DO: u16 = 0xFF40;
/// Tag of a `Response-AR-DO`.
pub const TAG_RESPONSE_AR_DO: u16 = 0xFF50;
/// Tag of a `Response-RefreshTag-DO`.
pub const TAG_RESPONSE_REFRESH_TAG_DO: u16 = 0xDF20;

/// Identifies the SE application a rule applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AidRefDo {
    /// A concrete 5..=16 byte AID, tag `0x4F`.
    Specific(Vec<u8>),
    /// Wildcard matching every SE application, tag `0x4F`, empty value.
    AllSeApplications,
    /// Sentinel for the SE's default (currently selected) application,
    /// tag `0xC0`, always empty.
    DefaultApplication,
}

impl AidRefDo {
    pub fn tag(&self) -> u16 {
        match self {
            AidRefDo::Specific(_) | AidRefDo::AllSeApplications => TAG_AID_REF_DO,
            AidRefDo::DefaultApplication => TAG_AID_REF_DO_DEFAULT,
        }
    }

    fn value(&self) -> &[u8] {
        match self {
            AidRefDo::Specific(aid) => aid,
            AidRefDo::AllSeApplications | AidRefDo::DefaultApplication => &[],
        }
    }

    /// Build an `AidRefDo` for a caller-supplied AID, normalising `None`
    /// and the all-zero sentinel AID to [`AidRefDo::DefaultApplication`]
    /// per SPEC_FULL.md section 4.4.3.
    pub fn from_caller_aid(aid: Option<&[u8]>) -> Result<Self> {
        match aid {
            None => Ok(AidRefDo::DefaultApplication),
            Some(aid) if aid.iter().all(|b| *b == 0) && aid.len() == 5 => {
                Ok(AidRefDo::DefaultApplication)
            }
            Some(aid) if (5..=16).contains(&aid.len()) => Ok(AidRefDo::Specific(aid.to_vec())),
            Some(aid) => Err(Error::invalid_argument(format!(
                "AID length {} out of range 5..=16",
                aid.len()
            ))),
        }
    }

    pub fn interpret(tag: u16, value: &[u8]) -> Result<Self> {
        match tag {
            TAG_AID_REF_DO_DEFAULT => {
                if !value.is_empty() {
                    return Err(Error::parse("AID-REF-DO (default) must have length 0"));
                }
                Ok(AidRefDo::DefaultApplication)
            }
            TAG_AID_REF_DO => match value.len() {
                0 => Ok(AidRefDo::AllSeApplications),
                5..=16 => Ok(AidRefDo::Specific(value.to_vec())),
                n => Err(Error::parse(format!(
                    "AID-REF-DO length {n} not 0 or in 5..=16"
                ))),
            },
            t => Err(Error::parse(format!("unexpected AID-REF-DO tag {t:04X}"))),
        }
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        tlv::encode_tlv(self.tag(), self.value(), out);
    }
}

/// Identifies the device application a rule applies to, by the SHA-1 hash
/// of its signing certificate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashRefDo {
    /// A 20-byte SHA-1 hash.
    Specific([u8; 20]),
    /// Wildcard matching every device application (empty value, tag `0xC1`).
    AllDeviceApplications,
}

impl HashRefDo {
    pub fn tag(&self) -> u16 {
        TAG_HASH_REF_DO
    }

    fn value(&self) -> &[u8] {
        match self {
            HashRefDo::Specific(hash) => hash,
            HashRefDo::AllDeviceApplications => &[],
        }
    }

    pub fn interpret(tag: u16, value: &[u8]) -> Result<Self> {
        if tag != TAG_HASH_REF_DO {
            return Err(Error::parse(format!("unexpected Hash-REF-DO tag {tag:04X}")));
        }
        // SPEC_FULL.md section 9: the correct guard is `len not in {0, 20}`.
        match value.len() {
            0 => Ok(HashRefDo::AllDeviceApplications),
            20 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(value);
                Ok(HashRefDo::Specific(hash))
            }
            n => Err(Error::parse(format!("Hash-REF-DO length {n} not 0 or 20"))),
        }
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        tlv::encode_tlv(self.tag(), self.value(), out);
    }
}

/// `(AID-REF-DO, Hash-REF-DO)`, the cache key for every stored rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefDo {
    pub aid: AidRefDo,
    pub hash: HashRefDo,
}

impl RefDo {
    pub fn new(aid: AidRefDo, hash: HashRefDo) -> Self {
        RefDo { aid, hash }
    }

    pub fn interpret(value: &[u8]) -> Result<Self> {
        let mut aid = None;
        let mut hash = None;
        for item in TlvIter::new(value) {
            let header = item?;
            match header.tag {
                TAG_AID_REF_DO | TAG_AID_REF_DO_DEFAULT => {
                    if aid.is_some() {
                        return Err(Error::parse("REF-DO contains more than one AID-REF-DO"));
                    }
                    aid = Some(AidRefDo::interpret(header.tag, header.value(value)?)?);
                }
                TAG_HASH_REF_DO => {
                    if hash.is_some() {
                        return Err(Error::parse("REF-DO contains more than one Hash-REF-DO"));
                    }
                    hash = Some(HashRefDo::interpret(header.tag, header.value(value)?)?);
                }
                _ => {} // lenient: unknown sub-TLVs are skipped
            }
        }
        Ok(RefDo {
            aid: aid.ok_or_else(|| Error::parse("REF-DO missing mandatory AID-REF-DO"))?,
            hash: hash.ok_or_else(|| Error::parse("REF-DO missing mandatory Hash-REF-DO"))?,
        })
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        let mut inner = Vec::new();
        self.aid.build(&mut inner);
        self.hash.build(&mut inner);
        tlv::encode_tlv(TAG_REF_DO, &inner, out);
    }

    /// Canonical TLV bytes, used as the cache's hash-map key material.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.build(&mut out);
        out
    }
}

/// A single `(header[4], mask[4])` filter entry of a filter-form `APDU-AR-DO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApduFilter {
    pub header: [u8; 4],
    pub mask: [u8; 4],
}

impl ApduFilter {
    /// `true` when `command`'s first four bytes satisfy `(command & mask) == header`.
    pub fn matches(&self, command: &[u8; 4]) -> bool {
        (0..4).all(|i| command[i] & self.mask[i] == self.header[i])
    }
}

/// The APDU access policy of a rule: an all-or-nothing flag, or a list of
/// command filters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApduArDo {
    Always,
    Never,
    Filters(Vec<ApduFilter>),
}

impl ApduArDo {
    pub fn tag(&self) -> u16 {
        TAG_APDU_AR_DO
    }

    pub fn interpret(tag: u16, value: &[u8]) -> Result<Self> {
        if tag != TAG_APDU_AR_DO {
            return Err(Error::parse(format!("unexpected APDU-AR-DO tag {tag:04X}")));
        }
        match value.len() {
            0 => Err(Error::parse("APDU-AR-DO must have length >= 1")),
            1 => match value[0] {
                0x00 => Ok(ApduArDo::Never),
                0x01 => Ok(ApduArDo::Always),
                b => Err(Error::parse(format!("invalid APDU-AR-DO flag byte {b:02X}"))),
            },
            n if n % 8 == 0 => {
                let filters = value
                    .chunks_exact(8)
                    .map(|chunk| ApduFilter {
                        header: chunk[0..4].try_into().unwrap(),
                        mask: chunk[4..8].try_into().unwrap(),
                    })
                    .collect();
                Ok(ApduArDo::Filters(filters))
            }
            n => Err(Error::parse(format!(
                "APDU-AR-DO length {n} is neither 1 nor a positive multiple of 8"
            ))),
        }
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        let value = match self {
            ApduArDo::Always => vec![0x01],
            ApduArDo::Never => vec![0x00],
            ApduArDo::Filters(filters) => {
                let mut v = Vec::with_capacity(filters.len() * 8);
                for f in filters {
                    v.extend_from_slice(&f.header);
                    v.extend_from_slice(&f.mask);
                }
                v
            }
        };
        tlv::encode_tlv(self.tag(), &value, out);
    }
}

/// The NFC event-notification policy of a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NfcArDo {
    Always,
    Never,
}

impl NfcArDo {
    pub fn tag(&self) -> u16 {
        TAG_NFC_AR_DO
    }

    pub fn interpret(tag: u16, value: &[u8]) -> Result<Self> {
        if tag != TAG_NFC_AR_DO {
            return Err(Error::parse(format!("unexpected NFC-AR-DO tag {tag:04X}")));
        }
        if value.len() != 1 {
            return Err(Error::parse(format!(
                "NFC-AR-DO length {} must be exactly 1",
                value.len()
            )));
        }
        match value[0] {
            0x00 => Ok(NfcArDo::Never),
            0x01 => Ok(NfcArDo::Always),
            b => Err(Error::parse(format!("invalid NFC-AR-DO flag byte {b:02X}"))),
        }
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        let byte = match self {
            NfcArDo::Always => 0x01,
            NfcArDo::Never => 0x00,
        };
        tlv::encode_tlv(self.tag(), &[byte], out);
    }
}

/// `(apdu, nfc)`, at least one of which must be present.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArDo {
    pub apdu: Option<ApduArDo>,
    pub nfc: Option<NfcArDo>,
}

impl ArDo {
    pub fn interpret(value: &[u8]) -> Result<Self> {
        let mut apdu = None;
        let mut nfc = None;
        for item in TlvIter::new(value) {
            let header = item?;
            match header.tag {
                TAG_APDU_AR_DO => {
                    if apdu.is_some() {
                        return Err(Error::parse("AR-DO contains more than one APDU-AR-DO"));
                    }
                    apdu = Some(ApduArDo::interpret(header.tag, header.value(value)?)?);
                }
                TAG_NFC_AR_DO => {
                    if nfc.is_some() {
                        return Err(Error::parse("AR-DO contains more than one NFC-AR-DO"));
                    }
                    nfc = Some(NfcArDo::interpret(header.tag, header.value(value)?)?);
                }
                _ => {}
            }
        }
        if apdu.is_none() && nfc.is_none() {
            return Err(Error::parse("AR-DO must contain an APDU-AR-DO or NFC-AR-DO"));
        }
        Ok(ArDo { apdu, nfc })
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        let mut inner = Vec::new();
        if let Some(apdu) = &self.apdu {
            apdu.build(&mut inner);
        }
        if let Some(nfc) = &self.nfc {
            nfc.build(&mut inner);
        }
        tlv::encode_tlv(TAG_AR_DO, &inner, out);
    }
}

/// `(REF-DO, AR-DO)`, the logical "rule" as transmitted on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefArDo {
    pub reference: RefDo,
    pub rule: ArDo,
}

impl RefArDo {
    pub fn interpret(value: &[u8]) -> Result<Self> {
        let mut reference = None;
        let mut rule = None;
        for item in TlvIter::new(value) {
            let header = item?;
            match header.tag {
                TAG_REF_DO => {
                    if reference.is_some() {
                        return Err(Error::parse("REF-AR-DO contains more than one REF-DO"));
                    }
                    reference = Some(RefDo::interpret(header.value(value)?)?);
                }
                TAG_AR_DO => {
                    if rule.is_some() {
                        return Err(Error::parse("REF-AR-DO contains more than one AR-DO"));
                    }
                    rule = Some(ArDo::interpret(header.value(value)?)?);
                }
                _ => {}
            }
        }
        Ok(RefArDo {
            reference: reference.ok_or_else(|| Error::parse("REF-AR-DO missing REF-DO"))?,
            rule: rule.ok_or_else(|| Error::parse("REF-AR-DO missing AR-DO"))?,
        })
    }

    pub fn build(&self, out: &mut Vec<u8>) {
        let mut inner = Vec::new();
        self.reference.build(&mut inner);
        self.rule.build(&mut inner);
        tlv::encode_tlv(TAG_REF_AR_DO, &inner, out);
    }
}

/// `Response-ALL-AR-DO` (tag `0xFF40`): zero or more concatenated `REF-AR-DO`s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseAllArDo {
    pub rules: Vec<RefArDo>,
}

impl ResponseAllArDo {
    pub fn interpret(value: &[u8]) -> Result<Self> {
        let mut rules = Vec::new();
        for item in TlvIter::new(value) {
            let header = item?;
            if header.tag == TAG_REF_AR_DO {
                rules.push(RefArDo::interpret(header.value(value)?)?);
            }
            // lenient: anything else at this level is skipped
        }
        Ok(ResponseAllArDo { rules })
    }
}

/// `Response-AR-DO` (tag `0xFF50`): zero or one `AR-DO`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseArDo {
    pub rule: Option<ArDo>,
}

impl ResponseArDo {
    pub fn interpret(value: &[u8]) -> Result<Self> {
        match tlv::find_child(value, TAG_AR_DO)? {
            Some((ar_value, _)) => Ok(ResponseArDo {
                rule: Some(ArDo::interpret(ar_value)?),
            }),
            None => Ok(ResponseArDo { rule: None }),
        }
    }
}

/// `Response-RefreshTag-DO` (tag `0xDF20`): an 8-byte opaque refresh tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseRefreshTagDo {
    pub tag: [u8; 8],
}

impl ResponseRefreshTagDo {
    pub fn interpret(value: &[u8]) -> Result<Self> {
        if value.len() != 8 {
            return Err(Error::parse(format!(
                "Response-RefreshTag-DO length {} must be exactly 8",
                value.len()
            )));
        }
        let mut tag = [0u8; 8];
        tag.copy_from_slice(value);
        Ok(ResponseRefreshTagDo { tag })
    }
}

/// A decoded outer response, dispatched on the top-level tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseDo {
    All(ResponseAllArDo),
    Specific(ResponseArDo),
    RefreshTag(ResponseRefreshTagDo),
    /// An outer tag this crate does not interpret; callers may still use
    /// the raw tag/value for logging or pass-through.
    Raw { tag: u16, value: Vec<u8> },
}

/// Dispatches a decoded outer TLV to its typed variant (SPEC_FULL.md
/// section 4.3, "ResponseDoFactory").
pub fn interpret_response(tag: u16, value: &[u8]) -> Result<ResponseDo> {
    match tag {
        TAG_RESPONSE_ALL_AR_DO => Ok(ResponseDo::All(ResponseAllArDo::interpret(value)?)),
        TAG_RESPONSE_AR_DO => Ok(ResponseDo::Specific(ResponseArDo::interpret(value)?)),
        TAG_RESPONSE_REFRESH_TAG_DO => {
            Ok(ResponseDo::RefreshTag(ResponseRefreshTagDo::interpret(value)?))
        }
        other => Ok(ResponseDo::Raw {
            tag: other,
            value: value.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aid_ref_do_default_application() {
        let aid = AidRefDo::interpret(TAG_AID_REF_DO_DEFAULT, &[]).unwrap();
        assert_eq!(aid, AidRefDo::DefaultApplication);
    }

    #[test]
    fn aid_ref_do_all_se_applications() {
        let aid = AidRefDo::interpret(TAG_AID_REF_DO, &[]).unwrap();
        assert_eq!(aid, AidRefDo::AllSeApplications);
    }

    #[test]
    fn aid_ref_do_rejects_out_of_range_lengths() {
        assert!(AidRefDo::interpret(TAG_AID_REF_DO, &[0; 4]).is_err());
        assert!(AidRefDo::interpret(TAG_AID_REF_DO, &[0; 17]).is_err());
        assert!(AidRefDo::interpret(TAG_AID_REF_DO, &[0; 5]).is_ok());
        assert!(AidRefDo::interpret(TAG_AID_REF_DO, &[0; 16]).is_ok());
    }

    #[test]
    fn hash_ref_do_rejects_19_and_21() {
        assert!(HashRefDo::interpret(TAG_HASH_REF_DO, &[0; 19]).is_err());
        assert!(HashRefDo::interpret(TAG_HASH_REF_DO, &[0; 21]).is_err());
        assert!(HashRefDo::interpret(TAG_HASH_REF_DO, &[0; 20]).is_ok());
        assert!(HashRefDo::interpret(TAG_HASH_REF_DO, &[]).is_ok());
    }

    #[test]
    fn ref_do_round_trips() {
        let r = RefDo::new(
            AidRefDo::Specific(vec![0xA0, 0, 0, 6, 0x11, 0x11, 0x22, 0x22]),
            HashRefDo::Specific([0x11; 20]),
        );
        let mut out = Vec::new();
        r.build(&mut out);
        let header = tlv::decode_header(&out, 0, true).unwrap();
        assert_eq!(header.tag, TAG_REF_DO);
        let parsed = RefDo::interpret(header.value(&out).unwrap()).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn ref_do_requires_both_children() {
        let mut aid_only = Vec::new();
        AidRefDo::AllSeApplications.build(&mut aid_only);
        assert!(RefDo::interpret(&aid_only).is_err());
    }

    #[test]
    fn apdu_ar_do_length_zero_is_rejected() {
        assert!(ApduArDo::interpret(TAG_APDU_AR_DO, &[]).is_err());
    }

    #[test]
    fn apdu_ar_do_filters_match_command() {
        let filters = ApduArDo::Filters(vec![ApduFilter {
            header: [0x00, 0xA4, 0x04, 0x00],
            mask: [0xFF, 0xFF, 0xFF, 0xFF],
        }]);
        if let ApduArDo::Filters(filters) = filters {
            assert!(filters[0].matches(&[0x00, 0xA4, 0x04, 0x00]));
            assert!(!filters[0].matches(&[0x80, 0xCA, 0xFF, 0x40]));
        } else {
            unreachable!()
        }
    }

    #[test]
    fn ar_do_requires_at_least_one_child() {
        assert!(ArDo::interpret(&[]).is_err());
    }

    #[test]
    fn ar_do_skips_unknown_children() {
        let mut value = Vec::new();
        tlv::encode_tlv(0x9F, &[0xAA], &mut value);
        NfcArDo::Always.build(&mut value);
        let ar = ArDo::interpret(&value).unwrap();
        assert_eq!(ar.nfc, Some(NfcArDo::Always));
        assert_eq!(ar.apdu, None);
    }

    #[test]
    fn response_all_ar_do_empty_means_no_rules() {
        let response = ResponseAllArDo::interpret(&[]).unwrap();
        assert!(response.rules.is_empty());
    }

    #[test]
    fn response_refresh_tag_requires_length_8() {
        assert!(ResponseRefreshTagDo::interpret(&[0; 7]).is_err());
        assert!(ResponseRefreshTagDo::interpret(&[0; 8]).is_ok());
    }

    #[test]
    fn factory_dispatches_on_outer_tag() {
        let mut all = Vec::new();
        let r = RefArDo {
            reference: RefDo::new(AidRefDo::AllSeApplications, HashRefDo::AllDeviceApplications),
            rule: ArDo {
                apdu: Some(ApduArDo::Always),
                nfc: None,
            },
        };
        r.build(&mut all);
        let response = interpret_response(TAG_RESPONSE_ALL_AR_DO, &all).unwrap();
        match response {
            ResponseDo::All(all) => assert_eq!(all.rules, vec![r]),
            _ => panic!("expected ResponseDo::All"),
        }
    }

    #[test]
    fn from_caller_aid_normalises_null_and_zero_to_default() {
        assert_eq!(
            AidRefDo::from_caller_aid(None).unwrap(),
            AidRefDo::DefaultApplication
        );
        assert_eq!(
            AidRefDo::from_caller_aid(Some(&[0, 0, 0, 0, 0])).unwrap(),
            AidRefDo::DefaultApplication
        );
        assert_eq!(
            AidRefDo::from_caller_aid(Some(&[0xA0, 0, 0, 1, 1])).unwrap(),
            AidRefDo::Specific(vec![0xA0, 0, 0, 1, 1])
        );
    }
}
