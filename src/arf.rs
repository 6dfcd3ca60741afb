//! The PKCS#15 Access Rule File reader (component C6), used when ARA-M is
//! absent and the terminal is a UICC (SPEC_FULL.md section 4.6). Walks
//! `EF(DIR) -> EF(ODF) -> EF(DODF) -> ACMF -> ACRF -> ACCF` and produces
//! the same `REF-AR-DO` shape the ARA-M driver does, so the cache and
//! enforcer never need to know which front-end populated them.
//!
//! `EF(DIR)` is plain ISO 7816-5 BER-TLV (decoded with [`crate::tlv`]); the
//! PKCS#15 object files below it are DER (decoded with [`crate::der`]).
//! The ACRF/ACCF entries embed raw GlobalPlatform `AID-REF-DO`/`Hash-REF-DO`
//! bytes inside DER `OCTET STRING`s, so [`crate::do_objects`] interprets
//! them once unwrapped.

use crate::{
    der::{strip_ff_padding, DerCursor},
    do_objects::{AidRefDo, ApduArDo, ArDo, HashRefDo, NfcArDo, RefArDo, RefDo},
    error::{Error, Result},
    terminal::Terminal,
    tlv::TlvIter,
};
use der::asn1::ObjectIdentifier;

/// `2F00`, `EF(DIR)`'s short file identifier.
pub const FID_DIR: u16 = 0x2F00;
/// `A0 00 00 00 63 50 4B 43 53 2D 31 35`, the literal PKCS#15 AID
/// (ASCII `"PKCS#15"` suffix), an alternative to walking `EF(DIR)`'s OID.
pub const PKCS15_AID: [u8; 12] = [
    0xA0, 0x00, 0x00, 0x00, 0x63, 0x50, 0x4B, 0x43, 0x53, 0x2D, 0x31, 0x35,
];
/// `2.23.143.1.1`, the PKCS#15 `APPLICATION-TEMPLATE` OID in `EF(DIR)`.
pub const PKCS15_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.143.1.1");
/// `1.2.840.114283.200.1.1`, the Access-Control-Main OID inside `EF(DODF)`.
pub const ACMF_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.114283.200.1.1");

const TAG_APPLICATION_TEMPLATE: u16 = 0x61;
const TAG_DIR_AID: u16 = 0x4F;
const TAG_DIR_PATH: u16 = 0x51;

const CLA: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const INS_READ_BINARY: u8 = 0xB0;

/// A `(AID-REF-DO, path-to-ACCF)` entry of `ACRF`.
struct AcrfEntry {
    aid: AidRefDo,
    accf_path: Vec<u8>,
}

/// Reads the PKCS#15 Access Rule File structure over a [`Terminal`] and
/// produces the rule set plus the ACMF's refresh tag.
#[derive(Default)]
pub struct ArfReader;

impl ArfReader {
    pub fn new() -> Self {
        ArfReader
    }

    /// Walk the full chain and return `(rules, refresh_tag)`
    /// (SPEC_FULL.md section 4.6).
    pub fn load(&self, terminal: &mut dyn Terminal) -> Result<(Vec<RefArDo>, [u8; 8])> {
        let pkcs15_df_path = self.locate_pkcs15_df(terminal)?;
        self.select_path(terminal, &pkcs15_df_path)?;

        let odf = self.read_current_file(terminal)?;
        let dodf_path = find_odf_dodf_path(&odf)?;

        self.select_path(terminal, &dodf_path)?;
        let dodf = self.read_current_file(terminal)?;
        let acmf_path = find_dodf_acmf_path(&dodf)?;

        self.select_path(terminal, &acmf_path)?;
        let acmf = self.read_current_file(terminal)?;
        let (refresh_tag, acrf_path) = parse_acmf(&acmf)?;

        self.select_path(terminal, &acrf_path)?;
        let acrf = self.read_current_file(terminal)?;
        let entries = parse_acrf(&acrf)?;

        let mut rules = Vec::new();
        for entry in entries {
            self.select_path(terminal, &entry.accf_path)?;
            let accf = self.read_current_file(terminal)?;
            for hash in parse_accf(&accf)? {
                rules.push(RefArDo {
                    reference: RefDo::new(entry.aid.clone(), hash),
                    // ARF predates fine-grained filters: APDU access is
                    // always a flag; NFC inherits (SPEC_FULL.md 4.6 step 5).
                    rule: ArDo {
                        apdu: Some(ApduArDo::Always),
                        nfc: None,
                    },
                });
            }
        }
        Ok((rules, refresh_tag))
    }

    /// Step 1: read `EF(DIR)` and find the PKCS#15 application's path,
    /// falling back to the literal PKCS#15 AID if `EF(DIR)` carries no
    /// usable entry.
    fn locate_pkcs15_df(&self, terminal: &mut dyn Terminal) -> Result<Vec<u8>> {
        self.select_fid(terminal, FID_DIR)?;
        let dir = self.read_current_file(terminal)?;
        if let Some(path) = find_dir_path_by_aid(&dir, &PKCS15_AID) {
            return Ok(path);
        }
        // No EF(DIR) entry for the literal AID: select it directly and
        // treat "currently selected" as the path root for subsequent reads.
        self.select_aid(terminal, &PKCS15_AID)?;
        Ok(Vec::new())
    }

    fn select_fid(&self, terminal: &mut dyn Terminal, fid: u16) -> Result<()> {
        let bytes = fid.to_be_bytes();
        let apdu = [CLA, INS_SELECT, 0x02, 0x0C, 0x02, bytes[0], bytes[1]];
        self.exchange_expect_success(terminal, &apdu)?;
        Ok(())
    }

    fn select_aid(&self, terminal: &mut dyn Terminal, aid: &[u8]) -> Result<()> {
        let mut apdu = vec![CLA, INS_SELECT, 0x04, 0x0C, aid.len() as u8];
        apdu.extend_from_slice(aid);
        self.exchange_expect_success(terminal, &apdu)?;
        Ok(())
    }

    /// An empty path means "stay on the currently selected file"; a
    /// non-empty path is a sequence of 2-byte file identifiers to select
    /// in turn, mirroring ISO 7816-4's relative-path `SELECT`.
    fn select_path(&self, terminal: &mut dyn Terminal, path: &[u8]) -> Result<()> {
        for fid in path.chunks(2) {
            if fid.len() == 2 {
                self.select_fid(terminal, u16::from_be_bytes([fid[0], fid[1]]))?;
            }
        }
        Ok(())
    }

    fn read_current_file(&self, terminal: &mut dyn Terminal) -> Result<Vec<u8>> {
        let apdu = [CLA, INS_READ_BINARY, 0x00, 0x00, 0x00, 0x00, 0x00];
        let data = self.exchange_expect_success(terminal, &apdu)?;
        Ok(strip_ff_padding(&data).to_vec())
    }

    fn exchange_expect_success(&self, terminal: &mut dyn Terminal, apdu: &[u8]) -> Result<Vec<u8>> {
        let response = terminal.transmit(0, apdu)?;
        if response.len() < 2 {
            return Err(Error::parse("response APDU shorter than 2 bytes"));
        }
        let split = response.len() - 2;
        let sw = u16::from_be_bytes([response[split], response[split + 1]]);
        if sw == crate::util::SW_NOT_FOUND {
            return Err(Error::NoSuchElement(format!(
                "ARF: file or application not present (SW {sw:04X})"
            )));
        }
        if sw != crate::util::SW_SUCCESS {
            return Err(Error::Card(sw));
        }
        Ok(response[..split].to_vec())
    }
}

fn find_dir_path_by_aid(dir: &[u8], target_aid: &[u8]) -> Option<Vec<u8>> {
    for item in TlvIter::new(dir) {
        let header = item.ok()?;
        if header.tag != TAG_APPLICATION_TEMPLATE {
            continue;
        }
        let value = header.value(dir).ok()?;
        let mut aid = None;
        let mut path = None;
        for child in TlvIter::new(value) {
            let child = child.ok()?;
            match child.tag {
                TAG_DIR_AID => aid = child.value(value).ok(),
                TAG_DIR_PATH => path = child.value(value).ok(),
                _ => {}
            }
        }
        if aid == Some(target_aid) {
            return path.map(|p| p.to_vec());
        }
    }
    None
}

/// `EF(ODF)`: `SEQUENCE OF [7] SEQUENCE { path OCTET STRING }`, the
/// `dataObjects` class entries pointing at `EF(DODF)`.
fn find_odf_dodf_path(odf: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = DerCursor::new(odf);
    let mut seq = cursor.read_sequence()?;
    if seq.is_empty() {
        return Err(Error::parse("EF(ODF) contains no dataObjects entry"));
    }
    let (_tag, value) = seq.read_context(7)?;
    let mut entry = DerCursor::new(value);
    let path = entry.read_octet_string()?;
    Ok(path.to_vec())
}

/// `EF(DODF)`: `SEQUENCE OF SEQUENCE { oid OBJECT IDENTIFIER, path OCTET STRING }`.
fn find_dodf_acmf_path(dodf: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = DerCursor::new(dodf);
    while !cursor.is_empty() {
        let mut entry = cursor.read_sequence()?;
        let oid = entry.read_oid()?;
        let path = entry.read_octet_string()?;
        if oid == ACMF_OID {
            return Ok(path.to_vec());
        }
    }
    Err(Error::NoSuchElement(
        "EF(DODF) has no Access-Control-Main entry".to_string(),
    ))
}

/// `ACMF`: `SEQUENCE { refreshTag OCTET STRING (8), acrfPath OCTET STRING }`.
fn parse_acmf(acmf: &[u8]) -> Result<([u8; 8], Vec<u8>)> {
    let mut cursor = DerCursor::new(acmf);
    let mut seq = cursor.read_sequence()?;
    let refresh_tag_bytes = seq.read_octet_string()?;
    if refresh_tag_bytes.len() != 8 {
        return Err(Error::parse("ACMF refresh tag must be 8 bytes"));
    }
    let mut refresh_tag = [0u8; 8];
    refresh_tag.copy_from_slice(refresh_tag_bytes);
    let acrf_path = seq.read_octet_string()?;
    Ok((refresh_tag, acrf_path.to_vec()))
}

/// `ACRF`: `SEQUENCE OF SEQUENCE { aidRefDo OCTET STRING, accfPath OCTET STRING }`.
fn parse_acrf(acrf: &[u8]) -> Result<Vec<AcrfEntry>> {
    let mut cursor = DerCursor::new(acrf);
    let mut entries = Vec::new();
    while !cursor.is_empty() {
        let mut entry = cursor.read_sequence()?;
        let aid_bytes = entry.read_octet_string()?;
        let accf_path = entry.read_octet_string()?;
        let header = crate::tlv::decode_header(aid_bytes, 0, true)?;
        let aid = AidRefDo::interpret(header.tag, header.value(aid_bytes)?)?;
        entries.push(AcrfEntry {
            aid,
            accf_path: accf_path.to_vec(),
        });
    }
    Ok(entries)
}

/// `ACCF`: `SEQUENCE OF OCTET STRING`, each a raw `Hash-REF-DO`.
fn parse_accf(accf: &[u8]) -> Result<Vec<HashRefDo>> {
    let mut cursor = DerCursor::new(accf);
    let mut seq = cursor.read_sequence()?;
    let mut hashes = Vec::new();
    while !seq.is_empty() {
        let hash_bytes = seq.read_octet_string()?;
        let header = crate::tlv::decode_header(hash_bytes, 0, true)?;
        hashes.push(HashRefDo::interpret(header.tag, header.value(hash_bytes)?)?);
    }
    Ok(hashes)
}
