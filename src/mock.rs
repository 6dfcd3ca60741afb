//! Test fixtures (component C11): an in-memory [`MockTerminal`] and
//! [`MockPackageManager`] that play back a scripted sequence of
//! exchanges, plus a small JSON-friendly [`FixtureRule`] mirroring a
//! `REF-AR-DO`. None of this hits real hardware; it exists so C4-C7 can
//! be exercised from unit tests and the demonstration binary (C12)
//! alike, the same role the teacher's own crate gives its test-only
//! helpers.

use crate::{
    do_objects::{AidRefDo, ApduArDo, ArDo, HashRefDo, NfcArDo, RefArDo, RefDo},
    error::{Error, Result},
    terminal::{PackageManager, Terminal},
    util::SW_NOT_FOUND,
};
use std::collections::{HashMap, VecDeque};

/// A single scripted response to the next `transmit` on some channel.
pub struct RecordedExchange {
    response: Vec<u8>,
}

impl RecordedExchange {
    /// Respond with `response` regardless of what was sent.
    pub fn any_returns(response: Vec<u8>) -> Self {
        RecordedExchange { response }
    }
}

enum OpenChannelStep {
    Success {
        expected_aid: Option<Vec<u8>>,
        channel: u8,
        select_response: Vec<u8>,
    },
    NotPresent,
}

/// A scripted [`Terminal`]: every `open_logical_channel`/`transmit` call
/// consumes the next queued step, panicking (via `unwrap`-style errors)
/// if the script runs dry, so a test's expectations are exhaustive.
pub struct MockTerminal {
    name: String,
    open_channel_script: VecDeque<OpenChannelStep>,
    exchanges: HashMap<u8, VecDeque<RecordedExchange>>,
    sim_io: VecDeque<RecordedExchange>,
}

impl MockTerminal {
    pub fn new(name: impl Into<String>) -> Self {
        MockTerminal {
            name: name.into(),
            open_channel_script: VecDeque::new(),
            exchanges: HashMap::new(),
            sim_io: VecDeque::new(),
        }
    }

    /// Queue a successful `open_logical_channel(Some(aid), _)` returning
    /// `channel` with `select_response`.
    pub fn expect_open_channel(&mut self, aid: &[u8], channel: u8, select_response: Vec<u8>) {
        self.open_channel_script.push_back(OpenChannelStep::Success {
            expected_aid: Some(aid.to_vec()),
            channel,
            select_response,
        });
    }

    /// Queue a basic-channel (no explicit open) step by just registering
    /// exchanges against channel 0; nothing to push here, kept for
    /// readability at call sites.
    pub fn expect_open_basic_channel(&mut self) {}

    /// Queue a failing `open_logical_channel` mapped to "applet/file not
    /// present" (`SW 6A82`), per SPEC_FULL.md section 4.5.
    pub fn fail_open_channel_not_present(&mut self) {
        self.open_channel_script.push_back(OpenChannelStep::NotPresent);
    }

    /// Queue the next `transmit` on `channel` to return `exchange`.
    pub fn expect_exchange(&mut self, channel: u8, exchange: RecordedExchange) {
        self.exchanges.entry(channel).or_default().push_back(exchange);
    }

    /// Queue the next `sim_io_exchange` call to return `exchange`.
    pub fn expect_sim_io(&mut self, exchange: RecordedExchange) {
        self.sim_io.push_back(exchange);
    }

    /// Script a full ARA-M `GET DATA [RefreshTag]` + `GET DATA [All]`
    /// round trip: the applet reports `refresh_tag`, then `rules`
    /// verbatim, each on its own freshly opened logical channel. Used by
    /// the demonstration binary and by tests that want to exercise the
    /// wire protocol rather than pre-populate the cache directly.
    pub fn with_ara_rules(
        name: impl Into<String>,
        refresh_tag: [u8; 8],
        rules: &[RefArDo],
    ) -> Self {
        let mut terminal = MockTerminal::new(name);

        let mut tag_response = Vec::new();
        crate::tlv::encode_tlv(
            crate::do_objects::TAG_RESPONSE_REFRESH_TAG_DO,
            &refresh_tag,
            &mut tag_response,
        );
        tag_response.extend_from_slice(&0x9000u16.to_be_bytes());
        terminal.expect_open_channel(&crate::ara::ARA_M_AID, 1, vec![]);
        terminal.expect_exchange(1, RecordedExchange::any_returns(tag_response));

        let mut all_value = Vec::new();
        for rule in rules {
            rule.build(&mut all_value);
        }
        let mut all_response = Vec::new();
        crate::tlv::encode_tlv(
            crate::do_objects::TAG_RESPONSE_ALL_AR_DO,
            &all_value,
            &mut all_response,
        );
        all_response.extend_from_slice(&0x9000u16.to_be_bytes());
        terminal.expect_open_channel(&crate::ara::ARA_M_AID, 1, vec![]);
        terminal.expect_exchange(1, RecordedExchange::any_returns(all_response));

        terminal
    }
}

impl Terminal for MockTerminal {
    fn open_logical_channel(&mut self, aid: Option<&[u8]>, _p2: u8) -> Result<(u8, Vec<u8>)> {
        match self.open_channel_script.pop_front() {
            Some(OpenChannelStep::Success {
                expected_aid,
                channel,
                select_response,
            }) => {
                if let (Some(expected), Some(aid)) = (&expected_aid, aid) {
                    if expected.as_slice() != aid {
                        return Err(Error::invalid_argument("unexpected AID in open_logical_channel"));
                    }
                }
                Ok((channel, select_response))
            }
            Some(OpenChannelStep::NotPresent) => Err(Error::Card(SW_NOT_FOUND)),
            None => Err(Error::MissingResource(
                "MockTerminal: no scripted open_logical_channel call remaining".to_string(),
            )),
        }
    }

    fn close_logical_channel(&mut self, _channel_number: u8) -> Result<()> {
        Ok(())
    }

    fn transmit(&mut self, channel_number: u8, _apdu: &[u8]) -> Result<Vec<u8>> {
        let queue = self.exchanges.get_mut(&channel_number).ok_or_else(|| {
            Error::MissingResource(format!(
                "MockTerminal: no exchanges scripted for channel {channel_number}"
            ))
        })?;
        let step = queue.pop_front().ok_or_else(|| {
            Error::MissingResource(format!(
                "MockTerminal: exchange script exhausted for channel {channel_number}"
            ))
        })?;
        Ok(step.response)
    }

    fn sim_io_exchange(&mut self, _file_id: u16, _path: &str, _cmd: &[u8]) -> Result<Vec<u8>> {
        let step = self.sim_io.pop_front().ok_or_else(|| {
            Error::MissingResource("MockTerminal: sim_io script exhausted".to_string())
        })?;
        Ok(step.response)
    }

    fn get_atr(&self) -> Option<Vec<u8>> {
        None
    }

    fn is_card_present(&self) -> bool {
        true
    }

    fn terminal_name(&self) -> String {
        self.name.clone()
    }
}

/// A scripted [`PackageManager`]: a fixed table of package -> signing
/// certificates (as raw bytes; this crate never parses X.509 structure).
#[derive(Default)]
pub struct MockPackageManager {
    packages: HashMap<u32, Vec<String>>,
    certificates: HashMap<String, Vec<Vec<u8>>>,
}

impl MockPackageManager {
    pub fn new() -> Self {
        MockPackageManager::default()
    }

    pub fn with_package(mut self, uid: u32, package_name: impl Into<String>) -> Self {
        self.packages.entry(uid).or_default().push(package_name.into());
        self
    }

    pub fn with_certificates(
        mut self,
        package_name: impl Into<String>,
        certs: Vec<Vec<u8>>,
    ) -> Self {
        self.certificates.insert(package_name.into(), certs);
        self
    }
}

impl PackageManager for MockPackageManager {
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>> {
        Ok(self.packages.get(&uid).cloned().unwrap_or_default())
    }

    fn signing_certificates(&self, package_name: &str) -> Result<Vec<Vec<u8>>> {
        self.certificates
            .get(package_name)
            .cloned()
            .ok_or_else(|| Error::NoSuchElement(format!("unknown package {package_name}")))
    }
}

/// A JSON-friendly mirror of a `REF-AR-DO`, for building fixture rule
/// sets in tests and the demonstration binary without hand-assembling
/// TLV bytes (SPEC_FULL.md section 3.1).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FixtureRule {
    /// `None` means "all SE applications"; `Some(vec![])` is rejected by
    /// `AidRefDo::interpret` the same way a real rule would be.
    #[serde(default, with = "base64_opt")]
    pub aid: Option<Vec<u8>>,
    /// `None` means "all device applications".
    #[serde(default, with = "hex_opt_20")]
    pub cert_sha1: Option<[u8; 20]>,
    pub apdu_always: bool,
    pub nfc_always: Option<bool>,
}

impl FixtureRule {
    pub fn to_ref_ar_do(&self) -> RefArDo {
        let aid = match &self.aid {
            Some(bytes) if bytes.is_empty() => AidRefDo::AllSeApplications,
            Some(bytes) => AidRefDo::Specific(bytes.clone()),
            None => AidRefDo::AllSeApplications,
        };
        let hash = match self.cert_sha1 {
            Some(h) => HashRefDo::Specific(h),
            None => HashRefDo::AllDeviceApplications,
        };
        let apdu = Some(if self.apdu_always {
            ApduArDo::Always
        } else {
            ApduArDo::Never
        });
        let nfc = self.nfc_always.map(|always| {
            if always {
                NfcArDo::Always
            } else {
                NfcArDo::Never
            }
        });
        RefArDo {
            reference: RefDo::new(aid, hash),
            rule: ArDo { apdu, nfc },
        }
    }
}

/// Load every [`FixtureRule`] out of the JSON array files matching
/// `pattern` (e.g. `"fixtures/*.json"`), concatenated in glob order.
/// Mirrors the teacher's own `cfg(not(lib))`-gated `glob` dependency,
/// here used to assemble a rule set from a directory of fixtures rather
/// than one file.
pub fn load_fixture_rules(pattern: &str) -> Result<Vec<FixtureRule>> {
    let mut rules = Vec::new();
    for entry in glob::glob(pattern).map_err(|e| Error::invalid_argument(e.to_string()))? {
        let path = entry.map_err(|e| Error::Io(e.to_string()))?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        let mut parsed: Vec<FixtureRule> = serde_json::from_str(&text)
            .map_err(|e| Error::parse(format!("{}: {e}", path.display())))?;
        rules.append(&mut parsed);
    }
    Ok(rules)
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        match opt {
            None => Ok(None),
            Some(s) => STANDARD.decode(s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

mod hex_opt_20 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<[u8; 20]>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 20]>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
                let array: [u8; 20] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("cert_sha1 must be 20 bytes"))?;
                Ok(Some(array))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_rule_round_trips_through_json() {
        let rule = FixtureRule {
            aid: Some(vec![0xA0, 0, 0, 6, 1, 1, 1, 1]),
            cert_sha1: Some([0x11; 20]),
            apdu_always: true,
            nfc_always: Some(true),
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: FixtureRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.aid, rule.aid);
        assert_eq!(back.cert_sha1, rule.cert_sha1);
    }

    #[test]
    fn fixture_rule_converts_to_ref_ar_do() {
        let rule = FixtureRule {
            aid: Some(vec![0xA0, 0, 0, 6, 1, 1, 1, 1]),
            cert_sha1: Some([0x11; 20]),
            apdu_always: true,
            nfc_always: None,
        };
        let ref_ar_do = rule.to_ref_ar_do();
        assert_eq!(
            ref_ar_do.reference.aid,
            AidRefDo::Specific(vec![0xA0, 0, 0, 6, 1, 1, 1, 1])
        );
        assert_eq!(ref_ar_do.rule.apdu, Some(ApduArDo::Always));
    }

    #[test]
    fn mock_package_manager_looks_up_certificates() {
        let pm = MockPackageManager::new()
            .with_package(1000, "com.example.app")
            .with_certificates("com.example.app", vec![b"cert".to_vec()]);
        assert_eq!(pm.packages_for_uid(1000).unwrap(), vec!["com.example.app"]);
        assert_eq!(
            pm.signing_certificates("com.example.app").unwrap(),
            vec![b"cert".to_vec()]
        );
    }
}
