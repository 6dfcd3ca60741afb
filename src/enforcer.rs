//! The Access Control Enforcer (component C7): orchestrates rule-set
//! initialisation (ARA-M first, ARF as fallback, full-access as a last
//! resort on non-UICC terminals), turns a channel-open request into a
//! [`ChannelAccess`] verdict, and enforces it on every subsequent
//! `transmit` (SPEC_FULL.md section 4.7).
//!
//! State is guarded by a single coarse [`std::sync::Mutex`] (Design Notes,
//! SPEC_FULL.md section 9: "a single coarse mutex over the cache +
//! enforcer state is sufficient; rule reloads are rare").

use crate::{
    access::{Access, ChannelAccess},
    ara::AraDriver,
    arf::ArfReader,
    cache::AccessRuleCache,
    config::SecurityProfile,
    do_objects::AidRefDo,
    error::{Error, Result},
    terminal::{hash_certificates, PackageManager, Terminal},
};
use std::sync::Mutex;

/// The enforcer's one-shot initialisation outcome (SPEC_FULL.md section
/// 4.7, "State machine for ACE initialisation"). The transient
/// `AraProbing`/`ArfProbing` states of the spec's state machine are not
/// separately observable here: `initialize` runs the whole probe under
/// the lock and only the resulting terminal state is published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnforcerStatus {
    Uninitialised,
    AraLoaded,
    ArfLoaded,
    FullAccess,
    Denied(String),
}

/// A channel as far as the enforcer is concerned: a logical channel
/// number and the access verdict it was opened with.
#[derive(Clone, Debug)]
pub struct Channel {
    pub channel_number: u8,
    pub access: ChannelAccess,
}

struct Locked<T: Terminal> {
    terminal: T,
    cache: AccessRuleCache,
    status: EnforcerStatus,
}

/// Owns one terminal's rule cache and initialisation state. One instance
/// per terminal, never a global (Design Notes, SPEC_FULL.md section 9).
pub struct Enforcer<T: Terminal, P: PackageManager> {
    locked: Mutex<Locked<T>>,
    package_manager: P,
    profile: SecurityProfile,
}

impl<T: Terminal, P: PackageManager> Enforcer<T, P> {
    pub fn new(terminal: T, package_manager: P, profile: SecurityProfile) -> Self {
        Enforcer {
            locked: Mutex::new(Locked {
                terminal,
                cache: AccessRuleCache::new(),
                status: EnforcerStatus::Uninitialised,
            }),
            package_manager,
            profile,
        }
    }

    pub fn status(&self) -> EnforcerStatus {
        self.locked.lock().unwrap().status.clone()
    }

    /// Back to `Uninitialised` with an empty cache (SPEC_FULL.md section 4.7).
    pub fn reset(&self) {
        let mut locked = self.locked.lock().unwrap();
        locked.status = EnforcerStatus::Uninitialised;
        locked.cache.reset();
    }

    /// Probe ARA-M, then ARF, then fall back to full-access or deny,
    /// per SPEC_FULL.md section 4.7's policy table. Reloads the cache
    /// only when the observed refresh tag differs from the cached one,
    /// and does so as a single critical section (section 5: "never a
    /// half-flushed cache").
    pub fn initialize(&self) -> Result<()> {
        let mut locked = self.locked.lock().unwrap();
        let is_uicc = locked.terminal.is_uicc();

        if self.profile.use_ara {
            let driver = AraDriver::new();
            match driver.read_refresh_tag(&mut locked.terminal) {
                Ok(tag) => {
                    if !locked.cache.is_refresh_tag_equal(&tag) {
                        match driver.load_all_rules(&mut locked.terminal) {
                            Ok(rules) => {
                                locked.cache.set_refresh_tag(tag);
                                locked.cache.clear_cache();
                                locked.cache.merge_all(&rules);
                            }
                            Err(e) => {
                                locked.status =
                                    EnforcerStatus::Denied(format!("ARA rule load failed: {e}"));
                                return Ok(());
                            }
                        }
                    }
                    locked.status = EnforcerStatus::AraLoaded;
                    return Ok(());
                }
                Err(Error::NoSuchElement(_)) => {
                    // ARA applet not present: fall through to ARF/full-access.
                }
                Err(e) => {
                    locked.status = EnforcerStatus::Denied(format!("ARA unavailable: {e}"));
                    return Ok(());
                }
            }
        }

        if self.profile.use_arf && is_uicc {
            let reader = ArfReader::new();
            match reader.load(&mut locked.terminal) {
                Ok((rules, tag)) => {
                    if !locked.cache.is_refresh_tag_equal(&tag) {
                        locked.cache.set_refresh_tag(tag);
                        locked.cache.clear_cache();
                        locked.cache.merge_all(&rules);
                    }
                    locked.status = EnforcerStatus::ArfLoaded;
                    return Ok(());
                }
                Err(Error::NoSuchElement(_)) => {
                    // No PKCS#15 ARF either: fall through.
                }
                Err(e) => {
                    locked.status = EnforcerStatus::Denied(format!("ARF unavailable: {e}"));
                    return Ok(());
                }
            }
        }

        // Neither ARA nor ARF produced a rule set: this is the only branch
        // that consults `SecurityProfile::full_access` (SPEC_FULL.md
        // section 6.4, "ignored ... unless rules are genuinely
        // unavailable"). It is irrelevant once rules load successfully and
        // irrelevant after a hard error, both handled above.
        if self.profile.full_access {
            locked.status = EnforcerStatus::FullAccess;
        } else {
            locked.status = EnforcerStatus::Denied(if is_uicc {
                "neither ARA nor ARF available on a UICC terminal, and full_access is disabled"
                    .to_string()
            } else {
                "neither ARA nor ARF available, and full_access is disabled".to_string()
            });
        }
        Ok(())
    }

    /// Resolve a `(aid, package_name)` pair to the `ChannelAccess` a new
    /// channel should carry (SPEC_FULL.md section 4.7).
    pub fn set_up_channel_access(
        &self,
        aid: Option<&[u8]>,
        package_name: &str,
    ) -> Result<ChannelAccess> {
        if package_name.is_empty() {
            return Err(Error::invalid_argument("package name must not be empty"));
        }
        let aid_ref = AidRefDo::from_caller_aid(aid)?;

        let mut locked = self.locked.lock().unwrap();
        let full_access = match &locked.status {
            EnforcerStatus::Denied(reason) => {
                return Err(Error::access_denied(reason.clone()));
            }
            EnforcerStatus::Uninitialised => {
                return Err(Error::access_denied("enforcer not initialised"));
            }
            EnforcerStatus::FullAccess => true,
            EnforcerStatus::AraLoaded | EnforcerStatus::ArfLoaded => false,
        };

        let certs = self.package_manager.signing_certificates(package_name)?;
        let cert_hashes = hash_certificates(&certs);

        let found = locked.cache.find_access_rule(&aid_ref, &cert_hashes);
        let mut ca = match found {
            Some(ca) => ca,
            None if full_access => ChannelAccess::allow_all("full access (no specific rule)"),
            None => return Err(Error::access_denied("no APDU access allowed")),
        };

        if !(ca.apdu_access == Access::Allowed || ca.use_filter) {
            if full_access {
                ca = ChannelAccess::allow_all("full access fallback");
            } else {
                return Err(Error::access_denied("no APDU access allowed"));
            }
        }

        ca.package_name = Some(package_name.to_string());
        Ok(ca)
    }

    /// Enforce a channel's stored access on the next `transmit`
    /// (SPEC_FULL.md section 4.7).
    pub fn check_command(&self, channel: &Channel, command_apdu: &[u8]) -> Result<()> {
        if channel.access.access != Access::Allowed {
            return Err(Error::access_denied(channel.access.reason.clone()));
        }
        if channel.access.use_filter {
            if command_apdu.len() < 4 {
                return Err(Error::invalid_argument("command APDU shorter than 4 bytes"));
            }
            let header: [u8; 4] = command_apdu[0..4].try_into().unwrap();
            if channel.access.filters.iter().any(|f| f.matches(&header)) {
                Ok(())
            } else {
                Err(Error::access_denied("command APDU rejected by filter"))
            }
        } else if channel.access.apdu_access == Access::Allowed {
            Ok(())
        } else {
            Err(Error::access_denied("APDU access not allowed"))
        }
    }

    /// Gate NFC HCI transaction events for a list of packages
    /// (SPEC_FULL.md section 4.7).
    pub fn is_nfc_event_allowed(&self, aid: Option<&[u8]>, package_names: &[String]) -> Vec<bool> {
        let locked = self.locked.lock().unwrap();
        let aid_ref = match AidRefDo::from_caller_aid(aid) {
            Ok(a) => a,
            Err(_) => return vec![false; package_names.len()],
        };
        match &locked.status {
            EnforcerStatus::AraLoaded | EnforcerStatus::ArfLoaded => package_names
                .iter()
                .map(|pkg| {
                    self.package_manager
                        .signing_certificates(pkg)
                        .ok()
                        .map(|certs| hash_certificates(&certs))
                        .and_then(|hashes| locked.cache.find_access_rule(&aid_ref, &hashes))
                        .map(|ca| ca.nfc_access == Access::Allowed)
                        .unwrap_or(false)
                })
                .collect(),
            EnforcerStatus::FullAccess => vec![true; package_names.len()],
            _ => vec![false; package_names.len()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        do_objects::{AidRefDo as Aid, ApduArDo, HashRefDo, NfcArDo, RefArDo, RefDo},
        mock::{MockPackageManager, MockTerminal},
    };

    fn terminal_with_refresh_tag_and_rules(tag: [u8; 8], rules: &[RefArDo]) -> MockTerminal {
        MockTerminal::with_ara_rules("eSE", tag, rules)
    }

    #[test]
    fn end_to_end_specific_allow_via_mock_ara() {
        let aid = vec![0xA0, 0, 0, 6, 0x11, 0x11, 0x22, 0x22];
        let cert = b"com.example.app signing cert".to_vec();
        let hash = hash_certificates(std::slice::from_ref(&cert))[0];
        let rule = RefArDo {
            reference: RefDo::new(Aid::Specific(aid.clone()), HashRefDo::Specific(hash)),
            rule: crate::do_objects::ArDo {
                apdu: Some(ApduArDo::Always),
                nfc: Some(NfcArDo::Always),
            },
        };
        let terminal = terminal_with_refresh_tag_and_rules([0xAA; 8], &[rule]);
        let package_manager =
            MockPackageManager::new().with_certificates("com.example.app", vec![cert]);
        let enforcer = Enforcer::new(terminal, package_manager, SecurityProfile::default());
        enforcer.initialize().unwrap();
        assert_eq!(enforcer.status(), EnforcerStatus::AraLoaded);

        let ca = enforcer
            .set_up_channel_access(Some(&aid), "com.example.app")
            .unwrap();
        assert_eq!(ca.apdu_access, Access::Allowed);
        assert_eq!(ca.nfc_access, Access::Allowed);

        let channel = Channel {
            channel_number: 2,
            access: ca,
        };
        assert!(enforcer
            .check_command(&channel, &[0x00, 0xA4, 0x04, 0x00, 0x08])
            .is_ok());
    }

    #[test]
    fn specific_hash_mismatch_is_denied_end_to_end() {
        let aid = vec![0xA0, 0, 0, 6, 0x11, 0x11, 0x22, 0x22];
        let hash = [0x11u8; 20];
        let rule = RefArDo {
            reference: RefDo::new(Aid::Specific(aid.clone()), HashRefDo::Specific(hash)),
            rule: crate::do_objects::ArDo {
                apdu: Some(ApduArDo::Always),
                nfc: Some(NfcArDo::Always),
            },
        };
        let terminal = terminal_with_refresh_tag_and_rules([0xAA; 8], &[rule]);
        let package_manager =
            MockPackageManager::new().with_certificates("com.example.app", vec![vec![0u8; 4]]);
        let enforcer = Enforcer::new(terminal, package_manager, SecurityProfile::default());
        enforcer.initialize().unwrap();
        assert_eq!(enforcer.status(), EnforcerStatus::AraLoaded);

        let err = enforcer
            .set_up_channel_access(Some(&aid), "com.example.app")
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[test]
    fn check_command_enforces_filter_list() {
        let aid = vec![0xA0, 0, 0, 6, 1, 1, 1, 1];
        let cert = b"signing-cert".to_vec();
        let cert_hash = hash_certificates(std::slice::from_ref(&cert))[0];
        let rule = RefArDo {
            reference: RefDo::new(Aid::Specific(aid.clone()), HashRefDo::Specific(cert_hash)),
            rule: crate::do_objects::ArDo {
                apdu: Some(ApduArDo::Filters(vec![crate::do_objects::ApduFilter {
                    header: [0x00, 0xA4, 0x04, 0x00],
                    mask: [0xFF, 0xFF, 0xFF, 0xFF],
                }])),
                nfc: None,
            },
        };
        let terminal = terminal_with_refresh_tag_and_rules([0xBB; 8], &[rule]);
        let package_manager =
            MockPackageManager::new().with_certificates("com.example.app", vec![cert]);

        let enforcer = Enforcer::new(terminal, package_manager, SecurityProfile::default());
        enforcer.initialize().unwrap();
        let ca = enforcer
            .set_up_channel_access(Some(&aid), "com.example.app")
            .unwrap();
        assert!(ca.use_filter);

        let channel = Channel {
            channel_number: 2,
            access: ca,
        };
        assert!(enforcer
            .check_command(&channel, &[0x00, 0xA4, 0x04, 0x00, 0x08])
            .is_ok());
        assert!(enforcer
            .check_command(&channel, &[0x80, 0xCA, 0xFF, 0x40, 0x00])
            .is_err());
    }

    #[test]
    fn full_access_on_non_uicc_terminal_with_no_rules() {
        let mut terminal = MockTerminal::new("eSE");
        terminal.fail_open_channel_not_present();
        let package_manager = MockPackageManager::new();
        let enforcer = Enforcer::new(
            terminal,
            package_manager,
            SecurityProfile {
                use_ara: true,
                use_arf: false,
                full_access: true,
            },
        );
        enforcer.initialize().unwrap();
        assert_eq!(enforcer.status(), EnforcerStatus::FullAccess);
        let ca = enforcer
            .set_up_channel_access(Some(&[0xA0, 0, 0, 1, 2, 3, 4]), "anything")
            .unwrap();
        assert_eq!(ca.access, Access::Allowed);
    }

    #[test]
    fn denied_on_uicc_with_neither_ara_nor_arf_and_full_access_disabled() {
        let mut terminal = MockTerminal::new("SIM1");
        terminal.fail_open_channel_not_present();
        let enforcer = Enforcer::new(
            terminal,
            MockPackageManager::new(),
            SecurityProfile {
                use_ara: true,
                use_arf: false,
                full_access: false,
            },
        );
        enforcer.initialize().unwrap();
        assert!(matches!(enforcer.status(), EnforcerStatus::Denied(_)));
        assert!(enforcer
            .set_up_channel_access(Some(&[0xA0, 0, 0, 1, 2, 3, 4]), "anything")
            .is_err());
    }

    #[test]
    fn full_access_flag_overrides_uicc_deny_when_enabled() {
        let mut terminal = MockTerminal::new("SIM1");
        terminal.fail_open_channel_not_present();
        let enforcer = Enforcer::new(
            terminal,
            MockPackageManager::new(),
            SecurityProfile {
                use_ara: true,
                use_arf: false,
                full_access: true,
            },
        );
        enforcer.initialize().unwrap();
        assert_eq!(enforcer.status(), EnforcerStatus::FullAccess);
    }

    #[test]
    fn reset_returns_to_uninitialised() {
        let mut terminal = MockTerminal::new("eSE");
        terminal.fail_open_channel_not_present();
        let enforcer = Enforcer::new(
            terminal,
            MockPackageManager::new(),
            SecurityProfile {
                use_ara: true,
                use_arf: false,
                full_access: true,
            },
        );
        enforcer.initialize().unwrap();
        enforcer.reset();
        assert_eq!(enforcer.status(), EnforcerStatus::Uninitialised);
    }
}
