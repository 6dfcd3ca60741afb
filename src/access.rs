//! The materialised access verdict ([`ChannelAccess`]) and the merge lattice
//! that combines two rules for the same `REF-DO` (component C4, SPEC_FULL.md
//! section 4.4.1/4.4.2).

use crate::do_objects::{ApduArDo, ApduFilter, ArDo, NfcArDo};

/// A three-valued access decision, with `Undefined` as the lattice identity
/// and `Denied` absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Allowed,
    Denied,
    Undefined,
}

impl Access {
    /// `Denied ⊕ x = Denied`, `Undefined ⊕ x = x`, `Allowed ⊕ Allowed = Allowed`.
    pub fn merge(self, other: Access) -> Access {
        use Access::*;
        match (self, other) {
            (Denied, _) | (_, Denied) => Denied,
            (Undefined, x) | (x, Undefined) => x,
            (Allowed, Allowed) => Allowed,
        }
    }
}

/// The verdict attached to a channel once `set_up_channel_access` resolves
/// a rule lookup (SPEC_FULL.md section 3).
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelAccess {
    pub access: Access,
    pub reason: String,
    pub apdu_access: Access,
    pub nfc_access: Access,
    pub use_filter: bool,
    pub filters: Vec<ApduFilter>,
    pub package_name: Option<String>,
    pub calling_pid: Option<u32>,
}

impl ChannelAccess {
    /// The access granted to the ARA-M driver's own channel, and the
    /// fallback used by `full_access` mode: unconditionally allowed, no
    /// filters.
    pub fn allow_all(reason: impl Into<String>) -> Self {
        ChannelAccess {
            access: Access::Allowed,
            reason: reason.into(),
            apdu_access: Access::Allowed,
            nfc_access: Access::Allowed,
            use_filter: false,
            filters: Vec::new(),
            package_name: None,
            calling_pid: None,
        }
    }

    /// The access attached when ACE initialisation denies everything
    /// (SPEC_FULL.md section 4.7).
    pub fn deny_all(reason: impl Into<String>) -> Self {
        ChannelAccess {
            access: Access::Denied,
            reason: reason.into(),
            apdu_access: Access::Denied,
            nfc_access: Access::Denied,
            use_filter: false,
            filters: Vec::new(),
            package_name: None,
            calling_pid: None,
        }
    }

    /// Translate an `AR-DO` into a `ChannelAccess` (SPEC_FULL.md section 4.4.1).
    pub fn from_ar_do(rule: &ArDo) -> Self {
        match &rule.apdu {
            None => ChannelAccess {
                access: Access::Denied,
                reason: "No APDU access rule".to_string(),
                apdu_access: Access::Undefined,
                nfc_access: nfc_access_of(rule, Access::Undefined),
                use_filter: false,
                filters: Vec::new(),
                package_name: None,
                calling_pid: None,
            },
            Some(ApduArDo::Always) => {
                let apdu_access = Access::Allowed;
                ChannelAccess {
                    access: Access::Allowed,
                    reason: "APDU access allowed".to_string(),
                    apdu_access,
                    nfc_access: nfc_access_of(rule, apdu_access),
                    use_filter: false,
                    filters: Vec::new(),
                    package_name: None,
                    calling_pid: None,
                }
            }
            Some(ApduArDo::Never) => {
                let apdu_access = Access::Denied;
                ChannelAccess {
                    access: Access::Allowed,
                    reason: "APDU access denied by rule".to_string(),
                    apdu_access,
                    nfc_access: nfc_access_of(rule, apdu_access),
                    use_filter: false,
                    filters: Vec::new(),
                    package_name: None,
                    calling_pid: None,
                }
            }
            Some(ApduArDo::Filters(filters)) => {
                let apdu_access = Access::Allowed;
                ChannelAccess {
                    access: Access::Allowed,
                    reason: "APDU access allowed with filters".to_string(),
                    apdu_access,
                    nfc_access: nfc_access_of(rule, apdu_access),
                    use_filter: true,
                    filters: filters.clone(),
                    package_name: None,
                    calling_pid: None,
                }
            }
        }
    }

    /// Merge `self` (the existing cache entry) with `incoming` (a newly
    /// parsed rule for the same `REF-DO`), per SPEC_FULL.md section 4.4.2.
    pub fn merge(&self, incoming: &ChannelAccess) -> ChannelAccess {
        let apdu_access = self.apdu_access.merge(incoming.apdu_access);
        let nfc_access = self.nfc_access.merge(incoming.nfc_access);
        let access = self.access.merge(incoming.access);

        let (use_filter, filters) = if apdu_access == Access::Allowed
            && (self.use_filter || incoming.use_filter)
        {
            let mut combined = self.filters.clone();
            combined.extend(incoming.filters.iter().cloned());
            (true, combined)
        } else {
            (false, Vec::new())
        };

        ChannelAccess {
            access,
            reason: "merged rule".to_string(),
            apdu_access,
            nfc_access,
            use_filter,
            filters,
            package_name: self.package_name.clone().or_else(|| incoming.package_name.clone()),
            calling_pid: self.calling_pid.or(incoming.calling_pid),
        }
    }
}

/// NFC access inherits the APDU decision when `AR-DO` carries no explicit
/// `NFC-AR-DO` (GP's stated default).
fn nfc_access_of(rule: &ArDo, apdu_fallback: Access) -> Access {
    match &rule.nfc {
        Some(NfcArDo::Always) => Access::Allowed,
        Some(NfcArDo::Never) => Access::Denied,
        None => apdu_fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::do_objects::ApduFilter;

    #[test]
    fn merge_is_commutative_on_each_axis() {
        let a = Access::Denied;
        let b = Access::Allowed;
        assert_eq!(a.merge(b), b.merge(a));
        let a = Access::Undefined;
        let b = Access::Allowed;
        assert_eq!(a.merge(b), b.merge(a));
    }

    #[test]
    fn merge_is_idempotent() {
        for a in [Access::Allowed, Access::Denied, Access::Undefined] {
            assert_eq!(a.merge(a), a);
        }
    }

    #[test]
    fn denied_absorbs() {
        assert_eq!(Access::Denied.merge(Access::Allowed), Access::Denied);
        assert_eq!(Access::Allowed.merge(Access::Denied), Access::Denied);
    }

    #[test]
    fn undefined_is_identity() {
        assert_eq!(Access::Undefined.merge(Access::Allowed), Access::Allowed);
        assert_eq!(Access::Undefined.merge(Access::Denied), Access::Denied);
    }

    #[test]
    fn missing_apdu_do_denies_with_undefined_apdu_access() {
        let rule = ArDo { apdu: None, nfc: None };
        let ca = ChannelAccess::from_ar_do(&rule);
        assert_eq!(ca.access, Access::Denied);
        assert_eq!(ca.apdu_access, Access::Undefined);
    }

    #[test]
    fn nfc_inherits_apdu_when_absent() {
        let rule = ArDo {
            apdu: Some(ApduArDo::Always),
            nfc: None,
        };
        let ca = ChannelAccess::from_ar_do(&rule);
        assert_eq!(ca.nfc_access, Access::Allowed);
    }

    #[test]
    fn merge_clears_filters_when_not_allowed() {
        let a = ChannelAccess {
            use_filter: true,
            filters: vec![ApduFilter {
                header: [0; 4],
                mask: [0xFF; 4],
            }],
            apdu_access: Access::Allowed,
            ..ChannelAccess::deny_all("a")
        };
        let b = ChannelAccess {
            apdu_access: Access::Denied,
            ..ChannelAccess::deny_all("b")
        };
        let merged = a.merge(&b);
        assert_eq!(merged.apdu_access, Access::Denied);
        assert!(!merged.use_filter);
        assert!(merged.filters.is_empty());
    }

    #[test]
    fn merge_concatenates_filters_when_both_allowed() {
        let f1 = ApduFilter {
            header: [0; 4],
            mask: [0xFF; 4],
        };
        let f2 = ApduFilter {
            header: [1; 4],
            mask: [0xFF; 4],
        };
        let a = ChannelAccess {
            apdu_access: Access::Allowed,
            use_filter: true,
            filters: vec![f1],
            ..ChannelAccess::deny_all("a")
        };
        let b = ChannelAccess {
            apdu_access: Access::Allowed,
            use_filter: true,
            filters: vec![f2],
            ..ChannelAccess::deny_all("b")
        };
        let merged = a.merge(&b);
        assert!(merged.use_filter);
        assert_eq!(merged.filters, vec![f1, f2]);
    }
}
