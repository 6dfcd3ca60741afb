//! The access rule cache (component C4): a `REF-DO -> ChannelAccess` map
//! plus the 8-byte refresh tag, and the GlobalPlatform conflict-resolution
//! search (SPEC_FULL.md section 4.4.3, "Rules A-D").

use crate::{
    access::{Access, ChannelAccess},
    do_objects::{AidRefDo, ArDo, HashRefDo, RefArDo, RefDo},
    error::Result,
};
use std::collections::HashMap;

/// `REF-DO -> ChannelAccess`, with refresh-tag based invalidation.
#[derive(Default)]
pub struct AccessRuleCache {
    rules: HashMap<RefDo, ChannelAccess>,
    refresh_tag: Option<[u8; 8]>,
}

impl AccessRuleCache {
    pub fn new() -> Self {
        AccessRuleCache::default()
    }

    /// Map `rule` to a `ChannelAccess` and write it, overwriting any
    /// existing entry for `reference` outright (SPEC_FULL.md section 4.4,
    /// `put`).
    pub fn put(&mut self, reference: RefDo, rule: &ArDo) -> ChannelAccess {
        let ca = ChannelAccess::from_ar_do(rule);
        self.rules.insert(reference, ca.clone());
        ca
    }

    /// `put`, but if `reference` is already present, merge instead of
    /// overwriting (SPEC_FULL.md section 4.4.2).
    pub fn put_with_merge(&mut self, reference: RefDo, rule: &ArDo) -> ChannelAccess {
        let incoming = ChannelAccess::from_ar_do(rule);
        let merged = match self.rules.get(&reference) {
            Some(existing) => existing.merge(&incoming),
            None => incoming,
        };
        self.rules.insert(reference, merged.clone());
        merged
    }

    /// Install every rule of a decoded `Response-ALL-AR-DO` (or an ARF
    /// walk's synthesised equivalent), merging entries that share a key.
    pub fn merge_all(&mut self, rules: &[RefArDo]) {
        for rule in rules {
            self.put_with_merge(rule.reference.clone(), &rule.rule);
        }
    }

    pub fn refresh_tag(&self) -> Option<[u8; 8]> {
        self.refresh_tag
    }

    pub fn set_refresh_tag(&mut self, tag: [u8; 8]) {
        self.refresh_tag = Some(tag);
    }

    pub fn is_refresh_tag_equal(&self, tag: &[u8; 8]) -> bool {
        self.refresh_tag.as_ref() == Some(tag)
    }

    pub fn clear_cache(&mut self) {
        self.rules.clear();
    }

    /// Empty the cache and forget the refresh tag (SPEC_FULL.md section 4.4).
    pub fn reset(&mut self) {
        self.rules.clear();
        self.refresh_tag = None;
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The GlobalPlatform search algorithm: given a caller AID (already
    /// normalised to a sentinel when absent) and its certificate chain's
    /// hashes end-entity-through-root, return the first rule that resolves
    /// the pair, per Rules A-D (SPEC_FULL.md section 4.4.3).
    pub fn find_access_rule(
        &self,
        aid: &AidRefDo,
        cert_hashes: &[[u8; 20]],
    ) -> Option<ChannelAccess> {
        // Rule A: exact (aid, hash) hit for any certificate in the chain.
        for hash in cert_hashes {
            let key = RefDo::new(aid.clone(), HashRefDo::Specific(*hash));
            if let Some(ca) = self.rules.get(&key) {
                return Some(ca.clone());
            }
        }

        // Specific AID present under a *different* hash: synthetic deny.
        if self.has_specific_aid_with_other_hash(aid, cert_hashes) {
            return Some(ChannelAccess::deny_all(
                "specific AID with different hash",
            ));
        }

        // Rule B: (aid, AllDeviceApplications).
        let key = RefDo::new(aid.clone(), HashRefDo::AllDeviceApplications);
        if let Some(ca) = self.rules.get(&key) {
            return Some(ca.clone());
        }

        // Rule C: (AllSeApplications, hash) for any certificate in the chain.
        for hash in cert_hashes {
            let key = RefDo::new(AidRefDo::AllSeApplications, HashRefDo::Specific(*hash));
            if let Some(ca) = self.rules.get(&key) {
                return Some(ca.clone());
            }
        }

        // Generic-AID rule present under a different hash: synthetic deny.
        if self.has_generic_aid_with_other_hash(cert_hashes) {
            return Some(ChannelAccess::deny_all(
                "generic-AID rule with different hash",
            ));
        }

        // Rule D: (AllSeApplications, AllDeviceApplications).
        let key = RefDo::new(AidRefDo::AllSeApplications, HashRefDo::AllDeviceApplications);
        if let Some(ca) = self.rules.get(&key) {
            return Some(ca.clone());
        }

        None
    }

    fn has_specific_aid_with_other_hash(&self, aid: &AidRefDo, cert_hashes: &[[u8; 20]]) -> bool {
        self.rules.keys().any(|k| {
            &k.aid == aid
                && match &k.hash {
                    HashRefDo::Specific(h) => !cert_hashes.contains(h),
                    HashRefDo::AllDeviceApplications => false,
                }
        })
    }

    fn has_generic_aid_with_other_hash(&self, cert_hashes: &[[u8; 20]]) -> bool {
        self.rules.keys().any(|k| {
            k.aid == AidRefDo::AllSeApplications
                && match &k.hash {
                    HashRefDo::Specific(h) => !cert_hashes.contains(h),
                    HashRefDo::AllDeviceApplications => false,
                }
        })
    }
}

/// Decode a `Response-ALL-AR-DO`'s rules and merge them all in, returning
/// the number of rules installed. Surfaced for callers (ARA driver, ARF
/// reader) that hand the cache an already-decoded rule list.
pub fn install_rules(cache: &mut AccessRuleCache, rules: &[RefArDo]) -> Result<usize> {
    cache.merge_all(rules);
    Ok(rules.len())
}
