//! Runtime configuration (component C10, SPEC_FULL.md section 6.4).

/// The three independent booleans an embedding SE service configures the
/// enforcer with. `full_access` only matters once `initialize` finds
/// neither ARA-M nor an ARF rule set available: it then decides whether
/// the enforcer falls back to granting every channel full access or keeps
/// denying everything, on UICC and non-UICC terminals alike. It has no
/// effect once ARA or ARF rules load successfully, and no effect after a
/// hard error during either probe (SPEC_FULL.md section 4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SecurityProfile {
    pub use_ara: bool,
    pub use_arf: bool,
    pub full_access: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        SecurityProfile {
            use_ara: true,
            use_arf: true,
            full_access: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let profile = SecurityProfile::default();
        assert!(profile.use_ara);
        assert!(profile.use_arf);
        assert!(!profile.full_access);
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let profile: SecurityProfile = serde_json::from_str(r#"{"full_access": true}"#).unwrap();
        assert!(profile.use_ara);
        assert!(profile.use_arf);
        assert!(profile.full_access);
    }
}
