//! External collaborator interfaces consumed by the ARA-M driver, the ARF
//! reader and the enforcer (SPEC_FULL.md section 6). The real
//! implementations of these traits — binding to an actual SE terminal
//! driver and the OS package manager — are out of scope for this crate
//! (section 1); [`crate::mock`] provides fixtures that satisfy them for
//! tests and the demonstration binary.

use crate::error::Result;

/// Low-level access to an SE terminal: opening/closing logical channels,
/// exchanging APDUs, and (for UICC terminals) reading PKCS#15 files
/// through the SIM-toolkit `simIO` mechanism (SPEC_FULL.md section 6.1).
///
/// Object-safe so the enforcer can hold a `Box<dyn Terminal>` or `&dyn
/// Terminal` without committing to one concrete transport.
pub trait Terminal {
    /// Open a logical channel, optionally selecting `aid`. Returns the
    /// assigned channel number and the `SELECT` response data (FCI/FCP).
    fn open_logical_channel(&mut self, aid: Option<&[u8]>, p2: u8) -> Result<(u8, Vec<u8>)>;

    /// Close a previously opened logical channel. The basic channel
    /// (number 0) is never closed through this call.
    fn close_logical_channel(&mut self, channel_number: u8) -> Result<()>;

    /// Exchange a raw command APDU on `channel_number`, returning the raw
    /// response APDU (including its trailing status word).
    fn transmit(&mut self, channel_number: u8, apdu: &[u8]) -> Result<Vec<u8>>;

    /// UICC-only: exchange a command against a file addressed by file id
    /// and/or path, bypassing explicit `SELECT`.
    fn sim_io_exchange(&mut self, file_id: u16, path: &str, cmd: &[u8]) -> Result<Vec<u8>>;

    fn get_atr(&self) -> Option<Vec<u8>>;

    fn is_card_present(&self) -> bool;

    /// A terminal name whose `"SIM"` prefix indicates a UICC, per
    /// SPEC_FULL.md section 6.1.
    fn terminal_name(&self) -> String;

    /// `true` when [`Self::terminal_name`] indicates a UICC terminal.
    fn is_uicc(&self) -> bool {
        self.terminal_name().starts_with("SIM")
    }
}

/// Installed-application enumeration and certificate retrieval, normally
/// backed by the OS's `PackageManager` (SPEC_FULL.md section 6.2). The
/// enforcer only ever needs the raw DER bytes of each signing certificate
/// to SHA-1-hash them; it never parses X.509 structure.
pub trait PackageManager {
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>>;

    /// DER-encoded X.509 certificates in the device application's signing
    /// chain, ordered end-entity through root.
    fn signing_certificates(&self, package_name: &str) -> Result<Vec<Vec<u8>>>;
}

/// SHA-1 each certificate in `certs`, in order, as required by
/// `set_up_channel_access` (SPEC_FULL.md section 4.7 step 3).
pub fn hash_certificates(certs: &[Vec<u8>]) -> Vec<[u8; 20]> {
    use sha1::{Digest, Sha1};
    certs
        .iter()
        .map(|cert| {
            let mut hasher = Sha1::new();
            hasher.update(cert);
            let digest = hasher.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            out
        })
        .collect()
}
