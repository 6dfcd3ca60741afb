//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result<T>`], a thin
//! alias over [`std::result::Result`] with [`Error`] as the failure type.
//! See SPEC_FULL.md section 7 for the authoritative list of kinds.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Exhaustive error kinds produced by the APDU codec, TLV/DER codecs, data
/// objects, rule cache, ARA-M driver, ARF reader and enforcer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed AID, bad package name, out-of-range Le/Lc, bad CLA/INS.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// TLV/DER truncation, minimum-encoding violation, wrong tag, wrong length.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Non-9000 status word where success was required.
    #[error("card status {0:04X}")]
    Card(u16),

    /// ARA applet or PKCS#15 file absent.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// No logical channel available.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// Transport failure talking to the terminal.
    #[error("io error: {0}")]
    Io(String),

    /// Any enforcer rejection. Always carries a one-line human reason that
    /// the embedding SE service may log.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Unrecoverable state encountered during rule load.
    #[error("security failure: {0}")]
    SecurityFailure(String),
}

impl Error {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument(reason.into())
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Error::ParseError(reason.into())
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Error::AccessDenied(reason.into())
    }

    pub fn security_failure(reason: impl Into<String>) -> Self {
        Error::SecurityFailure(reason.into())
    }

    /// `true` for errors that should not abort an ARA probe (the enforcer
    /// falls through to ARF / full-access instead), per SPEC_FULL.md section 7.
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, Error::NoSuchElement(_))
    }
}
