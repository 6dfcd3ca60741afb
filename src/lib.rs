//! Secure Element Access Control: a GlobalPlatform-style Access Control
//! Enforcer (ACE) for embedded and UICC secure elements.
//!
//! Loads access rules from an ARA-M applet (component C5) or, on UICC
//! terminals, a PKCS#15 Access Rule File (component C6); caches and merges
//! them (component C4); and uses the result to gate logical-channel APDU
//! exchange and NFC event delivery for third-party applications (component
//! C7). See [`enforcer::Enforcer`] for the entry point.

pub mod access;
pub mod apdu;
pub mod ara;
pub mod arf;
pub mod cache;
pub mod config;
pub mod der;
pub mod do_objects;
pub mod enforcer;
pub mod error;
pub mod mock;
pub mod terminal;
pub mod tlv;
pub mod util;

pub use access::{Access, ChannelAccess};
pub use cache::AccessRuleCache;
pub use config::SecurityProfile;
pub use enforcer::{Channel, Enforcer, EnforcerStatus};
pub use error::{Error, Result};
pub use terminal::{PackageManager, Terminal};
