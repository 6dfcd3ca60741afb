//! Demonstration binary (component C12): wires an [`Enforcer`] up
//! against the in-memory ARA-M fixture terminal and a package manager
//! built from a JSON rule set, then prints the resulting channel access
//! for one `(AID, package)` pair.
//!
//! This is not a terminal integration (section 6 of the design leaves
//! that out of scope); it exists to exercise the enforcer without real
//! hardware, the same role the teacher's crate gives its Proxmark3
//! command-line front end.

use argh::FromArgs;
use se_access_control::{
    enforcer::Channel,
    mock::{FixtureRule, MockPackageManager, MockTerminal},
    Enforcer, SecurityProfile,
};
use std::{fs, path::PathBuf};

/// Resolve an access-control decision for one (AID, package) pair against
/// a fixture ARA-M rule set.
#[derive(FromArgs)]
struct Args {
    /// path to a JSON array of fixture rules (se_access_control::mock::FixtureRule)
    #[argh(option)]
    rules: PathBuf,

    /// path to a JSON SecurityProfile; defaults to use_ara=true, use_arf=true, full_access=false
    #[argh(option)]
    profile: Option<PathBuf>,

    /// hex-encoded AID of the SE application being accessed; omitted means the default application
    #[argh(option)]
    aid: Option<String>,

    /// the calling package's name
    #[argh(option)]
    package: String,

    /// hex-encoded signing certificate bytes for `package`
    #[argh(option)]
    cert: String,

    /// 8-byte hex refresh tag for the fixture ARA-M applet to report
    #[argh(option, default = "String::from(\"0102030405060708\")")]
    refresh_tag: String,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let profile = match &args.profile {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => SecurityProfile::default(),
    };

    let fixture_rules: Vec<FixtureRule> = serde_json::from_str(&fs::read_to_string(&args.rules)?)?;
    let rules: Vec<_> = fixture_rules.iter().map(FixtureRule::to_ref_ar_do).collect();

    let refresh_tag_bytes = hex::decode(&args.refresh_tag)?;
    let refresh_tag: [u8; 8] = refresh_tag_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("--refresh-tag must decode to exactly 8 bytes"))?;

    let terminal = MockTerminal::with_ara_rules("eSE", refresh_tag, &rules);
    let cert = hex::decode(&args.cert)?;
    let package_manager = MockPackageManager::new().with_certificates(&args.package, vec![cert]);

    let enforcer = Enforcer::new(terminal, package_manager, profile);
    enforcer.initialize()?;
    println!("enforcer status: {:?}", enforcer.status());

    let aid = args.aid.as_deref().map(hex::decode).transpose()?;
    let access = enforcer.set_up_channel_access(aid.as_deref(), &args.package)?;
    println!("{access:#?}");

    let channel = Channel {
        channel_number: 1,
        access,
    };
    let probe = [0x00, 0xA4, 0x04, 0x00];
    match enforcer.check_command(&channel, &probe) {
        Ok(()) => println!("SELECT would be allowed on this channel"),
        Err(e) => println!("SELECT would be rejected: {e}"),
    }

    Ok(())
}
