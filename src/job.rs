//! Jobs and their per-adapter parameters.
//!
//! One job is "collect the config of host H with adapter V and parameters P".
//! [`JobParams`] is the closed set of adapters; every variant carries its own
//! parameter struct, deserialized strictly from a roster section so a typo in
//! a key fails at load time instead of silently using a default.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RosterError;
use crate::serde::{number_or_string, opt_number_or_string};
use crate::session::SecurityLevel;
use crate::templates;

/// The text of `host` up to its first dot. IP addresses are kept whole so
/// hosts on one subnet get distinct files.
pub fn short_name(host: &str) -> &str {
    if host.parse::<IpAddr>().is_ok() {
        return host;
    }
    host.split('.').next().unwrap_or(host)
}

/// Default artifact location: `<dir>/<short>.<ext>`, unless `local_filename`
/// overrides it. A relative override is taken relative to `dir`.
pub fn artifact_path(
    destination_dir: &Path,
    local_filename: Option<&Path>,
    name: &str,
    extension: &str,
) -> PathBuf {
    match local_filename {
        Some(file) => destination_dir.join(file),
        None => destination_dir.join(format!("{}.{extension}", short_name(name))),
    }
}

fn tmp() -> PathBuf {
    PathBuf::from("/tmp")
}
fn staging() -> PathBuf {
    PathBuf::from("staging")
}
fn http_port() -> u16 {
    80
}
fn https_port() -> u16 {
    443
}
fn ssh_port() -> u16 {
    22
}
fn admin() -> String {
    "admin".to_string()
}
fn http() -> String {
    "http".to_string()
}
fn https() -> String {
    "https".to_string()
}
fn ext(value: &str) -> String {
    value.to_string()
}
fn session_timeout() -> u64 {
    60
}

/// Advantech cellular routers: unauthenticated HTTP export.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AdvantechParams {
    #[serde(default = "http_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "AdvantechParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl AdvantechParams {
    fn extension() -> String {
        ext("conf")
    }
}

/// Pepperl+Fuchs serial servers: unauthenticated HTTP export.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PepperlFuchsParams {
    #[serde(default = "http")]
    pub protocol: String,
    #[serde(default = "http_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Names the artifact and the per-host log instead of the address.
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "PepperlFuchsParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl PepperlFuchsParams {
    fn extension() -> String {
        ext("ds")
    }
}

/// Black Box MediaCento extenders: Telnet, root without password.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MediaCentoParams {
    #[serde(default = "MediaCentoParams::port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "MediaCentoParams::username")]
    pub username: String,
    #[serde(default = "MediaCentoParams::remote_cmd")]
    pub remote_cmd: String,
    /// Seconds to wait for each expected string.
    #[serde(default = "MediaCentoParams::timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "MediaCentoParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl MediaCentoParams {
    fn port() -> u16 {
        24
    }
    fn username() -> String {
        "root".to_string()
    }
    fn remote_cmd() -> String {
        "astparam dump".to_string()
    }
    fn timeout() -> u64 {
        20
    }
    fn extension() -> String {
        ext("astparam")
    }
}

/// Peplink routers: web login, then a binary config download.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PeplinkParams {
    #[serde(default = "https")]
    pub protocol: String,
    #[serde(default = "https_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "admin")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "session_timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    /// Skip collection while the saved artifact is younger than this many
    /// seconds.
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub min_age: Option<u64>,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "PeplinkParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl PeplinkParams {
    fn extension() -> String {
        ext("conf")
    }
}

/// pfSense firewalls: CSRF-protected backup page.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PfSenseParams {
    #[serde(default = "https")]
    pub protocol: String,
    #[serde(default = "https_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "admin")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "PfSenseParams::timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "PfSenseParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl PfSenseParams {
    fn timeout() -> u64 {
        300
    }
    fn extension() -> String {
        ext("xml")
    }
}

/// Teledyne Paradise Q-flex satellite modems.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QFlexParams {
    /// Shell template for the SSH side.
    #[serde(default = "QFlexParams::ssh_platform")]
    pub ssh_platform: String,
    #[serde(default = "ssh_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "QFlexParams::username")]
    pub username: String,
    #[serde(default = "QFlexParams::password")]
    pub password: String,
    #[serde(default = "QFlexParams::password")]
    pub quagga_password: String,
    /// Quagga daemon name to vty port.
    #[serde(default = "QFlexParams::quagga_ports")]
    pub quagga_ports: BTreeMap<String, u16>,
    #[serde(default = "session_timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default)]
    pub ssh_security: SecurityLevel,
    #[serde(default = "staging")]
    pub destination_dir: PathBuf,
}

impl QFlexParams {
    fn ssh_platform() -> String {
        "linux".to_string()
    }
    fn username() -> String {
        "pup".to_string()
    }
    /// Factory default for the PUP login and the Quagga vty.
    fn password() -> String {
        "!!".to_string()
    }
    fn quagga_ports() -> BTreeMap<String, u16> {
        BTreeMap::from([("zebrad".to_string(), 2601), ("bgpd".to_string(), 2605)])
    }
}

/// Anything that serves its config over SCP after an SSH login.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScpParams {
    /// Set from `device_type`.
    #[serde(skip)]
    pub platform: String,
    #[serde(default = "ssh_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "admin")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Enable secret, when it differs from the password.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "ScpParams::remote_filename")]
    pub remote_filename: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub sort: bool,
    #[serde(default, deserialize_with = "number_or_string")]
    pub recursive: bool,
    #[serde(default = "session_timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default)]
    pub ssh_security: SecurityLevel,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "ScpParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl ScpParams {
    fn remote_filename() -> String {
        "nvram:startup-config".to_string()
    }
    fn extension() -> String {
        ext("cfg")
    }
}

/// Cisco SG-300 switches, which can only push their config out.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SshPushParams {
    #[serde(default = "ssh_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "admin")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "SshPushParams::remote_filename")]
    pub remote_filename: String,
    /// Account the switch copies to. Defaults to the local user.
    #[serde(default)]
    pub dest_username: Option<String>,
    #[serde(default)]
    pub dest_password: String,
    /// Address the switch copies to. Defaults to this host's address.
    #[serde(default)]
    pub dest_host: Option<String>,
    /// Where the pushed file lands locally. Defaults to `$HOME`.
    #[serde(default)]
    pub landing_dir: Option<PathBuf>,
    #[serde(default = "SshPushParams::timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default)]
    pub ssh_security: SecurityLevel,
    #[serde(default = "staging")]
    pub destination_dir: PathBuf,
    #[serde(default, alias = "dest_filename")]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "SshPushParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl SshPushParams {
    fn remote_filename() -> String {
        "flash://startup-config".to_string()
    }
    fn timeout() -> u64 {
        120
    }
    fn extension() -> String {
        ext("cfg")
    }
}

/// Capture the output of a list of shell commands.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SshCommandParams {
    #[serde(default = "SshCommandParams::platform")]
    pub platform: String,
    #[serde(default = "ssh_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "admin")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "SshCommandParams::commands")]
    pub commands: Vec<String>,
    #[serde(default = "session_timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
    #[serde(default)]
    pub ssh_security: SecurityLevel,
    #[serde(default = "staging")]
    pub destination_dir: PathBuf,
    #[serde(default, alias = "dest_filename")]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "SshCommandParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl SshCommandParams {
    fn platform() -> String {
        "generic_termserver".to_string()
    }
    fn commands() -> Vec<String> {
        vec!["date".to_string()]
    }
    fn extension() -> String {
        ext("txt")
    }
}

/// Plain GET of an arbitrary URL.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UrlGetParams {
    #[serde(default = "http")]
    pub proto: String,
    #[serde(default = "http_port", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(default = "UrlGetParams::urlpath")]
    pub urlpath: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "tmp")]
    pub destination_dir: PathBuf,
    #[serde(default)]
    pub local_filename: Option<PathBuf>,
    #[serde(default = "UrlGetParams::extension", alias = "extension")]
    pub filename_extension: String,
}

impl UrlGetParams {
    fn urlpath() -> String {
        "/".to_string()
    }
    fn extension() -> String {
        ext("txt")
    }
}

/// The adapter to run, with its parameters.
#[derive(Debug, Clone)]
pub enum JobParams {
    Advantech(AdvantechParams),
    PepperlFuchs(PepperlFuchsParams),
    MediaCento(MediaCentoParams),
    Peplink(PeplinkParams),
    PfSense(PfSenseParams),
    QFlex(QFlexParams),
    Scp(ScpParams),
    SshPush(SshPushParams),
    SshCommand(SshCommandParams),
    UrlGet(UrlGetParams),
}

/// `device_type` values with a dedicated adapter. Any platform name from
/// [`templates::PLATFORMS`] other than these selects the SCP adapter.
pub const DEVICE_TYPES: &[&str] = &[
    "advantech",
    "pepperlfuchs",
    "mediacento",
    "peplink",
    "pfsense",
    "qflex",
    "cisco_s300",
    "sshcmd",
    "urlget",
];

fn parse<T: for<'de> Deserialize<'de>>(
    section: &str,
    table: Map<String, Value>,
) -> Result<T, RosterError> {
    serde_json::from_value(Value::Object(table))
        .map_err(|err| RosterError::InvalidParams(section.to_string(), err.to_string()))
}

impl JobParams {
    /// Maps a `device_type` and the remaining keys of a roster section to
    /// an adapter.
    pub fn from_section(
        section: &str,
        device_type: &str,
        table: Map<String, Value>,
    ) -> Result<Self, RosterError> {
        let params = match device_type.to_ascii_lowercase().as_str() {
            "advantech" => JobParams::Advantech(parse(section, table)?),
            "pepperlfuchs" => JobParams::PepperlFuchs(parse(section, table)?),
            "mediacento" => JobParams::MediaCento(parse(section, table)?),
            "peplink" => JobParams::Peplink(parse(section, table)?),
            "pfsense" => JobParams::PfSense(parse(section, table)?),
            "qflex" => JobParams::QFlex(parse(section, table)?),
            "cisco_s300" => JobParams::SshPush(parse(section, table)?),
            "sshcmd" => JobParams::SshCommand(parse(section, table)?),
            "urlget" => JobParams::UrlGet(parse(section, table)?),
            platform if templates::is_platform(platform) => {
                let mut params: ScpParams = parse(section, table)?;
                params.platform = platform.to_string();
                JobParams::Scp(params)
            }
            _ => {
                return Err(RosterError::UnknownDeviceType(
                    section.to_string(),
                    device_type.to_string(),
                ));
            }
        };
        Ok(params)
    }

    /// Adapter name, used in per-host log file names.
    pub fn adapter(&self) -> &'static str {
        match self {
            JobParams::Advantech(_) => "advantech",
            JobParams::PepperlFuchs(_) => "pepperlfuchs",
            JobParams::MediaCento(_) => "mediacento",
            JobParams::Peplink(_) => "peplink",
            JobParams::PfSense(_) => "pfsense",
            JobParams::QFlex(_) => "qflex",
            JobParams::Scp(_) => "scp",
            JobParams::SshPush(_) => "ssh",
            JobParams::SshCommand(_) => "sshcmd",
            JobParams::UrlGet(_) => "urlget",
        }
    }
}

/// One host to collect.
#[derive(Debug, Clone)]
pub struct Job {
    /// Roster section the job came from.
    pub section: String,
    /// Address to connect to.
    pub host: String,
    pub params: JobParams,
    pub repo_dir: Option<PathBuf>,
}

impl Job {
    /// Name used for artifacts and logs; the Pepperl+Fuchs `hostname` key
    /// overrides the address.
    pub fn display_name(&self) -> &str {
        match &self.params {
            JobParams::PepperlFuchs(PepperlFuchsParams {
                hostname: Some(name),
                ..
            }) => name,
            _ => &self.host,
        }
    }
}

fn device_type_schema(device_type: &str) -> Option<schemars::Schema> {
    let schema = match device_type.to_ascii_lowercase().as_str() {
        "advantech" => schemars::schema_for!(AdvantechParams),
        "pepperlfuchs" => schemars::schema_for!(PepperlFuchsParams),
        "mediacento" => schemars::schema_for!(MediaCentoParams),
        "peplink" => schemars::schema_for!(PeplinkParams),
        "pfsense" => schemars::schema_for!(PfSenseParams),
        "qflex" => schemars::schema_for!(QFlexParams),
        "cisco_s300" => schemars::schema_for!(SshPushParams),
        "sshcmd" => schemars::schema_for!(SshCommandParams),
        "urlget" => schemars::schema_for!(UrlGetParams),
        platform if templates::is_platform(platform) => schemars::schema_for!(ScpParams),
        _ => return None,
    };
    Some(schema)
}

/// Roster spellings serde accepts besides the field name, as `(field, alias)`.
/// The schema only lists field names.
fn key_aliases(device_type: &str) -> &'static [(&'static str, &'static str)] {
    const EXTENSION: (&str, &str) = ("filename_extension", "extension");
    const DEST_FILENAME: (&str, &str) = ("local_filename", "dest_filename");
    match device_type.to_ascii_lowercase().as_str() {
        "qflex" => &[],
        "cisco_s300" | "sshcmd" => &[EXTENSION, DEST_FILENAME],
        _ => &[EXTENSION],
    }
}

/// Every spelling `device_type` accepts for the field behind `key`, `key`
/// first.
pub fn spellings<'a>(device_type: &str, key: &'a str) -> Vec<&'a str> {
    let mut names = vec![key];
    for (field, alias) in key_aliases(device_type) {
        if *field == key {
            names.push(*alias);
        } else if *alias == key {
            names.push(*field);
        }
    }
    names
}

/// Parameter keys the adapter behind `device_type` accepts, aliases last.
pub fn accepted_keys(device_type: &str) -> Vec<String> {
    let mut keys: Vec<String> = device_type_schema(device_type)
        .as_ref()
        .and_then(|schema| schema.as_object())
        .and_then(|schema| schema.get("properties"))
        .and_then(Value::as_object)
        .map(|properties| properties.keys().cloned().collect())
        .unwrap_or_default();
    if !keys.is_empty() {
        keys.extend(
            key_aliases(device_type)
                .iter()
                .map(|(_, alias)| alias.to_string()),
        );
    }
    keys
}

/// JSON schema of every adapter's parameter table, keyed by `device_type`.
/// Platform names share the `<platform>` entry.
pub fn params_schema() -> BTreeMap<&'static str, schemars::Schema> {
    let mut schemas: BTreeMap<&'static str, schemars::Schema> = DEVICE_TYPES
        .iter()
        .filter_map(|name| device_type_schema(name).map(|schema| (*name, schema)))
        .collect();
    schemas.insert("<platform>", schemars::schema_for!(ScpParams));
    schemas
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn table(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn short_name_and_paths() {
        assert_eq!(short_name("sw1.ship.example.org"), "sw1");
        assert_eq!(short_name("10"), "10");
        assert_eq!(short_name("10.0.0.1"), "10.0.0.1");
        assert_ne!(short_name("10.0.0.1"), short_name("10.0.0.2"));
        assert_eq!(short_name("fe80::1"), "fe80::1");
        let dir = Path::new("/srv/confs");
        assert_eq!(
            artifact_path(dir, None, "r1.example.org", "cfg"),
            PathBuf::from("/srv/confs/r1.cfg")
        );
        assert_eq!(
            artifact_path(dir, Some(Path::new("sub/x.cfg")), "r1", "cfg"),
            PathBuf::from("/srv/confs/sub/x.cfg")
        );
        assert_eq!(
            artifact_path(dir, Some(Path::new("/abs/x.cfg")), "r1", "cfg"),
            PathBuf::from("/abs/x.cfg")
        );
    }

    #[test]
    fn defaults_fill_in() {
        let params = JobParams::from_section("m1", "mediacento", Map::new()).expect("params");
        let JobParams::MediaCento(p) = params else {
            panic!("wrong variant");
        };
        assert_eq!(p.port, 24);
        assert_eq!(p.username, "root");
        assert_eq!(p.remote_cmd, "astparam dump");
        assert_eq!(p.timeout, 20);
        assert_eq!(p.filename_extension, "astparam");
    }

    #[test]
    fn platform_names_select_scp() {
        let params = JobParams::from_section(
            "r1",
            "cisco_ios",
            table(json!({"sort": "true", "port": "2222", "extension": "txt"})),
        )
        .expect("params");
        let JobParams::Scp(p) = params else {
            panic!("wrong variant");
        };
        assert_eq!(p.platform, "cisco_ios");
        assert!(p.sort);
        assert_eq!(p.port, 2222);
        assert_eq!(p.filename_extension, "txt");
        assert_eq!(p.remote_filename, "nvram:startup-config");
    }

    #[test]
    fn unknown_keys_and_types_are_rejected() {
        match JobParams::from_section("r1", "advantech", table(json!({"prot": 80}))) {
            Err(RosterError::InvalidParams(section, msg)) => {
                assert_eq!(section, "r1");
                assert!(msg.contains("prot"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            JobParams::from_section("r1", "toaster", Map::new()),
            Err(RosterError::UnknownDeviceType(_, t)) if t == "toaster"
        ));
    }

    #[test]
    fn pepperl_fuchs_hostname_overrides_display_name() {
        let job = Job {
            section: "pf".to_string(),
            host: "10.0.0.5".to_string(),
            params: JobParams::from_section(
                "pf",
                "pepperlfuchs",
                table(json!({"hostname": "serial1.example.org"})),
            )
            .expect("params"),
            repo_dir: None,
        };
        assert_eq!(job.display_name(), "serial1.example.org");
        assert_eq!(job.params.adapter(), "pepperlfuchs");
    }

    #[test]
    fn schema_covers_every_device_type() {
        let schema = params_schema();
        for device_type in DEVICE_TYPES {
            assert!(schema.contains_key(device_type), "{device_type}");
        }
        assert!(schema.contains_key("<platform>"));
    }

    #[test]
    fn accepted_keys_follow_the_adapter() {
        let mediacento = accepted_keys("mediacento");
        assert!(mediacento.contains(&"remote_cmd".to_string()));
        assert!(!mediacento.contains(&"password".to_string()));
        assert!(accepted_keys("cisco_ios").contains(&"sort".to_string()));
        assert!(accepted_keys("cisco_ios").contains(&"extension".to_string()));
        assert!(accepted_keys("sshcmd").contains(&"dest_filename".to_string()));
        assert!(!accepted_keys("qflex").contains(&"extension".to_string()));
        assert!(!accepted_keys("cisco_ios").contains(&"dest_filename".to_string()));
        assert_eq!(
            spellings("urlget", "extension"),
            vec!["extension", "filename_extension"]
        );
        assert_eq!(spellings("urlget", "local_filename"), vec!["local_filename"]);
        assert!(accepted_keys("toaster").is_empty());
    }
}
