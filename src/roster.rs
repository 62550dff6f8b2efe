//! Roster loading.
//!
//! A roster maps section names to flat parameter tables. `.json` files are
//! read as JSON, anything else as TOML. A `DEFAULT` table is merged under
//! every section; only the keys the section's adapter accepts are taken from
//! it, so one `DEFAULT` can serve HTTP and SSH devices alike.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{Map, Value};

use crate::error::RosterError;
use crate::job::{Job, JobParams, accepted_keys, spellings};

const DEFAULT_SECTION: &str = "DEFAULT";

/// Jobs built from a roster, plus the repositories they write into.
#[derive(Debug, Default)]
pub struct Roster {
    pub jobs: Vec<Job>,
    pub repo_dirs: BTreeSet<PathBuf>,
}

impl Roster {
    /// Reads and parses the roster at `path`.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| RosterError::Read(path.to_path_buf(), err))?;
        let document = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&text)?
        } else {
            let table: toml::Table = toml::from_str(&text)?;
            serde_json::to_value(table)?
        };
        Self::from_value(document)
    }

    /// Builds jobs from an already parsed document.
    pub fn from_value(document: Value) -> Result<Self, RosterError> {
        let Value::Object(mut sections) = document else {
            return Err(RosterError::NotATable("<root>".to_string()));
        };
        let defaults = match sections.remove(DEFAULT_SECTION) {
            Some(Value::Object(defaults)) => defaults,
            Some(_) => return Err(RosterError::NotATable(DEFAULT_SECTION.to_string())),
            None => Map::new(),
        };

        let mut roster = Roster::default();
        for (section, table) in sections {
            let Value::Object(table) = table else {
                return Err(RosterError::NotATable(section));
            };
            let job = build_job(&section, table, &defaults)?;
            if let Some(repo_dir) = &job.repo_dir {
                roster.repo_dirs.insert(repo_dir.clone());
            }
            roster.jobs.push(job);
        }
        debug!(
            "roster: {} jobs, {} repositories",
            roster.jobs.len(),
            roster.repo_dirs.len()
        );
        Ok(roster)
    }
}

fn take_string(table: &mut Map<String, Value>, key: &str) -> Option<String> {
    match table.remove(key)? {
        Value::String(value) => Some(value),
        other => Some(other.to_string()),
    }
}

fn build_job(
    section: &str,
    mut table: Map<String, Value>,
    defaults: &Map<String, Value>,
) -> Result<Job, RosterError> {
    for key in ["device_type", "host", "repo_dir"] {
        if !table.contains_key(key)
            && let Some(value) = defaults.get(key)
        {
            table.insert(key.to_string(), value.clone());
        }
    }

    let device_type = take_string(&mut table, "device_type")
        .ok_or_else(|| RosterError::MissingDeviceType(section.to_string()))?;
    let host = take_string(&mut table, "host").unwrap_or_else(|| section.to_string());
    let repo_dir = take_string(&mut table, "repo_dir").map(PathBuf::from);

    for key in accepted_keys(&device_type) {
        if spellings(&device_type, &key).iter().any(|name| table.contains_key(*name)) {
            continue;
        }
        if let Some(value) = defaults.get(&key) {
            table.insert(key, value.clone());
        }
    }

    let params = JobParams::from_section(section, &device_type, table)?;
    Ok(Job {
        section: section.to_string(),
        host,
        params,
        repo_dir,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const ROSTER: &str = r#"
[DEFAULT]
destination_dir = "/srv/confs"
repo_dir = "/srv/confs"
password = "hunter2"
remote_cmd = "ignored by most"

[sw1]
host = "sw1.ship.example.org"
device_type = "cisco_ios"
sort = "true"

[extender]
device_type = "mediacento"

[router]
device_type = "urlget"
repo_dir = "/srv/other"
port = 8080
"#;

    #[test]
    fn toml_roster_with_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        file.write_all(ROSTER.as_bytes()).expect("write");

        let roster = Roster::load(file.path()).expect("roster");
        assert_eq!(roster.jobs.len(), 3);
        assert_eq!(
            roster.repo_dirs,
            BTreeSet::from([PathBuf::from("/srv/confs"), PathBuf::from("/srv/other")])
        );

        let sw1 = roster
            .jobs
            .iter()
            .find(|job| job.section == "sw1")
            .expect("sw1");
        assert_eq!(sw1.host, "sw1.ship.example.org");
        let JobParams::Scp(params) = &sw1.params else {
            panic!("sw1 is not scp");
        };
        assert!(params.sort);
        assert_eq!(params.password, "hunter2");
        assert_eq!(params.destination_dir, PathBuf::from("/srv/confs"));

        let extender = roster
            .jobs
            .iter()
            .find(|job| job.section == "extender")
            .expect("extender");
        assert_eq!(extender.host, "extender");
        let JobParams::MediaCento(params) = &extender.params else {
            panic!("extender is not mediacento");
        };
        assert_eq!(params.remote_cmd, "ignored by most");
    }

    #[test]
    fn json_roster() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tempfile");
        file.write_all(br#"{"fw1": {"device_type": "pfsense", "timeout": "30"}}"#)
            .expect("write");
        let roster = Roster::load(file.path()).expect("roster");
        let JobParams::PfSense(params) = &roster.jobs[0].params else {
            panic!("not pfsense");
        };
        assert_eq!(params.timeout, 30);
        assert!(roster.repo_dirs.is_empty());
    }

    #[test]
    fn section_errors_name_the_section() {
        let err = Roster::from_value(serde_json::json!({"r1": {"host": "x"}}))
            .err()
            .expect("missing device_type");
        assert!(matches!(err, RosterError::MissingDeviceType(s) if s == "r1"));

        let err = Roster::from_value(serde_json::json!({
            "r2": {"device_type": "advantech", "sort": true}
        }))
        .err()
        .expect("unknown key");
        match err {
            RosterError::InvalidParams(section, msg) => {
                assert_eq!(section, "r2");
                assert!(msg.contains("sort"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            Roster::from_value(serde_json::json!({"r3": 5})),
            Err(RosterError::NotATable(s)) if s == "r3"
        ));
    }

    #[test]
    fn aliased_defaults_are_merged_once() {
        let roster = Roster::from_value(serde_json::json!({
            "DEFAULT": {"extension": "conf", "dest_filename": "out.txt"},
            "sw1": {"device_type": "cisco_ios"},
            "sw2": {"device_type": "cisco_ios", "filename_extension": "cfg"},
            "box": {"device_type": "sshcmd"},
            "modem": {"device_type": "qflex"},
        }))
        .expect("roster");

        let params = |section: &str| {
            roster
                .jobs
                .iter()
                .find(|job| job.section == section)
                .map(|job| job.params.clone())
                .expect("job")
        };
        let JobParams::Scp(sw1) = params("sw1") else {
            panic!("sw1 is not scp");
        };
        assert_eq!(sw1.filename_extension, "conf");
        assert_eq!(sw1.local_filename, None);
        let JobParams::Scp(sw2) = params("sw2") else {
            panic!("sw2 is not scp");
        };
        assert_eq!(sw2.filename_extension, "cfg");
        let JobParams::SshCommand(cmd) = params("box") else {
            panic!("box is not sshcmd");
        };
        assert_eq!(cmd.local_filename, Some(PathBuf::from("out.txt")));
        assert_eq!(cmd.filename_extension, "conf");
        assert!(matches!(params("modem"), JobParams::QFlex(_)));
    }

    #[test]
    fn unreadable_file() {
        assert!(matches!(
            Roster::load(Path::new("/nonexistent/roster.toml")),
            Err(RosterError::Read(_, _))
        ));
    }
}
