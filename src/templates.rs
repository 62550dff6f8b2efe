//! Built-in platform templates.
//!
//! A [`Platform`] couples the prompt state machine of a device family with the
//! commands a session runs right after login (paging off) and the mode a
//! collector must reach before pulling a config. The names match the
//! `device_type` values used in the roster.

use std::collections::HashMap;

use crate::device::{Answer, DeviceHandler, DeviceTemplate, InputRule, Transition};
use crate::error::ConnectError;

/// Platform names known to [`by_name`].
pub const PLATFORMS: &[&str] = &[
    "cisco_ios",
    "cisco_xe",
    "cisco_nxos",
    "cisco_s300",
    "linux",
    "generic_termserver",
    "quagga",
];

/// Parameter keys the templates answer questions with.
pub const PARAM_USERNAME: &str = "username";
pub const PARAM_PASSWORD: &str = "password";
pub const PARAM_SECRET: &str = "secret";

/// A device family's shell description.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: &'static str,
    pub template: DeviceTemplate,
    /// Sent once after the first prompt, failures ignored.
    pub setup: Vec<&'static str>,
    /// Mode to reach before collecting, if the family has privilege levels.
    pub privileged: Option<&'static str>,
}

impl Platform {
    /// Compiles the state machine with the credentials it may be asked for.
    pub fn handler(
        &self,
        username: &str,
        password: &str,
        secret: Option<&str>,
    ) -> Result<DeviceHandler, ConnectError> {
        let mut params = HashMap::new();
        params.insert(PARAM_USERNAME.to_string(), format!("{username}\n"));
        params.insert(PARAM_PASSWORD.to_string(), format!("{password}\n"));
        params.insert(
            PARAM_SECRET.to_string(),
            format!("{}\n", secret.unwrap_or(password)),
        );
        self.template.build(params)
    }
}

/// True when `name` is a known platform (case-insensitive).
pub fn is_platform(name: &str) -> bool {
    PLATFORMS.contains(&name.to_ascii_lowercase().as_str())
}

/// Looks a platform up by name (case-insensitive).
pub fn by_name(name: &str) -> Result<Platform, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco_ios" | "cisco_xe" => Ok(cisco_ios()),
        "cisco_nxos" => Ok(cisco_nxos()),
        "cisco_s300" => Ok(cisco_s300()),
        "linux" => Ok(linux()),
        "generic_termserver" => Ok(generic_termserver()),
        "quagga" => Ok(quagga()),
        _ => Err(ConnectError::UnknownPlatform(name.to_string())),
    }
}

fn strings(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

fn ask(state: &str, patterns: &[&str], param: &str, echo: bool) -> InputRule {
    InputRule {
        state: state.to_string(),
        patterns: strings(patterns),
        answer: Answer::Param(param.to_string()),
        echo,
    }
}

fn ios_family(errors: &[&str]) -> DeviceTemplate {
    DeviceTemplate {
        prompts: vec![
            ("Config".to_string(), strings(&[r"^\S+\(\S+\)#\s*$"])),
            ("Enable".to_string(), strings(&[r"^[^\s#()]+#\s*$"])),
            ("User".to_string(), strings(&[r"^[^\s<>#]+>\s*$"])),
        ],
        inputs: vec![ask(
            "EnablePassword",
            &[r"^\x00*\r?(Enable )?[Pp]assword:\s*$"],
            PARAM_SECRET,
            false,
        )],
        more: strings(&[r"^\s*--More--\s*$", r"\s*<--- More --->\s*"]),
        errors: strings(errors),
        transitions: vec![
            Transition::new("User", "enable", "Enable"),
            Transition::new("Enable", "configure terminal", "Config"),
            Transition::new("Config", "end", "Enable"),
        ],
    }
}

/// Cisco IOS and IOS-XE.
pub fn cisco_ios() -> Platform {
    Platform {
        name: "cisco_ios",
        template: ios_family(&[
            r"^% ?Invalid input detected.*",
            r"^% ?Incomplete command.*",
            r"^% ?Ambiguous command.*",
            r"^% ?Unknown command.*",
            r"^%Error.*",
            r"^Command authorization failed.*",
            r"^Access denied",
        ]),
        setup: vec!["terminal length 0", "terminal width 511"],
        privileged: Some("enable"),
    }
}

/// Cisco NX-OS. Logins land in the privileged prompt.
pub fn cisco_nxos() -> Platform {
    Platform {
        name: "cisco_nxos",
        template: ios_family(&[
            r"^% ?Invalid command.*",
            r"^% ?Incomplete command.*",
            r"^% ?Permission denied.*",
        ]),
        setup: vec!["terminal length 0"],
        privileged: Some("enable"),
    }
}

/// Cisco SG-300 small business switches.
///
/// These repeat the login inside the shell (`User Name:` / `Password:`) even
/// after SSH authentication succeeded, and report copy failures with `-E-`
/// syslog-style tags.
pub fn cisco_s300() -> Platform {
    let mut template = ios_family(&[
        r"^%\S+-E-.*",
        r"^% ?Unrecognized command.*",
        r"^% ?Wrong number of parameters.*",
        r"(?i)\bcopy\b.*\bfailed\b",
        r"(?i)^\s*Error\b.*",
    ]);
    template.inputs.insert(
        0,
        ask("UserName", &[r"^\x00*\r?User ?Name:\s*$"], PARAM_USERNAME, false),
    );
    template.inputs.insert(
        1,
        ask("LoginPassword", &[r"^\x00*\r?Password:\s*$"], PARAM_PASSWORD, false),
    );
    template
        .more
        .push(r"More: <space>,\s+Quit: q".to_string());
    Platform {
        name: "cisco_s300",
        template,
        setup: vec!["terminal datadump", "terminal width 0"],
        privileged: Some("enable"),
    }
}

/// Plain POSIX shells. Prompts must contain a lowercase letter so that
/// uuencoded body lines are never taken for a prompt.
pub fn linux() -> Platform {
    Platform {
        name: "linux",
        template: DeviceTemplate {
            prompts: vec![
                (
                    "Root".to_string(),
                    strings(&[r"^[\w\-.@:~/\[\] ]*[a-z][\w\-.@:~/\[\] ]*#\s*$"]),
                ),
                (
                    "User".to_string(),
                    strings(&[r"^[\w\-.@:~/\[\] ]*[a-z][\w\-.@:~/\[\] ]*[\$>%]\s*$"]),
                ),
            ],
            inputs: Vec::new(),
            more: Vec::new(),
            errors: strings(&[r"^-?\w+: command not found", r"^\S+: Permission denied"]),
            transitions: Vec::new(),
        },
        setup: Vec::new(),
        privileged: None,
    }
}

/// Console servers and anything else with a one-word prompt.
pub fn generic_termserver() -> Platform {
    Platform {
        name: "generic_termserver",
        template: DeviceTemplate {
            prompts: vec![(
                "Prompt".to_string(),
                strings(&[r"^[^\s]{0,63}[a-zA-Z][^\s]{0,63}\s?[>#\$%]\s*$"]),
            )],
            more: strings(&[r"--More--", r"-- ?[Mm]ore ?--"]),
            ..Default::default()
        },
        setup: Vec::new(),
        privileged: None,
    }
}

/// Quagga daemon vty (zebra, bgpd, ...), reached over Telnet. The same
/// password unlocks the vty and `enable`.
pub fn quagga() -> Platform {
    Platform {
        name: "quagga",
        template: DeviceTemplate {
            prompts: vec![
                ("Enable".to_string(), strings(&[r"^[^\s#]+#\s*$"])),
                ("User".to_string(), strings(&[r"^[^\s>]+>\s*$"])),
            ],
            inputs: vec![ask(
                "Password",
                &[r"^\x00*\r?Password:\s*$"],
                PARAM_SECRET,
                false,
            )],
            more: strings(&[r"^\s*--More--\s*$"]),
            errors: strings(&[r"^% .+"]),
            transitions: vec![Transition::new("User", "enable", "Enable")],
        },
        setup: vec!["terminal length 0"],
        privileged: Some("enable"),
    }
}
