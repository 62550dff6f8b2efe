use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;

/// Algorithm policy for SSH negotiation, selectable per roster entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only.
    Secure,
    /// Modern algorithms plus a few SHA-1 fallbacks.
    Balanced,
    /// Everything russh supports. Default, since most of the fleet is old.
    #[default]
    Legacy,
}

/// How an SSH connection is negotiated and how the host key is checked.
#[derive(Debug, Clone)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::for_level(SecurityLevel::default())
    }
}

impl ConnectionSecurityOptions {
    /// Secure levels check `~/.ssh/known_hosts`; the legacy level accepts any
    /// host key, as appliances regenerate theirs on factory reset.
    pub fn for_level(level: SecurityLevel) -> Self {
        let server_check = match level {
            SecurityLevel::Legacy => ServerCheckMethod::NoCheck,
            SecurityLevel::Secure | SecurityLevel::Balanced => {
                ServerCheckMethod::DefaultKnownHostsFile
            }
        };
        Self {
            level,
            server_check,
        }
    }

    pub(super) fn preferred(&self) -> Preferred {
        match self.level {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(config::SECURE_KEX_ORDER),
                key: Cow::Borrowed(config::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(config::SECURE_CIPHERS),
                mac: Cow::Borrowed(config::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(config::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(config::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(config::BALANCED_CIPHERS),
                mac: Cow::Borrowed(config::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Legacy => Preferred {
                kex: Cow::Borrowed(config::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(config::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(config::LEGACY_CIPHERS),
                mac: Cow::Borrowed(config::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionSecurityOptions, SecurityLevel};
    use async_ssh2_tokio::ServerCheckMethod;
    use russh::{cipher, kex, mac};

    #[test]
    fn default_is_legacy_without_host_check() {
        let options = ConnectionSecurityOptions::default();
        assert_eq!(options.level, SecurityLevel::Legacy);
        assert!(matches!(options.server_check, ServerCheckMethod::NoCheck));
    }

    #[test]
    fn secure_profile_checks_known_hosts_and_drops_sha1() {
        let options = ConnectionSecurityOptions::for_level(SecurityLevel::Secure);
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::DefaultKnownHostsFile
        ));
        let preferred = options.preferred();
        assert!(!preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(!preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(!preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn legacy_profile_reaches_old_switches() {
        let preferred = ConnectionSecurityOptions::default().preferred();
        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn level_names_are_snake_case() {
        let level: SecurityLevel = serde_json::from_str("\"balanced\"").expect("parses");
        assert_eq!(level, SecurityLevel::Balanced);
    }
}
