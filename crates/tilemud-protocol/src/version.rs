//! Protocol version reporting and client compatibility checks.
//!
//! A client version is compatible iff it parses as a semantic version and
//! is present in the supported set. The check result carries a reason so
//! the client can distinguish "update required" from "server behind".

use semver::Version;
use serde::{Deserialize, Serialize};

/// Why a version check came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionCheckReason {
    /// Exactly the server's current version.
    Match,
    /// Older than current but still in the supported set.
    BehindSupported,
    /// Newer than current but still in the supported set.
    AheadSupported,
    /// Equal precedence to current yet not in the supported set.
    Mismatch,
    /// Older than current and unsupported.
    Behind,
    /// Newer than current and unsupported.
    Ahead,
    /// No version supplied.
    Missing,
    /// Not parseable as a semantic version.
    Invalid,
}

/// Result of checking a client's version against the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheck {
    pub compatible: bool,
    pub reason: VersionCheckReason,
    /// The server's current version.
    pub expected: String,
    /// What the client sent, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    pub message: String,
}

/// Reports the server protocol version and evaluates client versions.
#[derive(Debug, Clone)]
pub struct VersionService {
    current: Version,
    supported: Vec<Version>,
    protocol: String,
}

impl VersionService {
    /// Creates a service for `current` plus any additionally supported
    /// versions. The current version is always in the supported set.
    pub fn new(
        current: &str,
        also_supported: &[&str],
        protocol: impl Into<String>,
    ) -> Result<Self, semver::Error> {
        let current = Version::parse(current)?;
        let mut supported = vec![current.clone()];
        for v in also_supported {
            let parsed = Version::parse(v)?;
            if !supported.contains(&parsed) {
                supported.push(parsed);
            }
        }
        supported.sort();
        Ok(Self {
            current,
            supported,
            protocol: protocol.into(),
        })
    }

    /// The server's current version string.
    pub fn current(&self) -> String {
        self.current.to_string()
    }

    /// The protocol name tag (`tilemud.realtime` by default upstream).
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Every supported version, ascending.
    pub fn supported(&self) -> Vec<String> {
        self.supported.iter().map(Version::to_string).collect()
    }

    /// Checks a client-supplied version string.
    pub fn check(&self, client_version: Option<&str>) -> VersionCheck {
        let expected = self.current();

        let Some(received) = client_version else {
            return VersionCheck {
                compatible: false,
                reason: VersionCheckReason::Missing,
                expected,
                received: None,
                message: "no client version supplied".into(),
            };
        };

        let Ok(parsed) = Version::parse(received) else {
            return VersionCheck {
                compatible: false,
                reason: VersionCheckReason::Invalid,
                expected,
                received: Some(received.to_string()),
                message: format!("'{received}' is not a valid version"),
            };
        };

        let supported = self.supported.contains(&parsed);
        let (compatible, reason) = match (supported, parsed.cmp(&self.current))
        {
            (true, std::cmp::Ordering::Equal) => {
                (true, VersionCheckReason::Match)
            }
            (true, std::cmp::Ordering::Less) => {
                (true, VersionCheckReason::BehindSupported)
            }
            (true, std::cmp::Ordering::Greater) => {
                (true, VersionCheckReason::AheadSupported)
            }
            (false, std::cmp::Ordering::Less) => {
                (false, VersionCheckReason::Behind)
            }
            (false, std::cmp::Ordering::Greater) => {
                (false, VersionCheckReason::Ahead)
            }
            (false, std::cmp::Ordering::Equal) => {
                (false, VersionCheckReason::Mismatch)
            }
        };

        let message = if compatible {
            format!("client version {received} accepted")
        } else {
            format!("client version {received} unsupported; expected {expected}")
        };

        VersionCheck {
            compatible,
            reason,
            expected,
            received: Some(received.to_string()),
            message,
        }
    }
}
