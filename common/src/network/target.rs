//! # Scan Target Model
//!
//! Defines the input of a scan run: one IPv4 range in CIDR notation
//! (e.g., `192.168.1.0/24`).
//!
//! Parsing is a pure function. A string that is rejected here never reaches
//! the planner, the runner or the filesystem.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

use crate::network::range::{self, Ipv4Range};

/// Why a target string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Not of the shape `a.b.c.d/p` with 1-3 digit octets and a 1-2 digit prefix.
    #[error("invalid target '{0}': expected a.b.c.d/prefix")]
    Malformed(String),
    /// An octet above 255.
    #[error("invalid target '{target}': octet {octet} is out of range")]
    OctetOutOfRange { target: String, octet: u16 },
    /// A prefix length above 32.
    #[error("invalid target '{target}': prefix /{prefix} is out of range")]
    PrefixOutOfRange { target: String, prefix: u8 },
}

/// A validated address range to be scanned. Immutable once accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    raw: String,
    addr: Ipv4Addr,
    prefix: u8,
}

impl FromStr for Target {
    type Err = TargetError;

    /// Parses CIDR notation like "192.168.1.0/24".
    ///
    /// The host part does not have to be the network address, so
    /// "192.168.0.1/24" is accepted as written.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TargetError::Malformed(s.to_string());

        let (ip_str, prefix_str) = s.split_once('/').ok_or_else(malformed)?;

        if !is_short_number(prefix_str, 2) {
            return Err(malformed());
        }

        let octets: Vec<&str> = ip_str.split('.').collect();
        if octets.len() != 4 || !octets.iter().all(|o| is_short_number(o, 3)) {
            return Err(malformed());
        }

        let mut parsed = [0u8; 4];
        for (slot, octet_str) in parsed.iter_mut().zip(&octets) {
            let octet: u16 = octet_str.parse().map_err(|_| malformed())?;
            *slot = u8::try_from(octet).map_err(|_| TargetError::OctetOutOfRange {
                target: s.to_string(),
                octet,
            })?;
        }

        let prefix: u8 = prefix_str.parse().map_err(|_| malformed())?;
        if prefix > 32 {
            return Err(TargetError::PrefixOutOfRange {
                target: s.to_string(),
                prefix,
            });
        }

        Ok(Target {
            raw: s.to_string(),
            addr: Ipv4Addr::from(parsed),
            prefix,
        })
    }
}

impl Target {
    /// The target exactly as it was given, used verbatim on scanner command lines.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The full span of addresses covered, network to broadcast.
    pub fn range(&self) -> anyhow::Result<Ipv4Range> {
        range::cidr_range(self.addr, self.prefix)
    }

    /// Directory name for this target's artifacts.
    pub fn dir_name(&self) -> String {
        sanitize(&self.raw)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Replaces every path-unsafe character with `_`.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_short_number(s: &str, max_digits: usize) -> bool {
    !s.is_empty() && s.len() <= max_digits && s.bytes().all(|b| b.is_ascii_digit())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
