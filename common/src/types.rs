use crate::error::{DocDbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Port used when a host string carries no explicit port
pub const DEFAULT_PORT: u16 = 27017;

/// Unique identifier for a cluster as seen by one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

/// Network endpoint of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(DocDbError::Configuration {
                message: "endpoint host must not be empty".to_string(),
            });
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = DocDbError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        // Bracketed IPv6 literal, with or without a port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| DocDbError::Configuration {
                message: format!("Invalid endpoint '{}': unterminated '['", s),
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(s, port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => {
                    return Err(DocDbError::Configuration {
                        message: format!("Invalid endpoint '{}'", s),
                    })
                }
            };
            return Endpoint::new(host, port);
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Endpoint::new(host, parse_port(s, port)?),
            Some(_) => Endpoint::new(s, DEFAULT_PORT),
            None => Endpoint::new(s, DEFAULT_PORT),
        }
    }
}

fn parse_port(endpoint: &str, port: &str) -> Result<u16> {
    port.parse::<u16>().map_err(|e| DocDbError::Configuration {
        message: format!("Invalid port in endpoint '{}': {}", endpoint, e),
    })
}

/// Identity of a monitored node: the owning cluster plus its endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub cluster_id: ClusterId,
    pub endpoint: Endpoint,
}

impl NodeId {
    pub fn new(cluster_id: ClusterId, endpoint: Endpoint) -> Self {
        Self {
            cluster_id,
            endpoint,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.cluster_id)
    }
}

/// Semantic server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = DocDbError;

    /// Parses `major[.minor[.patch]]`, ignoring any pre-release or build
    /// suffix such as `-rc1` or `+abc`.
    fn from_str(s: &str) -> Result<Self> {
        let core = s
            .trim()
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();

        let mut parts = [0u32; 3];
        let mut count = 0;
        for piece in core.split('.') {
            if count == parts.len() {
                break;
            }
            parts[count] = piece.parse().map_err(|_| DocDbError::Protocol {
                message: format!("Invalid server version '{}'", s),
            })?;
            count += 1;
        }

        if count == 0 {
            return Err(DocDbError::Protocol {
                message: format!("Invalid server version '{}'", s),
            });
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

/// Inclusive range of server versions; an absent `max` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: ServerVersion,
    pub max: Option<ServerVersion>,
}

impl VersionRange {
    pub const fn from(min: ServerVersion) -> Self {
        Self { min, max: None }
    }

    pub const fn between(min: ServerVersion, max: ServerVersion) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn contains(&self, version: &ServerVersion) -> bool {
        *version >= self.min && self.max.map_or(true, |max| *version <= max)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, ∞)", self.min),
        }
    }
}

/// Range of wire protocol revisions a node declares it speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireVersionRange {
    pub min: i32,
    pub max: i32,
}

impl WireVersionRange {
    pub fn new(min: i32, max: i32) -> Result<Self> {
        if min > max {
            return Err(DocDbError::Protocol {
                message: format!("Invalid wire version range [{}, {}]", min, max),
            });
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, wire_version: i32) -> bool {
        wire_version >= self.min && wire_version <= self.max
    }

    pub fn overlaps(&self, other: &WireVersionRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Operator-assigned tags of a replica member (e.g. `dc -> east`)
pub type TagSet = BTreeMap<String, String>;

/// Replica group configuration as reported by a member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaGroupConfig {
    pub name: String,
    pub version: Option<i64>,
    pub members: Vec<Endpoint>,
    pub primary: Option<Endpoint>,
}
