use std::fs;
use std::path::Path;
use std::slice;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A peer on the network: its precedence id, its name, and the three
/// ports it serves. Loaded once from the peers document and never
/// mutated at runtime. `addr` is the dial target used by other peers and
/// by clients; `host` and `ipaddr` are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub pid: u16,
    pub name: String,
    #[serde(rename = "address")]
    pub addr: String,
    pub host: String,
    pub ipaddr: String,
    pub updates: u16,
    pub snapshots: u16,
    pub requests: u16,
}

impl Replica {
    pub fn updates_endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.updates)
    }

    pub fn snapshots_endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.snapshots)
    }

    pub fn requests_endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.requests)
    }
}

/// The configured peer set.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Replicas(Vec<Replica>);

impl Replicas {
    pub fn new(replicas: Vec<Replica>) -> Replicas {
        Replicas(replicas)
    }

    /// Loads the peer set from a JSON document on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Replicas> {
        let data = fs::read_to_string(path).map_err(Error::PeersFile)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn iter(&self) -> slice::Iter<'_, Replica> {
        self.0.iter()
    }

    /// The replica with the smallest precedence id leads. A duplicated
    /// minimum is a configuration error, not a tie to break.
    pub fn leader(&self) -> Result<&Replica> {
        let leader = self
            .0
            .iter()
            .min_by_key(|replica| replica.pid)
            .ok_or(Error::NoReplicas)?;
        if self.0.iter().filter(|replica| replica.pid == leader.pid).count() > 1 {
            return Err(Error::ConflictingPids);
        }
        Ok(leader)
    }

    /// Looks a replica up by its unique name.
    pub fn get(&self, name: &str) -> Result<&Replica> {
        self.0
            .iter()
            .find(|replica| replica.name == name)
            .ok_or_else(|| Error::UnknownReplica(name.to_string()))
    }
}
