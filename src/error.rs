use thiserror::Error;

use crate::message::Method;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop an engine or fail a client call. Application
/// errors (a missing key, a write sent to a follower) are not here: they
/// travel in-band as `Error` messages and never terminate anything.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no replicas configured")]
    NoReplicas,

    #[error("conflicting precedence ids")]
    ConflictingPids,

    #[error("unknown replica {0}")]
    UnknownReplica(String),

    #[error("could not read peers file: {0}")]
    PeersFile(std::io::Error),

    #[error("malformed peers file: {0}")]
    MalformedPeers(#[from] serde_json::Error),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("unknown request method {0}")]
    UnknownRequestMethod(Method),

    #[error("cannot receive {0} on the snapshots endpoint")]
    BadSnapshotRequest(Method),

    #[error("timed out waiting for a reply")]
    Timeout,
}
