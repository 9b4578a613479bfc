use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "centrally-led key/value replication", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the engine for the named local replica.
    Serve(ServeArgs),
    /// Fetch the value for one or more keys from a replica.
    Get(GetArgs),
    /// Store a value for a key at the leader.
    Put(PutArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Path to the peers configuration file.
    #[arg(short, long, env = "BELLWETHER_PEERS")]
    pub peers: PathBuf,

    /// Name of the local replica to run.
    #[arg(short, long, env = "BELLWETHER_NAME")]
    pub name: String,

    /// Shut the server down after this many seconds.
    #[arg(long, env = "BELLWETHER_UPTIME")]
    pub uptime: Option<u64>,

    /// Log level from 0-4, lower is more verbose.
    #[arg(long, env = "BELLWETHER_VERBOSITY", default_value_t = 2)]
    pub verbosity: u8,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// Path to the peers configuration file.
    #[arg(short, long, env = "BELLWETHER_PEERS")]
    pub peers: PathBuf,

    /// Name of the replica to connect to.
    #[arg(short, long, env = "BELLWETHER_NAME")]
    pub name: String,

    /// Receive deadline for each reply, in milliseconds.
    #[arg(short, long, env = "BELLWETHER_TIMEOUT_MS", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Keys to fetch.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    /// Path to the peers configuration file.
    #[arg(short, long, env = "BELLWETHER_PEERS")]
    pub peers: PathBuf,

    /// Name of the replica to connect to; writes only succeed at the leader.
    #[arg(short, long, env = "BELLWETHER_NAME")]
    pub name: String,

    /// Receive deadline for the reply, in milliseconds.
    #[arg(short, long, env = "BELLWETHER_TIMEOUT_MS", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Key to store under.
    pub key: String,

    /// Value to store.
    pub value: String,
}
