use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::sleep;
use tracing::{info, warn};

use bellwether::{
    cli::{Cli, Command, GetArgs, PutArgs, ServeArgs},
    client::Client,
    follower::Follower,
    leader::Leader,
    message::Method,
    replica::Replicas,
};

fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    // Lower is more verbose; RUST_LOG wins when set.
    let default = match verbosity {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        _ => "error",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            init_tracing(args.verbosity);
            serve(args).await
        }
        Command::Get(args) => {
            init_tracing(3);
            get(args).await
        }
        Command::Put(args) => {
            init_tracing(3);
            put(args).await
        }
    }
}

/// Decides the local role and runs the matching engine on its own task;
/// the supervisor stays here, waiting on the engine's outcome.
async fn serve(args: ServeArgs) -> Result<()> {
    let replicas = Replicas::load(&args.peers)?;
    let local = replicas.get(&args.name)?;
    let leader = replicas.leader()?;

    if std::ptr::eq(local, leader) {
        let engine = Leader::bind(local.clone()).await?;
        info!("serving {} as leader", args.name);
        tokio::spawn(engine.run_until(shutdown_signal(args.uptime))).await??;
    } else {
        let engine = Follower::connect(local.clone(), leader).await?;
        info!("serving {} as follower of {}", args.name, leader.name);
        tokio::spawn(engine.run_until(shutdown_signal(args.uptime))).await??;
    }
    Ok(())
}

/// Resolves on ctrl-c or, when an uptime is configured, once it elapses.
async fn shutdown_signal(uptime: Option<u64>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    };
    match uptime {
        Some(secs) => {
            tokio::select! {
                _ = sleep(Duration::from_secs(secs)) => info!("uptime of {secs}s reached"),
                _ = ctrl_c => {}
            }
        }
        None => ctrl_c.await,
    }
}

async fn get(args: GetArgs) -> Result<()> {
    let replicas = Replicas::load(&args.peers)?;
    let replica = replicas.get(&args.name)?;
    let mut client = Client::connect(replica).await?;
    let deadline = Duration::from_millis(args.timeout_ms);

    for key in &args.keys {
        let reply = client.get(key.clone(), deadline).await?;
        if reply.method == Method::Error {
            println!("could not get {}: {}", reply.key, reply.body_text());
        } else {
            println!("{} = {} (state {})", reply.key, reply.body_text(), reply.sequence);
        }
    }
    Ok(())
}

async fn put(args: PutArgs) -> Result<()> {
    let replicas = Replicas::load(&args.peers)?;
    let replica = replicas.get(&args.name)?;
    let mut client = Client::connect(replica).await?;
    let deadline = Duration::from_millis(args.timeout_ms);

    let reply = client.put(args.key, args.value, deadline).await?;
    if reply.method == Method::Error {
        println!("could not put {}: {}", reply.key, reply.body_text());
    } else {
        println!("{} set in state {}", reply.key, reply.sequence);
    }
    Ok(())
}
