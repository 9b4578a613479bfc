use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::interval;
use tracing::info;

use crate::error::{Error, Result};
use crate::message::{Message, Method};
use crate::replica::Replica;
use crate::socket::{Identity, Publisher, Router};
use crate::store::Store;

const TICK: Duration = Duration::from_secs(1);

/// The distinguished replica. From a single task it sequences every
/// accepted write, publishes it to the follower fleet, serves reads and
/// snapshots, and acks the originating client.
pub struct Leader {
    replica: Replica,
    store: Store,
    snapshots: Router,
    updates: Publisher,
    requests: Router,
}

impl Leader {
    /// Binds the three leader endpoints on the wildcard host.
    pub async fn bind(replica: Replica) -> Result<Leader> {
        let snapshots = Router::bind(&format!("0.0.0.0:{}", replica.snapshots)).await?;
        info!("bound snapshots router socket on {}", snapshots.local_addr());

        let updates = Publisher::bind(&format!("0.0.0.0:{}", replica.updates)).await?;
        info!("bound updates publish socket on {}", updates.local_addr());

        let requests = Router::bind(&format!("0.0.0.0:{}", replica.requests)).await?;
        info!("bound requests router socket on {}", requests.local_addr());

        Ok(Leader {
            replica,
            store: Store::new(),
            snapshots,
            updates,
            requests,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn requests_addr(&self) -> SocketAddr {
        self.requests.local_addr()
    }

    pub fn updates_addr(&self) -> SocketAddr {
        self.updates.local_addr()
    }

    pub fn snapshots_addr(&self) -> SocketAddr {
        self.snapshots.local_addr()
    }

    /// Serves requests and snapshots until the shutdown future resolves.
    /// A transport or protocol error stops the engine and propagates to
    /// the supervisor.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tick = interval(TICK);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("leader {} stopped", self.replica.name);
                    return Ok(());
                }
                request = self.requests.recv() => {
                    let (identity, message) = request?;
                    self.on_request(identity, message)?;
                }
                request = self.snapshots.recv() => {
                    let (identity, message) = request?;
                    self.on_snapshot(identity, message)?;
                }
                _ = tick.tick() => {}
            }
        }
    }

    fn on_request(&mut self, identity: Identity, message: Message) -> Result<()> {
        match message.method {
            Method::Get => {
                self.on_get(identity, message);
                Ok(())
            }
            Method::Put => {
                self.on_put(identity, message);
                Ok(())
            }
            method => Err(Error::UnknownRequestMethod(method)),
        }
    }

    fn on_get(&self, identity: Identity, message: Message) {
        let reply = match self.store.get(&message.key) {
            Some(stored) => stored.clone(),
            None => Message::error(self.store.sequence(), message.key, "key not found"),
        };
        self.requests.send(identity, reply);
    }

    /// Commit order is stamp, publish, store, ack: a committed write is
    /// one that has been emitted on the updates wire.
    fn on_put(&mut self, identity: Identity, mut message: Message) {
        message.sequence = self.store.next_sequence();
        self.updates.publish(message.clone());
        self.store.insert(message.clone());
        info!("published state {} updated {}", message.sequence, message.key);
        self.requests.send(identity, message);
    }

    /// Bulk-transfers the whole store to the requesting peer, terminated
    /// by a message carrying the current sequence.
    fn on_snapshot(&self, identity: Identity, message: Message) -> Result<()> {
        if message.method != Method::Snapshot {
            return Err(Error::BadSnapshotRequest(message.method));
        }

        let mut keys = 0;
        for stored in self.store.iter() {
            keys += 1;
            self.snapshots.send(identity, stored.clone());
        }
        self.snapshots.send(identity, Message::terminate(self.store.sequence()));
        info!("sent {} keys on state snapshot {}", keys, self.store.sequence());
        Ok(())
    }
}
