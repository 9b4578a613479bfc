use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::message::{Message, Method};
use crate::replica::Replica;
use crate::socket::{Dealer, Identity, Router, Subscriber};
use crate::store::Store;

const TICK: Duration = Duration::from_secs(1);

/// A replica that mirrors the leader. It catches up with a snapshot
/// exchange on startup, applies published updates that advance its
/// sequence, and serves reads from its local store; writes are rejected,
/// never forwarded.
pub struct Follower {
    replica: Replica,
    store: Store,
    snapshots: Dealer,
    updates: Subscriber,
    requests: Router,
}

impl Follower {
    /// Connects the snapshot and update sockets to the leader and binds
    /// the local requests endpoint.
    pub async fn connect(replica: Replica, leader: &Replica) -> Result<Follower> {
        let endpoint = leader.snapshots_endpoint();
        let snapshots = Dealer::connect(&endpoint).await?;
        info!("connected snapshots dealer socket to {}", endpoint);

        let endpoint = leader.updates_endpoint();
        let updates = Subscriber::connect(&endpoint).await?;
        info!("connected updates subscriber socket to {}", endpoint);

        let requests = Router::bind(&format!("0.0.0.0:{}", replica.requests)).await?;
        info!("bound requests router socket on {}", requests.local_addr());

        Ok(Follower {
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

    /// Fetches the leader's full store and adopts its sequence. Receives
    /// block without polling here: nothing else can proceed until the
    /// follower is caught up. Returns the number of keys received.
    pub async fn catch_up(&mut self) -> Result<usize> {
        self.snapshots
            .send(&Message::snapshot_request(self.store.sequence()))
            .await?;

        let mut keys = 0;
        loop {
            let message = self.snapshots.recv().await?;
            if message.method == Method::Terminate {
                self.store.set_sequence(message.sequence);
                info!("received {} keys and up to date with snapshot {}", keys, message.sequence);
                return Ok(keys);
            }
            keys += 1;
            self.store.restore(message);
        }
    }

    /// Catches up, then serves updates and requests until the shutdown
    /// future resolves. A transport or protocol error stops the engine
    /// and propagates to the supervisor.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.catch_up().await?;

        tokio::pin!(shutdown);
        let mut tick = interval(TICK);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("follower {} stopped", self.replica.name);
                    return Ok(());
                }
                update = self.updates.recv() => {
                    self.on_update(update?);
                }
                request = self.requests.recv() => {
                    let (identity, message) = request?;
                    self.on_request(identity, message)?;
                }
                _ = tick.tick() => {}
            }
        }
    }

    fn on_update(&mut self, message: Message) {
        let sequence = message.sequence;
        if self.store.apply_update(message) {
            debug!("applied update to state {}", sequence);
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

    /// Writes belong at the leader; the follower answers with an error
    /// rather than forwarding.
    fn on_put(&self, identity: Identity, message: Message) {
        let reply = Message::error(
            self.store.sequence(),
            message.key,
            "not the leader cannot put value",
        );
        self.requests.send(identity, reply);
    }
}
