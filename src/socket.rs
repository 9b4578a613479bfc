//! Socket roles over TCP.
//!
//! The protocol thinks in four roles: a router that names each inbound
//! connection with an identity and addresses replies by it, a dealer
//! that dials a router, a publisher that fans messages out to every
//! subscriber, and a subscriber that receives that fan-out. One TCP
//! connection per peer stands in for the message transport; the
//! connection itself is the identity a router routes replies to.
//!
//! Every task a socket spawns is tied to the socket's lifetime: dropping
//! the socket aborts its accept or reader task, which closes the bound
//! port or connection. An engine that stops therefore tears its whole
//! transport down with it.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::message::{read_message, write_message, Message};

const INBOUND_BUFFER: usize = 128;
const FANOUT_BUFFER: usize = 128;

/// Opaque handle naming the connection a reply must be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(u64);

/// Bound endpoint that serves many dialing peers. Received messages are
/// tagged with the identity of the connection they arrived on; sends are
/// addressed by identity and never block the caller.
pub struct Router {
    inbound: mpsc::Receiver<(Identity, Message)>,
    peers: Arc<Mutex<HashMap<Identity, mpsc::UnboundedSender<Message>>>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Router {
    pub async fn bind(addr: &str) -> io::Result<Router> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let peers: Arc<Mutex<HashMap<Identity, mpsc::UnboundedSender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // The accept task owns the listener and, through the join set,
        // every per-connection task; aborting it closes them all.
        let accept_peers = Arc::clone(&peers);
        let accept_task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            let next_identity = AtomicU64::new(1);
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            let identity = Identity(next_identity.fetch_add(1, Ordering::Relaxed));
                            debug!(%peer_addr, ?identity, "accepted connection");
                            let (read_half, write_half) = stream.into_split();

                            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                            accept_peers.lock().unwrap().insert(identity, outbound_tx);
                            connections.spawn(write_outbound(write_half, outbound_rx));

                            let inbound_tx = inbound_tx.clone();
                            let peers = Arc::clone(&accept_peers);
                            connections.spawn(async move {
                                read_inbound(read_half, identity, inbound_tx).await;
                                peers.lock().unwrap().remove(&identity);
                            });
                        }
                        Err(err) => warn!(error = ?err, "failed to accept connection"),
                    },
                    // Reap finished connection tasks so the set stays small.
                    Some(_) = connections.join_next() => {}
                }
            }
        });

        Ok(Router {
            inbound,
            peers,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the next message from any connected peer.
    pub async fn recv(&mut self) -> io::Result<(Identity, Message)> {
        self.inbound.recv().await.ok_or_else(closed)
    }

    /// Queues a message for the connection named by `identity`. Messages
    /// addressed to a peer that is gone are dropped, as a router does.
    pub fn send(&self, identity: Identity, message: Message) {
        let peers = self.peers.lock().unwrap();
        match peers.get(&identity) {
            Some(outbound) => {
                let _ = outbound.send(message);
            }
            None => debug!(?identity, "dropping message for departed peer"),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn read_inbound(
    read_half: OwnedReadHalf,
    identity: Identity,
    inbound: mpsc::Sender<(Identity, Message)>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if inbound.send((identity, message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(?identity, error = ?err, "connection closed with error");
                break;
            }
        }
    }
}

async fn write_outbound(mut write_half: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_message(&mut write_half, &message).await {
            debug!(error = ?err, "failed to deliver message to peer");
            break;
        }
    }
}

/// Dialing counterpart of [`Router`]. Used where blocking on one peer is
/// the intended behaviour: the client stub and the follower's snapshot
/// exchange. Linger is disabled so shutdown never stalls on pending
/// frames.
pub struct Dealer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Dealer {
    pub async fn connect(addr: &str) -> io::Result<Dealer> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_linger(Some(Duration::ZERO))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Dealer {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    pub async fn send(&mut self, message: &Message) -> io::Result<()> {
        write_message(&mut self.writer, message).await
    }

    pub async fn recv(&mut self) -> io::Result<Message> {
        read_message(&mut self.reader).await?.ok_or_else(closed)
    }
}

/// Bound endpoint that fans every published message out to all currently
/// connected subscribers. Best-effort: with no subscribers the message
/// vanishes, a lagging subscriber loses the skipped range, and a dead
/// connection is dropped. Never polled inbound.
pub struct Publisher {
    fanout: broadcast::Sender<Message>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Publisher {
    pub async fn bind(addr: &str) -> io::Result<Publisher> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (fanout, _) = broadcast::channel(FANOUT_BUFFER);

        // As on the router, the accept task owns the listener and every
        // subscriber connection; aborting it closes them all.
        let accept_fanout = fanout.clone();
        let accept_task = tokio::spawn(async move {
            let mut subscribers = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(%peer_addr, "subscriber connected");
                            subscribers.spawn(forward_fanout(stream, accept_fanout.subscribe()));
                        }
                        Err(err) => warn!(error = ?err, "failed to accept subscriber"),
                    },
                    Some(_) = subscribers.join_next() => {}
                }
            }
        });

        Ok(Publisher {
            fanout,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn publish(&self, message: Message) {
        let _ = self.fanout.send(message);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn forward_fanout(mut stream: TcpStream, mut fanout: broadcast::Receiver<Message>) {
    loop {
        match fanout.recv().await {
            Ok(message) => {
                if let Err(err) = write_message(&mut stream, &message).await {
                    debug!(error = ?err, "dropping subscriber");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagged behind the update stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Dialing counterpart of [`Publisher`]. Connecting subscribes to every
/// message the publisher emits from that point on.
pub struct Subscriber {
    inbound: mpsc::Receiver<Message>,
    reader_task: JoinHandle<()>,
}

impl Subscriber {
    pub async fn connect(addr: &str) -> io::Result<Subscriber> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_linger(Some(Duration::ZERO))?;
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);

        // The reader task owns the connection; aborting it closes the
        // stream to the publisher.
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            loop {
                match read_message(&mut reader).await {
                    Ok(Some(message)) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(error = ?err, "update stream closed with error");
                        break;
                    }
                }
            }
        });

        Ok(Subscriber {
            inbound,
            reader_task,
        })
    }

    pub async fn recv(&mut self) -> io::Result<Message> {
        self.inbound.recv().await.ok_or_else(closed)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn router_routes_replies_by_identity() {
        let mut router = Router::bind("127.0.0.1:0").await.expect("bind router");
        let addr = router.local_addr().to_string();

        let mut first = Dealer::connect(&addr).await.expect("connect first");
        let mut second = Dealer::connect(&addr).await.expect("connect second");

        first.send(&Message::get("a")).await.expect("send from first");
        let (first_id, request) = router.recv().await.expect("recv first");
        assert_eq!(request.key, "a");

        second.send(&Message::get("b")).await.expect("send from second");
        let (second_id, request) = router.recv().await.expect("recv second");
        assert_eq!(request.key, "b");
        assert_ne!(first_id, second_id);

        router.send(second_id, Message::error(0, "b", "key not found"));
        router.send(first_id, Message::error(0, "a", "key not found"));

        assert_eq!(second.recv().await.expect("reply to second").key, "b");
        assert_eq!(first.recv().await.expect("reply to first").key, "a");
    }

    #[tokio::test]
    async fn publisher_fans_out_to_all_subscribers() {
        let publisher = Publisher::bind("127.0.0.1:0").await.expect("bind publisher");
        let addr = publisher.local_addr().to_string();

        let mut one = Subscriber::connect(&addr).await.expect("connect one");
        let mut two = Subscriber::connect(&addr).await.expect("connect two");
        // Subscription registration happens on the accept task.
        sleep(Duration::from_millis(50)).await;

        publisher.publish(Message::put("k", "v"));

        assert_eq!(one.recv().await.expect("first delivery").key, "k");
        assert_eq!(two.recv().await.expect("second delivery").key, "k");
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_publications() {
        let publisher = Publisher::bind("127.0.0.1:0").await.expect("bind publisher");
        let addr = publisher.local_addr().to_string();

        publisher.publish(Message::put("early", "lost"));

        let mut late = Subscriber::connect(&addr).await.expect("connect late");
        sleep(Duration::from_millis(50)).await;

        publisher.publish(Message::put("after", "seen"));
        assert_eq!(late.recv().await.expect("delivery").key, "after");
    }

    #[tokio::test]
    async fn dropping_a_router_releases_its_port() {
        let router = Router::bind("127.0.0.1:0").await.expect("bind router");
        let addr = router.local_addr().to_string();
        drop(router);

        // Abort is asynchronous; the port frees once the accept task and
        // its listener are dropped.
        let mut rebound = None;
        for _ in 0..50 {
            match Router::bind(&addr).await {
                Ok(router) => {
                    rebound = Some(router);
                    break;
                }
                Err(_) => sleep(Duration::from_millis(20)).await,
            }
        }
        assert!(rebound.is_some(), "port was not released after drop");
    }

    #[tokio::test]
    async fn dropping_a_publisher_releases_its_port() {
        let publisher = Publisher::bind("127.0.0.1:0").await.expect("bind publisher");
        let addr = publisher.local_addr().to_string();
        drop(publisher);

        let mut rebound = None;
        for _ in 0..50 {
            match Publisher::bind(&addr).await {
                Ok(publisher) => {
                    rebound = Some(publisher);
                    break;
                }
                Err(_) => sleep(Duration::from_millis(20)).await,
            }
        }
        assert!(rebound.is_some(), "port was not released after drop");
    }
}
