//! End-to-end scenarios over real sockets on localhost: writes sequence
//! at the leader, followers catch up by snapshot and apply published
//! updates, and only the leader accepts writes.

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::oneshot;
use tokio::time::sleep;

use bellwether::client::Client;
use bellwether::follower::Follower;
use bellwether::leader::Leader;
use bellwether::message::{Message, Method};
use bellwether::replica::Replica;

const DEADLINE: Duration = Duration::from_secs(2);

fn replica(pid: u16, name: &str, base_port: u16) -> Replica {
    Replica {
        pid,
        name: name.to_string(),
        addr: "127.0.0.1".to_string(),
        host: "localhost".to_string(),
        ipaddr: "127.0.0.1".to_string(),
        updates: base_port,
        snapshots: base_port + 1,
        requests: base_port + 2,
    }
}

/// A running engine plus the handle to stop it cleanly.
struct Engine {
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<bellwether::Result<()>>,
}

impl Engine {
    async fn stop(self) -> Result<()> {
        let _ = self.stop.send(());
        self.handle.await??;
        Ok(())
    }
}

async fn spawn_leader(record: Replica) -> Result<Engine> {
    let engine = Leader::bind(record).await?;
    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(engine.run_until(async move {
        let _ = stopped.await;
    }));
    Ok(Engine { stop, handle })
}

async fn spawn_follower(record: Replica, leader: &Replica) -> Result<Engine> {
    let engine = Follower::connect(record, leader).await?;
    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(engine.run_until(async move {
        let _ = stopped.await;
    }));
    Ok(Engine { stop, handle })
}

#[tokio::test]
async fn put_then_get_round_trips_at_the_leader() -> Result<()> {
    let record = replica(1, "alpha", 17110);
    let leader = spawn_leader(record.clone()).await?;
    let mut client = Client::connect(&record).await?;

    let reply = client.put("alpha", "1", DEADLINE).await?;
    assert_eq!(reply.method, Method::Put);
    assert_eq!(reply.sequence, 1);
    assert_eq!(reply.key, "alpha");
    assert_eq!(reply.body, b"1");

    let reply = client.get("alpha", DEADLINE).await?;
    assert_eq!(reply.method, Method::Put);
    assert_eq!(reply.sequence, 1);
    assert_eq!(reply.key, "alpha");
    assert_eq!(reply.body, b"1");

    leader.stop().await
}

#[tokio::test]
async fn get_miss_replies_with_an_error_message() -> Result<()> {
    let record = replica(1, "alpha", 17120);
    let leader = spawn_leader(record.clone()).await?;
    let mut client = Client::connect(&record).await?;

    let reply = client.get("missing", DEADLINE).await?;
    assert_eq!(reply.method, Method::Error);
    assert_eq!(reply.sequence, 0);
    assert_eq!(reply.key, "missing");
    assert_eq!(reply.body, b"key not found");

    leader.stop().await
}

#[tokio::test]
async fn follower_catch_up_mirrors_the_leader_store() -> Result<()> {
    let leader_record = replica(1, "alpha", 17130);
    let follower_record = replica(2, "bravo", 17135);
    let leader = spawn_leader(leader_record.clone()).await?;

    // Seven writes, arranged so "a" last committed at sequence 3 and "b"
    // at sequence 7.
    let mut client = Client::connect(&leader_record).await?;
    for (key, value) in [
        ("a", "x0"),
        ("a", "x1"),
        ("a", "x"),
        ("b", "y0"),
        ("b", "y1"),
        ("b", "y2"),
        ("b", "y"),
    ] {
        client.put(key, value, DEADLINE).await?;
    }

    let mut follower = Follower::connect(follower_record, &leader_record).await?;
    let keys = follower.catch_up().await?;
    assert_eq!(keys, 2);
    assert_eq!(follower.store().sequence(), 7);
    assert_eq!(
        follower.store().get("a"),
        Some(&Message {
            method: Method::Put,
            sequence: 3,
            key: "a".to_string(),
            body: b"x".to_vec(),
        })
    );
    assert_eq!(
        follower.store().get("b"),
        Some(&Message {
            method: Method::Put,
            sequence: 7,
            key: "b".to_string(),
            body: b"y".to_vec(),
        })
    );

    leader.stop().await
}

#[tokio::test]
async fn updates_propagate_to_a_caught_up_follower() -> Result<()> {
    let leader_record = replica(1, "alpha", 17140);
    let follower_record = replica(2, "bravo", 17145);
    let leader = spawn_leader(leader_record.clone()).await?;

    let mut client = Client::connect(&leader_record).await?;
    for n in 0..7 {
        client.put(format!("seed{n}"), "s", DEADLINE).await?;
    }

    let follower = spawn_follower(follower_record.clone(), &leader_record).await?;
    // Give the subscriber time to register with the publish fan-out.
    sleep(Duration::from_millis(200)).await;

    let reply = client.put("c", "z", DEADLINE).await?;
    assert_eq!(reply.sequence, 8);

    // Publication is best-effort, so poll the follower until it has
    // applied the update.
    let mut follower_client = Client::connect(&follower_record).await?;
    let mut applied = None;
    for _ in 0..100 {
        let reply = follower_client.get("c", DEADLINE).await?;
        if reply.method == Method::Put {
            applied = Some(reply);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let Some(reply) = applied else {
        bail!("update never propagated to the follower");
    };
    assert_eq!(reply.sequence, 8);
    assert_eq!(reply.key, "c");
    assert_eq!(reply.body, b"z");

    // Keys from the snapshot stay readable at the follower too.
    let reply = follower_client.get("seed0", DEADLINE).await?;
    assert_eq!(reply.method, Method::Put);
    assert_eq!(reply.sequence, 1);

    follower.stop().await?;
    leader.stop().await
}

#[tokio::test]
async fn follower_rejects_puts_without_forwarding() -> Result<()> {
    let leader_record = replica(1, "alpha", 17150);
    let follower_record = replica(2, "bravo", 17155);
    let leader = spawn_leader(leader_record.clone()).await?;
    let follower = spawn_follower(follower_record.clone(), &leader_record).await?;
    sleep(Duration::from_millis(100)).await;

    let mut client = Client::connect(&follower_record).await?;
    let reply = client.put("k", "v", DEADLINE).await?;
    assert_eq!(reply.method, Method::Error);
    assert_eq!(reply.key, "k");
    assert_eq!(reply.body, b"not the leader cannot put value");
    assert_eq!(reply.sequence, 0);

    // The write never reached the leader.
    let mut leader_client = Client::connect(&leader_record).await?;
    let reply = leader_client.get("k", DEADLINE).await?;
    assert_eq!(reply.method, Method::Error);
    assert_eq!(reply.body, b"key not found");

    follower.stop().await?;
    leader.stop().await
}

#[tokio::test]
async fn stopping_the_leader_releases_its_endpoints() -> Result<()> {
    let record = replica(1, "alpha", 17160);
    let leader = spawn_leader(record.clone()).await?;
    let mut client = Client::connect(&record).await?;
    client.put("k", "v", DEADLINE).await?;
    leader.stop().await?;

    // Teardown is asynchronous; the ports free once the socket tasks and
    // their listeners are dropped.
    let mut rebound = None;
    for _ in 0..50 {
        match Leader::bind(record.clone()).await {
            Ok(engine) => {
                rebound = Some(engine);
                break;
            }
            Err(_) => sleep(Duration::from_millis(20)).await,
        }
    }
    assert!(rebound.is_some(), "leader endpoints were not released");
    Ok(())
}

#[tokio::test]
async fn client_times_out_when_no_reply_arrives() -> Result<()> {
    // A listener that accepts and then stays silent.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let record = Replica {
        pid: 1,
        name: "mute".to_string(),
        addr: "127.0.0.1".to_string(),
        host: "localhost".to_string(),
        ipaddr: "127.0.0.1".to_string(),
        updates: 0,
        snapshots: 0,
        requests: port,
    };

    let mut client = Client::connect(&record).await?;
    let err = client
        .get("k", Duration::from_millis(200))
        .await
        .expect_err("silent server must time the call out");
    assert!(matches!(err, bellwether::Error::Timeout));
    Ok(())
}
