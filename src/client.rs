use std::time::Duration;

use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::replica::Replica;
use crate::socket::Dealer;

/// Connects to one replica's requests endpoint and performs single
/// request/reply round trips. No retry, reconnect, or pipelining: once a
/// call times out the connection is in an indeterminate state and the
/// stub should be discarded.
pub struct Client {
    socket: Dealer,
}

impl Client {
    pub async fn connect(replica: &Replica) -> Result<Client> {
        let socket = Dealer::connect(&replica.requests_endpoint()).await?;
        Ok(Client { socket })
    }

    /// Fetches the message that committed `key`. An `Error` reply (for a
    /// missing key) is handed back to the caller, not turned into a
    /// failure.
    pub async fn get(&mut self, key: impl Into<String>, deadline: Duration) -> Result<Message> {
        self.round_trip(Message::get(key), deadline).await
    }

    /// Stores `value` under `key`; the reply carries the sequence the
    /// write committed at, or an `Error` when the replica is not the
    /// leader.
    pub async fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        deadline: Duration,
    ) -> Result<Message> {
        self.round_trip(Message::put(key, value), deadline).await
    }

    async fn round_trip(&mut self, request: Message, deadline: Duration) -> Result<Message> {
        self.socket.send(&request).await?;
        match timeout(deadline, self.socket.recv()).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(Error::Timeout),
        }
    }
}
