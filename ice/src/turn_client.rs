use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use turn::client::{Client, ClientConfig};
use util::Conn;

use crate::error::{Error, ErrorKind, Result};
use crate::transport_address::TransportAddress;

const ALLOCATION_MISMATCH: u16 = 437;
const MAX_REBIND_RETRIES: u32 = 3;

/// TurnAllocateClient maintains a UDP allocation on a TURN server. It owns
/// the socket creation `turn::client::Client` itself does not do, which is
/// exactly what the rebind-on-437 retry needs: a fresh local port plus a
/// fresh `Client` bound to it (Section 4.4's failure-handling rule).
pub struct TurnAllocateClient {
    pub turn_server_addr: SocketAddr,
    pub stun_server_configured: bool,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub local_ip: IpAddr,
}

pub struct Allocation {
    pub client: Client,
    pub relayed_conn: Box<dyn Conn + Send + Sync>,
    pub relayed_address: TransportAddress,
    pub server_reflexive_address: Option<TransportAddress>,
}

impl TurnAllocateClient {
    /// Binds a local socket, builds a `turn::client::Client` over it, and
    /// allocates. On a 437 Allocation Mismatch the socket we just bound is
    /// discarded and a fresh one is tried, up to `MAX_REBIND_RETRIES`
    /// times, since the layer that owns socket creation here is this one
    /// (not `turn::client::Client`, which only ever sees what it is
    /// handed).
    pub async fn allocate(&self) -> Result<Allocation> {
        let mut last_err = None;
        for _ in 0..=MAX_REBIND_RETRIES {
            match self.try_allocate_once().await {
                Ok(alloc) => return Ok(alloc),
                Err(turn::Error::ErrAllocateFailed(code, reason)) if code == ALLOCATION_MISMATCH => {
                    last_err = Some((code, reason));
                    continue;
                }
                Err(e) => return Err(Error::Turn(e)),
            }
        }
        let (code, reason) = last_err.unwrap_or((0, "exhausted rebind retries".to_string()));
        let _ = (code, reason);
        Err(Error::ErrAgentFailed(ErrorKind::Turn))
    }

    async fn try_allocate_once(&self) -> std::result::Result<Allocation, turn::Error> {
        let socket = UdpSocket::bind(SocketAddr::new(self.local_ip, 0))
            .await
            .map_err(turn::Error::from)?;
        let conn: Arc<dyn Conn + Send + Sync> = Arc::new(socket);

        let client = Client::new(ClientConfig {
            stun_serv_addr: self.turn_server_addr.to_string(),
            turn_serv_addr: self.turn_server_addr.to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
            realm: self.realm.clone(),
            software: String::new(),
            rto_in_ms: 0,
            conn,
        })
        .await?;

        client.listen().await?;
        let relayed_conn = client.allocate().await?;
        let relayed_address = TransportAddress::from(relayed_conn.local_addr().await?);

        let server_reflexive_address = if self.stun_server_configured {
            None
        } else {
            client
                .send_binding_request()
                .await
                .ok()
                .map(TransportAddress::from)
        };

        Ok(Allocation {
            client,
            relayed_conn: Box::new(relayed_conn),
            relayed_address,
            server_reflexive_address,
        })
    }
}
