use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};

/// PortReserver pre-binds a small pool of UDP sockets up front so several
/// components can obtain consecutive local ports on the same address, then
/// hands them out one at a time. A socket handed out is exclusively owned
/// by whichever Local UDP Transport borrowed it until that transport
/// returns it on stop (RFC 8445 does not mandate consecutive ports; this
/// only helps interoperate with peers that assume Real-Time Transport
/// Protocol's RTP/RTCP-adjacent-port convention).
pub struct PortReserver {
    pools: AsyncMutex<HashMap<IpAddr, Vec<UdpSocket>>>,
}

impl PortReserver {
    pub fn new() -> Arc<Self> {
        Arc::new(PortReserver {
            pools: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Pre-binds `count` sockets on `ip` at consecutive ports, starting
    /// from the first port the OS hands back. Best-effort: if a later bind
    /// in the run fails (port taken), the reservation stops there instead
    /// of failing outright, since a shorter contiguous run is still usable.
    pub async fn reserve(&self, ip: IpAddr, count: usize) -> Result<usize> {
        let first = UdpSocket::bind(SocketAddr::new(ip, 0))
            .await
            .map_err(Error::Io)?;
        let base_port = first.local_addr().map_err(Error::Io)?.port();

        let mut bound = vec![first];
        for i in 1..count as u16 {
            match UdpSocket::bind(SocketAddr::new(ip, base_port + i)).await {
                Ok(s) => bound.push(s),
                Err(_) => break,
            }
        }

        let reserved = bound.len();
        let mut pools = self.pools.lock().await;
        pools.entry(ip).or_default().extend(bound);
        Ok(reserved)
    }

    /// Hands out one pre-bound socket for `ip`, if any remain.
    pub async fn take(&self, ip: IpAddr) -> Result<UdpSocket> {
        let mut pools = self.pools.lock().await;
        match pools.get_mut(&ip).and_then(|v| v.pop()) {
            Some(s) => Ok(s),
            None => Err(Error::ErrPortReserverExhausted),
        }
    }

    /// Returns a borrowed socket to the pool, making it available to the
    /// next caller of `take`.
    pub async fn give_back(&self, ip: IpAddr, socket: UdpSocket) {
        let mut pools = self.pools.lock().await;
        pools.entry(ip).or_default().push(socket);
    }

    pub async fn available(&self, ip: IpAddr) -> usize {
        let pools = self.pools.lock().await;
        pools.get(&ip).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod port_reserver_test {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_reserve_then_take_round_trips_a_socket() {
        let reserver = PortReserver::new();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let reserved = reserver.reserve(ip, 2).await.unwrap();
        assert!(reserved >= 1);
        assert_eq!(reserver.available(ip).await, reserved);

        let socket = reserver.take(ip).await.unwrap();
        assert_eq!(reserver.available(ip).await, reserved - 1);

        reserver.give_back(ip, socket).await;
        assert_eq!(reserver.available(ip).await, reserved);
    }

    #[tokio::test]
    async fn test_take_on_empty_pool_errors() {
        let reserver = PortReserver::new();
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        assert!(matches!(
            reserver.take(ip).await,
            Err(Error::ErrPortReserverExhausted)
        ));
    }
}
