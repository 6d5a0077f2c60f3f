use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use stun::message::is_message;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use util::buffer::Buffer;
use util::Conn;

use crate::transaction_pool::{Handled, TransactionPool};
use crate::transport_address::TransportAddress;

/// Largest datagram this transport reads off the wire in one go; matches
/// the practical UDP MTU ceiling the teacher's own transports use.
const MAX_DATAGRAM_SIZE: usize = 1500;

/// Path selects which logical channel a datagram travels over. Direct goes
/// straight to the peer; Relayed goes through an active TURN allocation on
/// this transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Direct = 0,
    Relayed = 1,
}

/// LocalTransport owns one UDP socket and presents the Direct/Relayed path
/// pair described in Section 4.5. It classifies inbound datagrams by
/// sender against the known STUN/TURN service addresses, handing STUN
/// traffic to the Transaction Pool and falling back to TURN decode for
/// anything the pool doesn't claim; everything else lands on the Direct
/// path's read queue. STUN-shaped traffic the pool doesn't recognize and
/// that isn't from a known service is a peer's own connectivity-check
/// traffic (a request, or a response to a transaction we've already given
/// up on) and is routed to `peer_stun_rx` instead of the Direct path's
/// queue, so it never reaches the application as garbled payload.
pub struct LocalTransport {
    conn: Arc<dyn Conn + Send + Sync>,
    pool: Arc<TransactionPool>,
    known_services: AsyncMutex<HashSet<SocketAddr>>,
    direct_queue: Buffer,
    relayed_queue: Buffer,
    relayed_conn: Option<Arc<dyn Conn + Send + Sync>>,
    borrowed_from_reserver: bool,
    read_loop_cancel: AsyncMutex<Option<oneshot::Sender<()>>>,
    relayed_read_loop_cancel: AsyncMutex<Option<oneshot::Sender<()>>>,
    /// Joined by `stop()` after sending the cancel signal, so a caller
    /// reclaiming the borrowed socket (Section 4.5/5's give-back-on-stop)
    /// can rely on the read-loop task having actually released its own
    /// `Arc<Self>` clone by the time `stop()` returns, not merely been
    /// asked to.
    read_loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
    relayed_read_loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
    peer_stun_tx: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    peer_stun_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>>,
}

impl LocalTransport {
    pub fn new(
        conn: Arc<dyn Conn + Send + Sync>,
        pool: Arc<TransactionPool>,
        relayed_conn: Option<Arc<dyn Conn + Send + Sync>>,
        borrowed_from_reserver: bool,
    ) -> Self {
        let (peer_stun_tx, peer_stun_rx) = mpsc::unbounded_channel();
        LocalTransport {
            conn,
            pool,
            known_services: AsyncMutex::new(HashSet::new()),
            direct_queue: Buffer::new(0, 0),
            relayed_queue: Buffer::new(0, 0),
            relayed_conn,
            borrowed_from_reserver,
            read_loop_cancel: AsyncMutex::new(None),
            relayed_read_loop_cancel: AsyncMutex::new(None),
            read_loop_handle: AsyncMutex::new(None),
            relayed_read_loop_handle: AsyncMutex::new(None),
            peer_stun_tx,
            peer_stun_rx: AsyncMutex::new(Some(peer_stun_rx)),
        }
    }

    /// Hands ownership of the peer-STUN-traffic receiver to the caller, for
    /// the agent to drain into the Responder path. Returns `None` if
    /// already taken (each transport is drained by exactly one task).
    pub async fn take_peer_stun_rx(&self) -> Option<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>> {
        self.peer_stun_rx.lock().await.take()
    }

    /// Spawns the task(s) that actually drive Section 4.5's inbound side:
    /// one reading the owned direct-path socket into `handle_inbound`, plus
    /// (when this transport wraps a TURN allocation) a second reading the
    /// relayed conn straight into the Relayed path's queue. The relayed
    /// conn already yields decoded application payloads with their apparent
    /// peer (the TURN client layer underneath performs the ChannelData/Data
    /// indication decode itself), so that side needs no further
    /// classification. Takes `Arc<Self>` rather than running inline in
    /// `new()` so construction stays synchronous and callers control
    /// exactly when the transport starts consuming its socket(s).
    pub async fn spawn_read_loop(self: &Arc<Self>) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.read_loop_cancel.lock().await = Some(cancel_tx);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    result = this.conn.recv_from(&mut buf) => {
                        match result {
                            Ok((n, from)) => {
                                if this.handle_inbound(&buf[..n], from).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });
        *self.read_loop_handle.lock().await = Some(handle);

        if let Some(relayed) = self.relayed_conn.clone() {
            let (relayed_cancel_tx, mut relayed_cancel_rx) = oneshot::channel();
            *self.relayed_read_loop_cancel.lock().await = Some(relayed_cancel_tx);

            let this = self.clone();
            let relayed_handle = tokio::spawn(async move {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                loop {
                    tokio::select! {
                        _ = &mut relayed_cancel_rx => break,
                        result = relayed.recv_from(&mut buf) => {
                            match result {
                                Ok((n, _from)) => {
                                    if this.relayed_queue.write(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    }
                }
            });
            *self.relayed_read_loop_handle.lock().await = Some(relayed_handle);
        }
    }

    pub async fn register_service(&self, addr: SocketAddr) {
        self.known_services.lock().await.insert(addr);
    }

    pub fn has_relayed_path(&self) -> bool {
        self.relayed_conn.is_some()
    }

    /// Exposes the owned direct-path socket so a caller that needs to drive
    /// a Transaction Pool directly (connectivity checks) can do so without
    /// this type re-implementing send/receive itself.
    pub fn as_conn(&self) -> &(dyn Conn + Send + Sync) {
        self.conn.as_ref()
    }

    /// Exposes the relayed-path conn, when this transport has an active
    /// TURN allocation, so a connectivity check for a Relayed local
    /// candidate can be driven through the Transaction Pool the same way a
    /// Direct one is.
    pub fn relayed_conn(&self) -> Option<&(dyn Conn + Send + Sync)> {
        self.relayed_conn.as_deref()
    }

    /// Processes one inbound datagram arriving on the direct-path socket per
    /// the Section 4.5 classification order: any well-formed STUN message
    /// first gets a shot at the Transaction Pool (transaction-id matching
    /// makes this safe regardless of sender, and is what lets our own
    /// outgoing connectivity checks to a peer candidate -- never a "known
    /// service" -- find their response). STUN-shaped traffic the pool
    /// doesn't claim is either a known service's unmatched traffic (falls
    /// through to the Direct queue, same as before) or a peer's own
    /// connectivity-check traffic (routed to the peer-STUN channel for the
    /// Responder path). Everything else lands on the Direct path's queue.
    /// TURN relay traffic never arrives here: it travels over the TURN
    /// allocation's own conn, which `spawn_read_loop` drains into the
    /// Relayed path's queue directly, already decoded by the TURN client
    /// layer underneath.
    pub async fn handle_inbound(&self, bytes: &[u8], from: SocketAddr) -> std::io::Result<()> {
        if is_message(bytes) {
            if let Handled::Handled = self.pool.write_incoming(bytes).await {
                return Ok(());
            }
            let is_known_service = self.known_services.lock().await.contains(&from);
            if !is_known_service {
                let _ = self.peer_stun_tx.send((from, bytes.to_vec()));
                return Ok(());
            }
        }

        self.direct_queue
            .write(bytes)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }

    /// Writes `bytes` out on `path` to `dest`. Direct sends straight on the
    /// owned socket; Relayed hands off to the TURN allocation's conn, which
    /// performs the ChannelData/Send-indication encoding internally.
    pub async fn write(&self, path: Path, bytes: &[u8], dest: TransportAddress) -> std::io::Result<usize> {
        match path {
            Path::Direct => self
                .conn
                .send_to(bytes, dest.into())
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
            Path::Relayed => {
                let relayed = self.relayed_conn.as_ref().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotConnected, "no relayed path")
                })?;
                relayed
                    .send_to(bytes, dest.into())
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            }
        }
    }

    pub async fn read_direct(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.direct_queue
            .read(buf)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    pub async fn read_relayed(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.relayed_queue
            .read(buf)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    /// Cancels the read loop(s) and waits for them to actually exit before
    /// returning, so that by the time this call completes every `Arc<Self>`
    /// clone the read loops held has been dropped. That in turn means the
    /// caller can rely on `conn`'s only remaining strong reference being
    /// whatever it holds alongside this transport (Section 4.5/5's
    /// give-back-on-stop needs exactly that to reclaim a borrowed socket via
    /// `Arc::try_unwrap`). Returns whether the direct-path socket was
    /// borrowed from the port reserver; if not, it is closed here.
    pub async fn stop(&self) -> bool {
        if let Some(cancel) = self.read_loop_cancel.lock().await.take() {
            let _ = cancel.send(());
        }
        if let Some(cancel) = self.relayed_read_loop_cancel.lock().await.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = self.read_loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.relayed_read_loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.direct_queue.close().await;
        self.relayed_queue.close().await;
        if let Some(relayed) = &self.relayed_conn {
            let _ = relayed.close().await;
        }
        if !self.borrowed_from_reserver {
            let _ = self.conn.close().await;
        }
        self.borrowed_from_reserver
    }
}

#[cfg(test)]
mod local_transport_test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use stun::message::{Message, BINDING_REQUEST};
    use tokio::net::UdpSocket;

    async fn loopback_conn() -> (Arc<dyn Conn + Send + Sync>, SocketAddr) {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (Arc::new(socket), addr)
    }

    fn binding_request_bytes() -> Vec<u8> {
        let mut m = Message::new();
        m.typ = BINDING_REQUEST;
        m.write_header();
        m.raw.clone()
    }

    #[tokio::test]
    async fn test_non_stun_datagram_lands_on_direct_queue() {
        let (conn, _) = loopback_conn().await;
        let pool = TransactionPool::new();
        let transport = LocalTransport::new(conn, pool, None, false);

        let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 9);
        transport.register_service(from).await;
        transport.handle_inbound(b"not a stun message", from).await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport.read_direct(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"not a stun message");
    }

    #[tokio::test]
    async fn test_stun_request_from_unknown_sender_routes_to_peer_stun_channel() {
        let (conn, _) = loopback_conn().await;
        let pool = TransactionPool::new();
        let transport = LocalTransport::new(conn, pool, None, false);

        let raw = binding_request_bytes();
        let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 9);
        let mut rx = transport.take_peer_stun_rx().await.unwrap();
        // Never registered as a known service and no matching transaction:
        // this is a peer's own connectivity-check request, not application
        // data, so it must not land on the direct queue.
        transport.handle_inbound(&raw, from).await.unwrap();

        let (got_from, got_bytes) = rx.try_recv().unwrap();
        assert_eq!(got_from, from);
        assert_eq!(got_bytes, raw);

        let mut buf = [0u8; 64];
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(50),
            transport.read_direct(&mut buf)
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_stun_response_from_known_service_is_claimed_by_pool() {
        let (conn, _) = loopback_conn().await;
        let peer = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let pool = TransactionPool::new();
        let transport = Arc::new(LocalTransport::new(conn, pool.clone(), None, false));
        transport.register_service(peer_addr).await;

        let mut request = Message::new();
        request.typ = BINDING_REQUEST;
        request.write_header();

        let waiter_transport = transport.clone();
        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            waiter_pool
                .start(waiter_transport.as_conn(), peer_addr, request, None)
                .await
        });

        // Observe the actual request the pool sent so the response we craft
        // carries a matching transaction id.
        let mut buf = [0u8; 512];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        let mut sent = Message::new();
        sent.unmarshal_binary(&buf[..n]).unwrap();

        let mut response = Message::new();
        response.transaction_id = sent.transaction_id;
        response.typ = stun::message::BINDING_SUCCESS;
        response.write_header();

        // Hands the response straight to handle_inbound the way the read
        // loop would, without needing the loop itself running.
        transport
            .handle_inbound(&response.raw, peer_addr)
            .await
            .unwrap();

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap().transaction_id, sent.transaction_id);

        // Claimed by the pool, so nothing should have landed on the direct
        // queue for this datagram.
        let mut leftover = [0u8; 16];
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(50),
            transport.read_direct(&mut leftover)
        )
        .await
        .is_err());
    }
}
