use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stun::attributes::{ATTR_ERROR_CODE, ATTR_NONCE, ATTR_REALM};
use stun::error_code::{ErrorCodeAttribute, CODE_STALE_NONCE, CODE_UNAUTHORIZED};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{Getter, Message, Setter, TransactionId};
use stun::textattrs::{Nonce, Realm, Username};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use util::Conn;

/// Initial retransmission timeout (RFC 8489 Section 6.2.1).
pub const RTO: Duration = Duration::from_millis(500);
/// Number of retransmissions before giving up on a response.
pub const RC: u32 = 7;
/// Multiplier applied to the last interval while waiting after the final
/// retransmission, before declaring a timeout.
pub const RM: u32 = 16;
/// Total retransmission budget cap (Ti), for completeness's sake (UDP
/// transactions finish well before this via the Rc/Rm schedule above).
pub const TI: Duration = Duration::from_millis(39_500);

#[derive(Debug, Clone)]
pub enum TransactionError {
    Timeout,
    Rejected { code: u16, reason: String },
    Protocol(String),
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionError::Timeout => write!(f, "transaction timed out"),
            TransactionError::Rejected { code, reason } => {
                write!(f, "request rejected with code {code}: {reason}")
            }
            TransactionError::Protocol(s) => write!(f, "protocol error: {s}"),
        }
    }
}
impl std::error::Error for TransactionError {}

/// Credentials a Transaction Pool may attach to outgoing requests.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Short-term auth as used by ICE connectivity checks: USERNAME =
    /// "remote-ufrag:local-ufrag", key = raw password.
    ShortTerm { username: String, password: String },
    /// Long-term auth as used by TURN: realm/nonce are learned from a 401
    /// challenge and then attached to the retried request.
    LongTerm {
        username: String,
        password: String,
        realm: Option<String>,
        nonce: Option<String>,
    },
}

struct PendingEntry {
    tx: oneshot::Sender<Message>,
}

/// TransactionPool owns the live set of 96-bit transaction ids in flight on
/// one Local UDP Transport and matches inbound STUN responses to the
/// request that spawned them.
#[derive(Default)]
pub struct TransactionPool {
    pending: AsyncMutex<HashMap<TransactionId, PendingEntry>>,
}

pub enum Handled {
    Handled,
    NotOurs,
}

impl TransactionPool {
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionPool::default())
    }

    /// Draws a fresh transaction id, rejecting collisions against the live
    /// set (RFC 8489 Section 6's uniqueness requirement).
    async fn next_transaction_id(&self) -> TransactionId {
        let pending = self.pending.lock().await;
        loop {
            let id = TransactionId::new();
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// write_incoming attempts to match `bytes` (already known to look like
    /// a STUN message) against an in-flight transaction. Returns
    /// `NotOurs` for anything that does not parse or does not match a
    /// pending id, so the caller (Local UDP Transport) can fall through to
    /// TURN decode.
    pub async fn write_incoming(&self, bytes: &[u8]) -> Handled {
        let mut m = Message::new();
        if m.unmarshal_binary(bytes).is_err() {
            return Handled::NotOurs;
        }
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.remove(&m.transaction_id) {
            let _ = entry.tx.send(m);
            Handled::Handled
        } else {
            Handled::NotOurs
        }
    }

    /// Runs one request to completion against `conn`, including the
    /// RTO-doubling retransmission schedule and a single long-term-auth
    /// challenge/retry cycle (401 -> resend with REALM/NONCE, 438 -> update
    /// nonce and resend once more).
    pub async fn start(
        self: &Arc<Self>,
        conn: &(dyn Conn + Send + Sync),
        remote: SocketAddr,
        mut request: Message,
        credentials: Option<Credentials>,
    ) -> Result<Message, TransactionError> {
        request.transaction_id = self.next_transaction_id().await;
        self.apply_credentials(&mut request, credentials.as_ref())?;

        match self.run_with_retransmits(conn, remote, request.clone()).await {
            Ok(resp) => self.handle_response(conn, remote, request, resp, credentials).await,
            Err(e) => Err(e),
        }
    }

    fn apply_credentials(
        &self,
        request: &mut Message,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransactionError> {
        if let Some(Credentials::ShortTerm { username, password }) = credentials {
            Username::new(stun::attributes::ATTR_USERNAME, username.clone())
                .add_to(request)
                .map_err(|e| TransactionError::Protocol(e.to_string()))?;
            MessageIntegrity::new_short_term_integrity(password.clone())
                .add_to(request)
                .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        }
        request.write_header();
        Ok(())
    }

    async fn run_with_retransmits(
        &self,
        conn: &(dyn Conn + Send + Sync),
        remote: SocketAddr,
        request: Message,
    ) -> Result<Message, TransactionError> {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request.transaction_id, PendingEntry { tx });
        }

        let send_result = conn.send_to(&request.raw, remote).await;
        if let Err(e) = send_result {
            self.pending.lock().await.remove(&request.transaction_id);
            return Err(TransactionError::Protocol(e.to_string()));
        }

        let mut interval = RTO;
        for attempt in 0..RC {
            match timeout(interval, &mut rx).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(_)) => {
                    // Channel closed without a value: pool was dropped.
                    return Err(TransactionError::Timeout);
                }
                Err(_) => {
                    if attempt + 1 < RC {
                        let _ = conn.send_to(&request.raw, remote).await;
                        interval *= 2;
                    }
                }
            }
        }

        // Final wait: Rm * last interval, per the spec's retransmission
        // schedule, before declaring the transaction timed out.
        let final_wait = (interval * RM).min(TI);
        match timeout(final_wait, &mut rx).await {
            Ok(Ok(resp)) => Ok(resp),
            _ => {
                self.pending.lock().await.remove(&request.transaction_id);
                Err(TransactionError::Timeout)
            }
        }
    }

    async fn handle_response(
        self: &Arc<Self>,
        conn: &(dyn Conn + Send + Sync),
        remote: SocketAddr,
        original: Message,
        response: Message,
        credentials: Option<Credentials>,
    ) -> Result<Message, TransactionError> {
        if response.typ.class != stun::message::CLASS_ERROR_RESPONSE {
            return Ok(response);
        }

        let mut error_code = ErrorCodeAttribute::default();
        if error_code.get_from(&response).is_err() {
            return Err(TransactionError::Protocol(
                "error response missing ERROR-CODE".into(),
            ));
        }

        let retryable_long_term = matches!(
            credentials,
            Some(Credentials::LongTerm { .. })
        ) && (error_code.code == CODE_UNAUTHORIZED || error_code.code == CODE_STALE_NONCE);

        if !retryable_long_term || !response.contains(ATTR_ERROR_CODE) {
            return Err(TransactionError::Rejected {
                code: error_code.code.0,
                reason: String::from_utf8_lossy(&error_code.reason).into_owned(),
            });
        }

        let (username, password, mut realm, mut nonce) = match credentials {
            Some(Credentials::LongTerm {
                username,
                password,
                realm,
                nonce,
            }) => (username, password, realm, nonce),
            _ => unreachable!("retryable_long_term implies LongTerm credentials"),
        };

        if realm.is_none() || error_code.code == CODE_STALE_NONCE {
            if response.contains(ATTR_REALM) {
                let mut r = Realm::default();
                r.get_from(&response)
                    .map_err(|e| TransactionError::Protocol(e.to_string()))?;
                realm = Some(r.text);
            }
        }
        if response.contains(ATTR_NONCE) {
            let mut n = Nonce::default();
            n.get_from(&response)
                .map_err(|e| TransactionError::Protocol(e.to_string()))?;
            nonce = Some(n.text);
        }

        let realm = realm.ok_or_else(|| TransactionError::Protocol("missing REALM".into()))?;
        let nonce = nonce.ok_or_else(|| TransactionError::Protocol("missing NONCE".into()))?;

        let mut retry = Message::new();
        retry.typ = original.typ;
        retry.new_transaction_id().ok();
        for attr in original.attributes.0.iter() {
            if attr.typ != stun::attributes::ATTR_MESSAGE_INTEGRITY
                && attr.typ != stun::attributes::ATTR_FINGERPRINT
            {
                retry.add(attr.typ, &attr.value);
            }
        }

        Username::new(stun::attributes::ATTR_USERNAME, username.clone())
            .add_to(&mut retry)
            .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        Realm::new(ATTR_REALM, realm.clone())
            .add_to(&mut retry)
            .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        Nonce::new(ATTR_NONCE, nonce.clone())
            .add_to(&mut retry)
            .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        MessageIntegrity::new_long_term_integrity(username.clone(), realm.clone(), password.clone())
            .add_to(&mut retry)
            .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        FINGERPRINT
            .add_to(&mut retry)
            .map_err(|e| TransactionError::Protocol(e.to_string()))?;
        retry.write_header();

        let resp = self.run_with_retransmits(conn, remote, retry).await?;
        if resp.typ.class == stun::message::CLASS_ERROR_RESPONSE {
            let mut ec = ErrorCodeAttribute::default();
            let _ = ec.get_from(&resp);
            return Err(TransactionError::Rejected {
                code: ec.code.0,
                reason: String::from_utf8_lossy(&ec.reason).into_owned(),
            });
        }
        Ok(resp)
    }
}

