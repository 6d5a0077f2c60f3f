use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use stun::addr::MappedAddress;
use stun::message::{Getter, Message, BINDING_REQUEST};
use stun::xoraddr::XorMappedAddress;
use util::Conn;

use crate::transaction_pool::{TransactionError, TransactionPool};
use crate::transport_address::TransportAddress;

/// BindingError is the STUN Binding Client's closed failure set (Section
/// 4.3): the request timed out, the server rejected it, or the response
/// did not carry a usable reflexive-address attribute.
#[derive(Debug, Clone)]
pub enum BindingError {
    Timeout,
    Rejected { code: u16, reason: String },
    Protocol(String),
}

impl From<TransactionError> for BindingError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::Timeout => BindingError::Timeout,
            TransactionError::Rejected { code, reason } => BindingError::Rejected { code, reason },
            TransactionError::Protocol(s) => BindingError::Protocol(s),
        }
    }
}

impl std::fmt::Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingError::Timeout => write!(f, "binding request timed out"),
            BindingError::Rejected { code, reason } => {
                write!(f, "binding request rejected with code {code}: {reason}")
            }
            BindingError::Protocol(s) => write!(f, "binding response protocol error: {s}"),
        }
    }
}
impl std::error::Error for BindingError {}

/// Sends a single Binding Request to `stun_server` over `conn` and reports
/// back the server's view of our reflexive transport address, preferring
/// XOR-MAPPED-ADDRESS and falling back to the plain MAPPED-ADDRESS some
/// older servers still return.
pub async fn discover_reflexive_address(
    pool: &Arc<TransactionPool>,
    conn: &(dyn Conn + Send + Sync),
    stun_server: SocketAddr,
) -> Result<TransportAddress, BindingError> {
    let mut request = Message::new();
    request.typ = BINDING_REQUEST;

    let response = pool.start(conn, stun_server, request, None).await?;

    let mut xor_addr = XorMappedAddress::default();
    if xor_addr.get_from(&response).is_ok() {
        return Ok(TransportAddress::new(xor_addr.ip, xor_addr.port));
    }

    let mut addr = MappedAddress {
        ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: 0,
    };
    if addr.get_from(&response).is_ok() {
        return Ok(TransportAddress::new(addr.ip, addr.port));
    }

    Err(BindingError::Protocol(
        "binding success response carried no mapped address".into(),
    ))
}

#[cfg(test)]
mod stun_client_test {
    use super::*;

    #[test]
    fn test_binding_error_from_transaction_error_preserves_rejection_detail() {
        let e: BindingError = TransactionError::Rejected {
            code: 400,
            reason: "Bad Request".into(),
        }
        .into();
        assert!(matches!(e, BindingError::Rejected { code: 400, .. }));
    }
}
