use crate::local_transport::{LocalTransport, Path};
use crate::transport_address::TransportAddress;

/// Writes one datagram to `dest` on `path`, the path the selected (or, in
/// NotNominatedData mode, any valid) pair's local candidate actually owns.
/// Section 4.10 ties the outbound path to the pair, not to any flag on the
/// component; `flag_component_as_low_overhead` only hints to the
/// underlying TURN allocation that ChannelBind is worth the round trip for
/// this peer, it does not change which path a write takes.
pub async fn write_datagram(
    transport: &LocalTransport,
    path: Path,
    bytes: &[u8],
    dest: TransportAddress,
) -> std::io::Result<usize> {
    transport.write(path, bytes, dest).await
}

/// Reads the next application datagram for `component`, pulling from
/// whichever of the Direct/Relayed queues has data first so neither path
/// can starve the other. Each path reads into its own scratch buffer so
/// the two pending reads never alias the caller's `buf` at the same time.
pub async fn read_datagram(
    transport: &LocalTransport,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    if !transport.has_relayed_path() {
        return transport.read_direct(buf).await;
    }

    let mut direct_scratch = vec![0u8; buf.len()];
    let mut relayed_scratch = vec![0u8; buf.len()];
    let n = tokio::select! {
        r = transport.read_direct(&mut direct_scratch) => {
            let n = r?;
            buf[..n].copy_from_slice(&direct_scratch[..n]);
            n
        }
        r = transport.read_relayed(&mut relayed_scratch) => {
            let n = r?;
            buf[..n].copy_from_slice(&relayed_scratch[..n]);
            n
        }
    };
    Ok(n)
}

#[cfg(test)]
mod data_test {
    use super::*;
    use crate::component::Component;

    #[test]
    fn test_low_overhead_flag_defaults_off() {
        let c = Component::new(1);
        assert!(!c.low_overhead);
    }
}
