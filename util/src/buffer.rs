use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};

/// Buffer is an unbounded-by-default, size-limitable queue of datagrams used
/// to hand packets from an I/O-driven producer (socket read loop, TURN
/// decode, STUN transaction pool) to an application-driven consumer that
/// pulls datagrams in FIFO order.
///
/// A `limit_count` or `limit_size` of 0 means "no limit" on that axis.
pub struct Buffer {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    packets: VecDeque<Vec<u8>>,
    size: usize,
    limit_count: usize,
    limit_size: usize,
    closed: bool,
}

impl Buffer {
    pub fn new(limit_count: usize, limit_size: usize) -> Self {
        Buffer {
            state: Mutex::new(State {
                packets: VecDeque::new(),
                size: 0,
                limit_count,
                limit_size,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends a datagram to the buffer. Returns the number of bytes
    /// enqueued, or `ErrBufferFull` if the buffer is at capacity.
    pub async fn write(&self, packet: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::ErrBufferClosed);
        }
        if state.limit_count > 0 && state.packets.len() >= state.limit_count {
            return Err(Error::ErrBufferFull);
        }
        if state.limit_size > 0 && state.size + packet.len() > state.limit_size {
            return Err(Error::ErrBufferFull);
        }
        state.size += packet.len();
        state.packets.push_back(packet.to_vec());
        drop(state);
        self.notify.notify_one();
        Ok(packet.len())
    }

    /// Pops the oldest datagram, copying it into `buf`. Blocks until a
    /// datagram is available or the buffer is closed.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(packet) = state.packets.pop_front() {
                    state.size -= packet.len();
                    if packet.len() > buf.len() {
                        return Err(Error::ErrBufferShort);
                    }
                    buf[..packet.len()].copy_from_slice(&packet);
                    return Ok(packet.len());
                }
                if state.closed {
                    return Err(Error::ErrBufferClosed);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking check for whether a read would return data immediately.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.packets.is_empty()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.packets.len()
    }

    /// Marks the buffer closed; any blocked or future readers observe
    /// `ErrBufferClosed` once queued datagrams are drained.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }
}

pub type SharedBuffer = Arc<Buffer>;
