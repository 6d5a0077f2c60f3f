use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// ErrorKind is the agent-level failure taxonomy surfaced through the
/// `error(kind)` signal (the last signal before the agent transitions to
/// `Stopped`).
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("no local port could be bound")]
    Bind,
    #[error("all STUN binding probes failed")]
    Stun,
    #[error("TURN allocation failed after retries")]
    Turn,
    #[error("PAC timeout or internal invariant violation")]
    Generic,
    #[error("nomination or triggered-check-for-nominated failed")]
    Disconnected,
}

/// Error is the closed set of failures this crate can produce. Transaction
/// and pair-local failures (`Timeout`, `Rejected`, `Protocol`, `Auth`) stay
/// local to the pair or transaction that produced them and never surface
/// here directly; they only escalate to an `ErrorKind` per the rules in
/// `agent::scheduler`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("agent already started")]
    ErrMultipleStart,
    #[error("agent is closed")]
    ErrClosed,
    #[error("no candidate pairs available")]
    ErrNoCandidatePairs,
    #[error("remote ufrag must not be empty")]
    ErrRemoteUfragEmpty,
    #[error("remote password must not be empty")]
    ErrRemotePwdEmpty,
    #[error("username fragment must not be empty")]
    ErrUsernameEmpty,
    #[error("password must not be empty")]
    ErrPasswordEmpty,
    #[error("component index {0} is out of range")]
    ErrInvalidComponent(usize),
    #[error("attempt to add a candidate with an unknown component")]
    ErrUnknownComponent,
    #[error("no local addresses configured")]
    ErrNoLocalAddresses,
    #[error("port reserver pool exhausted")]
    ErrPortReserverExhausted,
    #[error("agent failed: {0}")]
    ErrAgentFailed(ErrorKind),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Turn(#[from] turn::Error),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
