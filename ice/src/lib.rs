#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod agent;
pub mod candidate;
pub mod checklist;
pub mod component;
pub mod control;
pub mod error;
pub mod local_address;
pub mod local_transport;
pub mod network_type;
pub mod port_reserver;
pub mod rand;
pub mod stun_client;
pub mod stun_discoverer;
pub mod transaction_pool;
pub mod transport_address;
pub mod turn_client;
pub mod use_candidate;

pub use agent::{Agent, AgentConfig, AgentState, FeatureFlags, Signal};
pub use error::{Error, ErrorKind, Result};
