#![warn(rust_2018_idioms)]
#![allow(dead_code)]

#[macro_use]
extern crate lazy_static;

pub mod addr;
pub mod attributes;
mod checks;
pub mod error;
pub mod error_code;
pub mod errors;
pub mod fingerprint;
pub mod integrity;
pub mod message;
pub mod textattrs;
pub mod uattrs;
pub mod xoraddr;

pub use error::Error;
