//! sprelay Core
//!
//! Transport-agnostic building blocks shared by the protocol crate and the
//! daemon:
//! - Endpoint addressing (`endpoint`)
//! - Error types (`error`)
//! - Socket tuning knobs (`options`)
//! - TCP utilities (`tcp`)
//! - The pub/sub transport seam used by the forwarder (`transport`)

// The tcp module needs raw fd/socket access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]

pub mod endpoint;
pub mod error;
pub mod options;
pub mod tcp;
pub mod transport;
