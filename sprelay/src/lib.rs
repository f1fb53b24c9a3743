//! # sprelay
//!
//! A daemon that binds a SUB endpoint and a PUB endpoint and republishes
//! every message received on the first to every subscriber of the second.
//!
//! ```text
//! producers ──▶ sub_endpoint ──▶ sprelay ──▶ pub_endpoint ──▶ consumers
//! ```
//!
//! Producers and consumers are ordinary nanomsg/nng/mangos PUB and SUB
//! sockets dialing the daemon over TCP.
//!
//! ## Layout
//!
//! - [`settings`]: per-environment TOML configuration with per-key defaults
//! - [`daemon`]: detaching from the terminal and the PID file
//! - [`forwarder`]: the relay loop, generic over the pub/sub transport
//! - [`logging`]: tracing subscriber setup
//!
//! The transport lives in `sprelay-sp` (SP over TCP) behind the traits in
//! `sprelay-core::transport`.
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use sprelay::forwarder::Forwarder;
//! use sprelay::settings::Settings;
//! use sprelay_core::error::RelayError;
//! use sprelay_sp::SpTransport;
//!
//! async fn serve(settings: Settings) -> Result<(), RelayError> {
//!     let transport = SpTransport::new(settings.maxprocs, settings.socket_options.clone());
//!     let mut fwd =
//!         Forwarder::bind(&transport, &settings.pub_endpoint, &settings.sub_endpoint).await?;
//!     match fwd.run().await {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     compio::runtime::Runtime::new()?.block_on(serve(Settings::default()))?;
//!     Ok(())
//! }
//! ```

// Only the fork in daemon.rs needs unsafe
#![cfg_attr(not(test), deny(unsafe_code))]

pub mod daemon;
pub mod forwarder;
pub mod logging;
pub mod settings;

pub use forwarder::{ForwardObserver, Forwarder, TracingObserver};
pub use settings::Settings;
