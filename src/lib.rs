//! # Safety Node
//!
//! Safety-arbitration layer of the autonomous vehicle control stack.
//! Fuses discrete safety signals (e-stop, brakes, throttle, kill switch,
//! EBS, ASMS, ASB health, tractive system) through a deterministic
//! fixed-priority state machine and reports the resolved state over a
//! line-oriented serial link to the upstream compute node, folding the
//! upstream's flag updates back into the fusion logic every cycle.
//!
//! ## Architecture
//!
//! - [`fsm`] — flag set and the fail-safe-biased transition table
//! - [`protocol`] — line codec: state encoding, flag-message decoding
//! - [`cycle`] — the transmit → read → transition → wait driver loop
//! - [`transport`] — serial uplink behind the `Transport` trait
//! - [`config`] — TOML configuration with validation
//! - [`error`] — startup-fatal error taxonomy

pub mod config;
pub mod cycle;
pub mod error;
pub mod fsm;
pub mod protocol;
pub mod transport;
