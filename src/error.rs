//! Process-level error taxonomy.
//!
//! Only startup failures propagate here and exit non-zero. Everything in
//! the steady-state loop (bad lines, failed writes, empty reads) is
//! absorbed and logged where it happens: the node must keep running and
//! keep reporting rather than crash and stop reporting entirely.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to install shutdown handler: {0}")]
    Shutdown(#[from] ctrlc::Error),
}
