//! Line-oriented serial protocol: state encoding and flag-message decoding.
//!
//! Outbound: `<STATE_NAME>\n`. Inbound: `key1=v1,key2=v2,...\n`. Decoding is
//! best-effort: malformed lines are dropped with a log entry, never surfaced
//! as an error, so noisy input degrades gracefully instead of stopping the
//! arbitration loop.

use tracing::{debug, warn};

use crate::fsm::SafetyState;

/// Encode the current state as one outbound line. Infallible: state names
/// never contain the terminator or field separators.
pub fn encode_state(state: SafetyState) -> String {
    format!("{}\n", state.wire_name())
}

/// One fully-parsed inbound flag message: ordered `key=value` pairs from a
/// single decoded line. Unknown keys are retained here; only recognized
/// keys take effect when folded into the flag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub pairs: Vec<(String, bool)>,
}

impl FlagUpdate {
    /// Value of `key`, last occurrence winning, if present.
    pub fn get(&self, key: &str) -> Option<bool> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

/// Receive-side line assembler.
///
/// Buffers bytes that do not yet form a complete line and carries them over
/// to the next read. Unterminated input longer than `max_line_len` is
/// discarded and parsing resynchronizes at the next terminator, so a peer
/// that never sends a newline cannot grow the buffer without bound.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line_len: usize,
    dropped_lines: u64,
    overflows: u64,
}

impl LineBuffer {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_len,
            dropped_lines: 0,
            overflows: 0,
        }
    }

    /// Bytes buffered without a terminator yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Lines dropped because they did not look like a flag message.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    /// Times the unterminated residue exceeded the bound and was discarded.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Append freshly read bytes and extract every complete line, in order.
    ///
    /// Lines that fail the structural check (at least one `=` and at least
    /// one `,`) are dropped; a bad line never aborts decoding of the lines
    /// behind it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FlagUpdate> {
        self.buf.extend_from_slice(bytes);

        let mut updates = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            match parse_flag_line(&text) {
                Some(update) => updates.push(update),
                None => {
                    self.dropped_lines += 1;
                    debug!(line = %text, "dropping non-flag line");
                }
            }
        }

        if self.buf.len() > self.max_line_len {
            warn!(
                buffered = self.buf.len(),
                max = self.max_line_len,
                "unterminated input exceeds line bound, resynchronizing"
            );
            self.buf.clear();
            self.overflows += 1;
        }

        updates
    }
}

/// Parse one line into a flag update, or `None` if it does not look like a
/// flag message.
///
/// Fields split on `,`; each field splits on its first `=`. A value is true
/// iff its first byte is `'1'`; a field without `=` is skipped.
fn parse_flag_line(line: &str) -> Option<FlagUpdate> {
    if !(line.contains('=') && line.contains(',')) {
        return None;
    }

    let mut pairs = Vec::new();
    for field in line.split(',') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        pairs.push((key.to_string(), value.as_bytes().first() == Some(&b'1')));
    }
    Some(FlagUpdate { pairs })
}

// ─── Tests ──────────────────────────────────────────────────────────
