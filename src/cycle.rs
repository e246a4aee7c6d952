//! Cyclic driver: transmit → read → decode → fold-in → transition → wait.
//!
//! Single-threaded and cooperative. The state, flag set, and receive buffer
//! are owned by the runner; nothing is shared, nothing is locked. The loop
//! exits when the FSM reaches its terminal state or shutdown is requested.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::SafetyNodeConfig;
use crate::fsm::{SafetyFsm, SafetyState};
use crate::protocol::{self, LineBuffer};
use crate::transport::Transport;

/// Per-run counters, updated every cycle with no allocation.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Cycles executed.
    pub cycles: u64,
    /// Flag messages folded into the FSM.
    pub messages_applied: u64,
    /// Committed state transitions.
    pub transitions: u64,
    /// Outbound writes that failed (retried next cycle).
    pub write_failures: u64,
}

/// The arbitration loop runner.
///
/// Owns the FSM, the receive-side line buffer, and the transport.
pub struct CycleRunner<T: Transport> {
    transport: T,
    fsm: SafetyFsm,
    rx: LineBuffer,
    cycle_time: Duration,
    /// Staleness threshold, when the stale-to-EMERGENCY rule is enabled.
    stale_after: Option<Duration>,
    last_message: Instant,
    shutdown: Arc<AtomicBool>,
    stats: CycleStats,
}

impl<T: Transport> CycleRunner<T> {
    pub fn new(transport: T, config: &SafetyNodeConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            transport,
            fsm: SafetyFsm::new(),
            rx: LineBuffer::new(config.max_line_len),
            cycle_time: Duration::from_millis(config.cycle_time_ms),
            stale_after: config
                .stale_to_emergency
                .then(|| Duration::from_millis(config.upstream_timeout_ms)),
            last_message: Instant::now(),
            shutdown,
            stats: CycleStats::default(),
        }
    }

    #[inline]
    pub fn fsm(&self) -> &SafetyFsm {
        &self.fsm
    }

    #[inline]
    pub fn fsm_mut(&mut self) -> &mut SafetyFsm {
        &mut self.fsm
    }

    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    #[inline]
    pub fn line_buffer(&self) -> &LineBuffer {
        &self.rx
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the arbitration loop until the terminal state is reached or
    /// shutdown is requested.
    pub fn run(&mut self) {
        info!(state = %self.fsm.state(), "entering arbitration loop");

        while !self.fsm.state().is_terminal() {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, leaving arbitration loop");
                return;
            }

            let cycle_start = Instant::now();
            self.cycle_body();

            if let Some(remaining) = self.cycle_time.checked_sub(cycle_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        info!(state = %self.fsm.state(), "terminal state reached, exiting");
    }

    fn cycle_body(&mut self) {
        self.stats.cycles += 1;

        // ═══ TRANSMIT ═══
        let line = protocol::encode_state(self.fsm.state());
        if let Err(e) = self.transport.send(line.as_bytes()) {
            self.stats.write_failures += 1;
            warn!(error = %e, "state transmit failed");
        }

        // ═══ RECEIVE ═══
        // One read attempt; zero bytes means this cycle reuses the last
        // known flag values.
        let mut chunk = [0u8; 256];
        match self.transport.recv(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                for update in self.rx.feed(&chunk[..n]) {
                    self.fsm.apply_update(&update);
                    self.stats.messages_applied += 1;
                    self.last_message = Instant::now();
                }
            }
            Err(e) => warn!(error = %e, "serial read failed"),
        }

        // ═══ STALENESS ═══
        // While the upstream is silent past the threshold, hold EMERGENCY
        // and skip the table: stale flags must not argue the node back out.
        if let Some(stale_after) = self.stale_after {
            if self.last_message.elapsed() > stale_after {
                if !matches!(
                    self.fsm.state(),
                    SafetyState::Emergency | SafetyState::Finished
                ) {
                    warn!(
                        timeout_ms = stale_after.as_millis() as u64,
                        "no upstream flag message within timeout, forcing EMERGENCY"
                    );
                    self.fsm.force_emergency();
                }
                return;
            }
        }

        // ═══ TRANSITION ═══
        if let Some((from, to)) = self.fsm.step() {
            self.stats.transitions += 1;
            info!(%from, %to, "safety state transition");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{FlagSet, MissionStatus, SafetyState as S};
    use std::collections::VecDeque;
    use std::io;

    /// In-memory transport: serves scripted inbound chunks, captures
    /// outbound bytes, and requests shutdown once the script is exhausted
    /// so non-terminating scenarios still end the loop.
    struct ScriptedLink {
        script: VecDeque<Vec<u8>>,
        sent: Vec<u8>,
        fail_sends: bool,
        done: Arc<AtomicBool>,
    }

    impl ScriptedLink {
        fn new(script: &[&[u8]], done: Arc<AtomicBool>) -> Self {
            Self {
                script: script.iter().map(|c| c.to_vec()).collect(),
                sent: Vec::new(),
                fail_sends: false,
                done,
            }
        }
    }

    impl Transport for ScriptedLink {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_sends {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "uplink down"));
            }
            self.sent.extend_from_slice(bytes);
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => {
                    self.done.store(true, Ordering::SeqCst);
                    Ok(0)
                }
            }
        }
    }

    fn test_config() -> SafetyNodeConfig {
        SafetyNodeConfig {
            cycle_time_ms: 1,
            read_timeout_ms: 0,
            ..SafetyNodeConfig::default()
        }
    }

    fn runner_with_script(script: &[&[u8]]) -> CycleRunner<ScriptedLink> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let link = ScriptedLink::new(script, shutdown.clone());
        CycleRunner::new(link, &test_config(), shutdown)
    }

    fn readiness() -> FlagSet {
        FlagSet {
            asms_active: true,
            asb_ok: true,
            ts_active: true,
            mission_status: MissionStatus::Active,
            ..FlagSet::default()
        }
    }

    #[test]
    fn pre_set_shutdown_exits_before_any_cycle() {
        let mut runner = runner_with_script(&[]);
        runner.shutdown.store(true, Ordering::SeqCst);
        runner.run();
        assert_eq!(runner.stats().cycles, 0);
    }

    #[test]
    fn mission_end_reaches_terminal_and_exits() {
        let mut runner = runner_with_script(&[b"EBS=1,THR=0\n"]);
        *runner.fsm_mut() = SafetyFsm::with_state(S::Driving, readiness());
        runner.run();

        assert_eq!(runner.fsm().state(), S::Finished);
        assert_eq!(runner.stats().transitions, 1);
        assert_eq!(runner.stats().messages_applied, 1);
        // The terminal state itself is never transmitted.
        assert_eq!(runner.transport().sent, b"DRIVING\n");
    }

    #[test]
    fn write_failures_are_counted_not_fatal() {
        let mut runner = runner_with_script(&[b"EBS=1,THR=0\n"]);
        runner.transport.fail_sends = true;
        *runner.fsm_mut() = SafetyFsm::with_state(S::Driving, readiness());
        runner.run();

        // The loop still ran to the terminal state despite the dead uplink.
        assert_eq!(runner.fsm().state(), S::Finished);
        assert_eq!(runner.stats().write_failures, 1);
    }

    #[test]
    fn silent_cycle_reuses_last_known_flags() {
        // Cycle 1 delivers KILL=1; cycle 2 is silent but the flag persists
        // and keeps forcing EMERGENCY.
        let mut runner = runner_with_script(&[b"KILL=1,TS=0\n", b""]);
        runner.run();

        assert_eq!(runner.fsm().state(), S::Emergency);
        assert!(runner.fsm().flags().kill_switch_engaged);
        assert!(runner.stats().cycles >= 2);
    }

    #[test]
    fn stale_upstream_forces_emergency_when_enabled() {
        let config = SafetyNodeConfig {
            stale_to_emergency: true,
            upstream_timeout_ms: 0,
            ..test_config()
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let link = ScriptedLink::new(&[], shutdown.clone());
        let mut runner = CycleRunner::new(link, &config, shutdown);
        runner.run();

        assert_eq!(runner.fsm().state(), S::Emergency);
    }

    #[test]
    fn stale_rule_disabled_by_default() {
        // Same silence, default config: the node stays quiescent.
        let mut runner = runner_with_script(&[b"", b""]);
        runner.run();
        assert_eq!(runner.fsm().state(), S::Off);
        assert_eq!(runner.stats().transitions, 0);
    }
}
