//! Safety state fusion: the flag set and the fixed-priority transition table.
//!
//! The table is re-evaluated from scratch every cycle (level-triggered, not
//! edge-triggered), so a condition that persists keeps forcing its
//! consequence. Rule order is the safety contract: every branch that cannot
//! establish a safe, expected progression degrades to `Emergency`.

use std::fmt;

use crate::protocol::FlagUpdate;

/// Discrete safety state reported to the upstream compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyState {
    /// Quiescent; autonomous readiness conditions not met.
    #[default]
    Off,
    /// Armed and waiting for release.
    Ready,
    /// Autonomous mission in progress.
    Driving,
    /// Fault or inconsistent condition; most conservative outcome.
    Emergency,
    /// Mission ended cleanly. Terminal.
    Finished,
}

impl SafetyState {
    /// Canonical wire name, as transmitted on the serial uplink.
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Ready => "READY",
            Self::Driving => "DRIVING",
            Self::Emergency => "EMERGENCY",
            Self::Finished => "FINISHED",
        }
    }

    /// `Finished` has no outgoing transition; the cycle loop exits on it.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Mission assignment status. Only none-vs-active affects arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissionStatus {
    #[default]
    None,
    Active,
}

impl MissionStatus {
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Fused view of all safety-relevant inputs.
///
/// Values persist across cycles until overwritten by a parsed flag message:
/// a silent or garbled cycle reuses the last known values, it never resets
/// flags to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSet {
    /// Autonomous system master switch engaged.
    pub asms_active: bool,
    pub brakes_engaged: bool,
    pub throttle_engaged: bool,
    pub estop_engaged: bool,
    pub kill_switch_engaged: bool,
    /// Emergency brake system actuated.
    pub ebs_engaged: bool,
    /// Autonomous service brake healthy.
    pub asb_ok: bool,
    /// Tractive system energized.
    pub ts_active: bool,
    pub mission_status: MissionStatus,
}

impl FlagSet {
    /// All-false / no-mission flag set (power-on value).
    pub const fn new() -> Self {
        Self {
            asms_active: false,
            brakes_engaged: false,
            throttle_engaged: false,
            estop_engaged: false,
            kill_switch_engaged: false,
            ebs_engaged: false,
            asb_ok: false,
            ts_active: false,
            mission_status: MissionStatus::None,
        }
    }
}

/// Compute the next safety state from the current state and flag set.
///
/// Pure function, evaluated top to bottom; the first matching rule wins.
/// The rule order must be preserved exactly — it encodes the fail-safe bias
/// of the arbitration.
pub fn next_state(current: SafetyState, flags: &FlagSet) -> SafetyState {
    use SafetyState as S;

    // Terminal: nothing leaves Finished.
    if current == S::Finished {
        return S::Finished;
    }

    // Kill switch overrides everything else.
    if flags.kill_switch_engaged {
        return S::Emergency;
    }

    // E-stop pulled while driving.
    if current == S::Driving && flags.estop_engaged {
        return S::Emergency;
    }

    // EBS actuated: a clean mission end only while driving with the
    // throttle released; any other combination is an anomaly.
    if flags.ebs_engaged {
        if flags.mission_status.is_active() && !flags.throttle_engaged {
            return if current == S::Driving {
                S::Finished
            } else {
                S::Emergency
            };
        }
        return S::Emergency;
    }

    // Autonomous readiness: mission assigned, master switch on, service
    // brake healthy, tractive system energized.
    if flags.mission_status.is_active() && flags.asms_active && flags.asb_ok && flags.ts_active {
        if !flags.estop_engaged {
            return if current == S::Ready {
                S::Driving
            } else {
                S::Emergency
            };
        }
        if flags.brakes_engaged {
            return if current == S::Driving {
                S::Ready
            } else {
                S::Emergency
            };
        }
        return S::Off;
    }

    // Quiescent default.
    S::Off
}

/// Single-writer holder of the authoritative state and flag set.
///
/// Owned by the cycle driver; never shared, never locked.
#[derive(Debug, Clone)]
pub struct SafetyFsm {
    state: SafetyState,
    flags: FlagSet,
}

impl SafetyFsm {
    /// Power-on FSM: `Off`, all flags false, no mission.
    pub const fn new() -> Self {
        Self {
            state: SafetyState::Off,
            flags: FlagSet::new(),
        }
    }

    /// Construct at an arbitrary state (scenario tooling and tests).
    pub const fn with_state(state: SafetyState, flags: FlagSet) -> Self {
        Self { state, flags }
    }

    #[inline]
    pub const fn state(&self) -> SafetyState {
        self.state
    }

    #[inline]
    pub const fn flags(&self) -> FlagSet {
        self.flags
    }

    /// Mission status has no wire token; the embedding sets it directly.
    pub fn set_mission_status(&mut self, status: MissionStatus) {
        self.flags.mission_status = status;
    }

    /// Fold one decoded flag message into the flag set.
    ///
    /// Recognized keys overwrite their field; unknown keys are ignored;
    /// keys absent from the message leave their field unchanged. Duplicate
    /// keys within one message: last occurrence wins.
    pub fn apply_update(&mut self, update: &FlagUpdate) {
        for (key, value) in &update.pairs {
            match key.as_str() {
                "ASMS" => self.flags.asms_active = *value,
                "BRK" => self.flags.brakes_engaged = *value,
                "THR" => self.flags.throttle_engaged = *value,
                "ESTOP" => self.flags.estop_engaged = *value,
                "KILL" => self.flags.kill_switch_engaged = *value,
                "EBS" => self.flags.ebs_engaged = *value,
                "ASB" => self.flags.asb_ok = *value,
                "TS" => self.flags.ts_active = *value,
                _ => {} // forward-compatible: unknown keys have no effect
            }
        }
    }

    /// Evaluate the transition table and commit the result.
    ///
    /// Returns `Some((from, to))` when the state changed, `None` otherwise.
    pub fn step(&mut self) -> Option<(SafetyState, SafetyState)> {
        let next = next_state(self.state, &self.flags);
        if next == self.state {
            return None;
        }
        let from = self.state;
        self.state = next;
        Some((from, next))
    }

    /// Force the state to `Emergency` (used by the staleness watchdog).
    #[inline]
    pub fn force_emergency(&mut self) {
        self.state = SafetyState::Emergency;
    }
}

impl Default for SafetyFsm {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
