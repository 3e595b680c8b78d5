//! Repair State Machine — explicit states and legal transition guards.
//!
//! Every repair session starts at `Init` and ends at either `Success` or
//! `Aborted`. The session loop calls `advance()` to move between states;
//! each call validates the edge and records it in the transition log, so
//! a finished session can be replayed state by state.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of repair-session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    /// Resolving backends and indexing the baseline.
    Init,
    /// Running the project's build.
    Building,
    /// Turning build output into feedback and asking the agent for a patch.
    Diagnosing,
    /// Writing the proposed patch to the working tree.
    Patching,
    /// Checking patched files against their pre-patch structure.
    Verifying,
    /// The project builds cleanly — terminal state.
    Success,
    /// Budget exhausted, cancelled or unrecoverable — terminal state.
    Aborted,
}

impl RepairState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Aborted)
    }
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Building => write!(f, "Building"),
            Self::Diagnosing => write!(f, "Diagnosing"),
            Self::Patching => write!(f, "Patching"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Success => write!(f, "Success"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Legal transitions between repair states.
///
/// ```text
/// Init → Building
/// Building → Success | Diagnosing
/// Diagnosing → Patching | Diagnosing   (patch refused before touching the tree)
/// Patching → Verifying | Diagnosing    (write failed and was rolled back)
/// Verifying → Building | Diagnosing
/// any non-terminal → Aborted
/// ```
fn is_legal_transition(from: RepairState, to: RepairState) -> bool {
    use RepairState::*;

    if to == Aborted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Building)
            | (Building, Success)
            | (Building, Diagnosing)
            | (Diagnosing, Patching)
            | (Diagnosing, Diagnosing)
            | (Patching, Verifying)
            | (Patching, Diagnosing)
            // Accepted → rebuild; rejected → diagnose again with the reason
            | (Verifying, Building)
            | (Verifying, Diagnosing)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RepairState,
    pub to: RepairState,
    /// Build attempt number at the time of transition (0 before the first build).
    pub attempt: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RepairState,
    pub to: RepairState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The repair-session state machine.
pub struct StateMachine {
    current: RepairState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Init`.
    pub fn new() -> Self {
        Self {
            current: RepairState::Init,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RepairState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Set the build attempt counter (called by the session loop).
    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: RepairState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            reason = reason.unwrap_or(""),
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Aborted` from any non-terminal state.
    pub fn abort(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RepairState::Aborted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine, keeping only its log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// Get a summary string of the state machine's history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            RepairState::Init,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
