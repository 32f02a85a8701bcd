//! # Mapping health cell.
//!
//! [`Health`] is the only part of a mapping that provider callbacks can reach.
//! It is lock-free: the state lives in an `AtomicU8`, and the first failure is
//! claimed by whoever fills the failure record, so the callback thread
//! (`go_into_failure_mode`) and the scheduler (`health_self_check`) converge on
//! the same idempotent transition. The record is written before the state is
//! published: an observer that sees `Failed` always sees the reason too.
//!
//! ```text
//!   Init ──► Ready
//!     │        │
//!     └──► Failed ◄┘        (terminal)
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use crate::error::MappingError;

/// Health state of a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MappingState {
    /// Started, waiting for the subscription/publish path to confirm.
    Init = 0,
    /// Forwarding confirmed.
    Ready = 1,
    /// Terminal. The object is superseded, never restarted.
    Failed = 2,
}

impl MappingState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MappingState::Init,
            1 => MappingState::Ready,
            _ => MappingState::Failed,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            MappingState::Init => "init",
            MappingState::Ready => "ready",
            MappingState::Failed => "failed",
        }
    }
}

/// Shared, lock-free health of one mapping.
#[derive(Debug)]
pub(crate) struct Health {
    state: AtomicU8,
    forwarding: AtomicBool,
    failure: OnceLock<(Instant, MappingError)>,
}

impl Health {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(MappingState::Init as u8),
            forwarding: AtomicBool::new(true),
            failure: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> MappingState {
        MappingState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Init → Ready`. No-op in any other state.
    pub(crate) fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(
                MappingState::Init as u8,
                MappingState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Init | Ready → Failed`; disables forwarding. Returns true only for the
    /// call that performed the transition, so the reason and timestamp recorded
    /// are those of the first failure.
    pub(crate) fn fail(&self, reason: MappingError) -> bool {
        if self.failure.set((Instant::now(), reason)).is_err() {
            return false;
        }
        self.forwarding.store(false, Ordering::Release);
        self.state
            .store(MappingState::Failed as u8, Ordering::Release);
        true
    }

    pub(crate) fn forwarding_enabled(&self) -> bool {
        self.forwarding.load(Ordering::Acquire)
    }

    pub(crate) fn disable_forwarding(&self) {
        self.forwarding.store(false, Ordering::Release);
    }

    pub(crate) fn failed_at(&self) -> Option<Instant> {
        self.failure.get().map(|(at, _)| *at)
    }

    pub(crate) fn failure(&self) -> Option<&MappingError> {
        self.failure.get().map(|(_, reason)| reason)
    }
}
