//! Chunk lifecycle states and the packed state/version word
//!
//! State and rebuild version share one `AtomicU64` so that "is this result
//! still current, and if so move to the next state" is a single
//! compare-and-swap. No chunk-wide lock is taken for transitions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a tracked chunk
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ChunkState {
    /// Tracked but no generation in flight (initial, or failed and retryable)
    Unloaded = 0,
    /// Waiting for the world thread to capture a snapshot
    LoadingScheduled = 1,
    /// Snapshot captured, mesh job queued or running
    GeneratingShape = 2,
    /// Body and shape exist, body not in the active simulation
    ReadyInactive = 3,
    /// Body and shape exist, body is in the active simulation
    ReadyActive = 4,
    /// Reference count hit zero, waiting for physics-thread cleanup
    Removing = 5,
    /// Generated, but the region has no collidable voxels
    AirChunk = 6,
}

impl ChunkState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Unloaded,
            1 => Self::LoadingScheduled,
            2 => Self::GeneratingShape,
            3 => Self::ReadyInactive,
            4 => Self::ReadyActive,
            5 => Self::Removing,
            6 => Self::AirChunk,
            other => unreachable!("invalid chunk state bits {other}"),
        }
    }

    /// Ready with a body, active or not
    #[inline]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::ReadyInactive | Self::ReadyActive)
    }

    /// A generation is queued or running
    #[inline]
    pub fn is_generating(self) -> bool {
        matches!(self, Self::LoadingScheduled | Self::GeneratingShape)
    }

    /// Generation has finished for the current content
    #[inline]
    pub fn is_settled(self) -> bool {
        self.is_ready() || self == Self::AirChunk
    }
}

/// Whether a pipeline message captured at `message_version` has been
/// superseded by a later schedule, rebuild or unload.
#[inline]
pub fn is_stale(message_version: u64, current_version: u64) -> bool {
    message_version != current_version
}

/// Reasons a version-checked transition was refused
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransitionError {
    /// The slot's version moved on; the caller's work is obsolete
    Stale { current: StateWord },
    /// Version matched but the state does not allow this transition
    Refused { current: StateWord },
}

/// Decoded `(version, state)` pair
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StateWord {
    pub version: u64,
    pub state: ChunkState,
}

impl StateWord {
    #[inline]
    fn decode(raw: u64) -> Self {
        Self {
            version: raw >> 8,
            state: ChunkState::from_bits((raw & 0xFF) as u8),
        }
    }

    #[inline]
    fn encode(version: u64, state: ChunkState) -> u64 {
        (version << 8) | state as u64
    }
}

/// Atomic `(version, state)` cell
///
/// Bits: [version:56][state:8]
#[derive(Debug)]
pub struct AtomicStateWord(AtomicU64);

impl AtomicStateWord {
    pub fn new(state: ChunkState) -> Self {
        Self(AtomicU64::new(StateWord::encode(0, state)))
    }

    #[inline]
    pub fn load(&self) -> StateWord {
        StateWord::decode(self.0.load(Ordering::Acquire))
    }

    /// Bump the version and enter `to`, if `allowed` accepts the current state.
    ///
    /// Returns the new version. This is how every new generation and every
    /// unload starts: the bump invalidates whatever is in flight.
    pub fn bump(
        &self,
        to: ChunkState,
        allowed: impl Fn(ChunkState) -> bool,
    ) -> Result<u64, TransitionError> {
        let mut raw = self.0.load(Ordering::Acquire);
        loop {
            let current = StateWord::decode(raw);
            if !allowed(current.state) {
                return Err(TransitionError::Refused { current });
            }
            let version = current.version + 1;
            match self.0.compare_exchange_weak(
                raw,
                StateWord::encode(version, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(version),
                Err(actual) => raw = actual,
            }
        }
    }

    /// Move `from` → `to` without bumping, only if still at `version`.
    pub fn advance(
        &self,
        version: u64,
        from: ChunkState,
        to: ChunkState,
    ) -> Result<(), TransitionError> {
        let expected = StateWord::encode(version, from);
        match self.0.compare_exchange(
            expected,
            StateWord::encode(version, to),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(actual) => {
                let current = StateWord::decode(actual);
                if is_stale(version, current.version) {
                    Err(TransitionError::Stale { current })
                } else {
                    Err(TransitionError::Refused { current })
                }
            }
        }
    }

    /// Rewrite the state at the current version when `map` returns a new one.
    ///
    /// Used for activation toggles, which never invalidate generation.
    pub fn update_in_place(&self, map: impl Fn(ChunkState) -> Option<ChunkState>) -> StateWord {
        let mut raw = self.0.load(Ordering::Acquire);
        loop {
            let current = StateWord::decode(raw);
            let Some(next) = map(current.state) else {
                return current;
            };
            match self.0.compare_exchange_weak(
                raw,
                StateWord::encode(current.version, next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return StateWord {
                        version: current.version,
                        state: next,
                    }
                }
                Err(actual) => raw = actual,
            }
        }
    }

    /// Reset the state for a freshly allocated or freed slot, keeping the version.
    pub fn reset(&self, state: ChunkState) {
        let version = self.load().version;
        self.0
            .store(StateWord::encode(version, state), Ordering::Release);
    }
}
