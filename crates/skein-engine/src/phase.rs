//! Isolate lifecycle phases
//!
//! Phases advance strictly in order. The only transition that may be taken
//! from any phase is the one-shot move into [`Phase::Shutdown`], which is
//! performed with an atomic swap so that concurrent or re-entrant shutdown
//! requests observe the terminal state before any teardown work begins.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of one isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Allocated, native isolate not yet bound
    Uninitialized = 0,
    /// Native isolate created and message runner bound
    Initialized = 1,
    /// Built-in libraries installed; code units may be loaded
    LibrariesSetup = 2,
    /// All code loaded and the isolate marked runnable
    Ready = 3,
    /// Entrypoint scheduled
    Running = 4,
    /// Terminal
    Shutdown = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Uninitialized,
            1 => Phase::Initialized,
            2 => Phase::LibrariesSetup,
            3 => Phase::Ready,
            4 => Phase::Running,
            _ => Phase::Shutdown,
        }
    }

    /// The phase that follows this one on the forward path
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Uninitialized => Some(Phase::Initialized),
            Phase::Initialized => Some(Phase::LibrariesSetup),
            Phase::LibrariesSetup => Some(Phase::Ready),
            Phase::Ready => Some(Phase::Running),
            Phase::Running => Some(Phase::Shutdown),
            Phase::Shutdown => None,
        }
    }

    /// Human-readable phase name
    pub fn name(self) -> &'static str {
        match self {
            Phase::Uninitialized => "Uninitialized",
            Phase::Initialized => "Initialized",
            Phase::LibrariesSetup => "LibrariesSetup",
            Phase::Ready => "Ready",
            Phase::Running => "Running",
            Phase::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase cell shared between the owning task runner and shutdown callers
#[derive(Debug)]
pub struct AtomicPhase(AtomicU8);

impl AtomicPhase {
    /// Create a cell holding `phase`
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    /// Current phase
    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the cell still holds `from`.
    ///
    /// `to` must be the direct successor of `from` and must not be
    /// `Shutdown` (use [`AtomicPhase::mark_shutdown`]). On failure the
    /// observed phase is returned and the cell is unchanged.
    pub fn advance(&self, from: Phase, to: Phase) -> Result<(), Phase> {
        debug_assert_eq!(from.next(), Some(to), "phases may not be skipped");
        debug_assert_ne!(to, Phase::Shutdown);

        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Phase::from_u8)
    }

    /// Mark the cell as shut down.
    ///
    /// Returns the previous phase if this call performed the transition, or
    /// `None` if the cell was already `Shutdown`.
    pub fn mark_shutdown(&self) -> Option<Phase> {
        let previous = Phase::from_u8(self.0.swap(Phase::Shutdown as u8, Ordering::AcqRel));
        if previous == Phase::Shutdown {
            None
        } else {
            Some(previous)
        }
    }
}

impl Default for AtomicPhase {
    fn default() -> Self {
        Self::new(Phase::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Uninitialized < Phase::Initialized);
        assert!(Phase::Initialized < Phase::LibrariesSetup);
        assert!(Phase::LibrariesSetup < Phase::Ready);
        assert!(Phase::Ready < Phase::Running);
        assert!(Phase::Running < Phase::Shutdown);
    }

    #[test]
    fn test_phase_next_chain() {
        let mut phase = Phase::Uninitialized;
        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            visited.push(next);
            phase = next;
        }
        assert_eq!(visited.len(), 6);
        assert_eq!(phase, Phase::Shutdown);
    }

    #[test]
    fn test_advance_in_order() {
        let cell = AtomicPhase::default();
        assert_eq!(cell.advance(Phase::Uninitialized, Phase::Initialized), Ok(()));
        assert_eq!(cell.advance(Phase::Initialized, Phase::LibrariesSetup), Ok(()));
        assert_eq!(cell.load(), Phase::LibrariesSetup);
    }

    #[test]
    fn test_advance_from_wrong_phase_is_rejected() {
        let cell = AtomicPhase::new(Phase::Ready);
        assert_eq!(
            cell.advance(Phase::Initialized, Phase::LibrariesSetup),
            Err(Phase::Ready)
        );
        assert_eq!(cell.load(), Phase::Ready);
    }

    #[test]
    fn test_mark_shutdown_once() {
        let cell = AtomicPhase::new(Phase::Running);
        assert_eq!(cell.mark_shutdown(), Some(Phase::Running));
        assert_eq!(cell.mark_shutdown(), None);
        assert_eq!(cell.load(), Phase::Shutdown);
    }

    #[test]
    fn test_advance_after_shutdown_fails() {
        let cell = AtomicPhase::new(Phase::Ready);
        cell.mark_shutdown();
        assert_eq!(cell.advance(Phase::Ready, Phase::Running), Err(Phase::Shutdown));
    }

    #[test]
    fn test_concurrent_mark_shutdown_single_winner() {
        let cell = Arc::new(AtomicPhase::new(Phase::Running));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.mark_shutdown().is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
