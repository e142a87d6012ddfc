//! Simulation phase: brush fill runs only while bootstrapping

/// Where the simulation is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimPhase {
    /// Brushes claim quanta; counts the fill frames still to run
    Bootstrap { frames_remaining: u32 },
    Steady,
}

impl SimPhase {
    /// Phase at startup. A zero budget starts steady.
    pub fn new(bootstrap_frames: u32) -> Self {
        if bootstrap_frames == 0 {
            SimPhase::Steady
        } else {
            SimPhase::Bootstrap { frames_remaining: bootstrap_frames }
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, SimPhase::Bootstrap { .. })
    }

    /// Phase after one recorded frame
    pub fn advance(self) -> Self {
        match self {
            SimPhase::Bootstrap { frames_remaining } if frames_remaining > 1 => {
                SimPhase::Bootstrap { frames_remaining: frames_remaining - 1 }
            }
            SimPhase::Bootstrap { .. } => {
                log::debug!("Simulation bootstrap finished");
                SimPhase::Steady
            }
            SimPhase::Steady => SimPhase::Steady,
        }
    }

    /// Start a new bootstrap, e.g. after a brush geometry changed
    pub fn restart(bootstrap_frames: u32) -> Self {
        Self::new(bootstrap_frames)
    }

    /// First frame of a bootstrap of `bootstrap_frames` frames
    pub fn is_first_bootstrap_frame(&self, bootstrap_frames: u32) -> bool {
        matches!(self, SimPhase::Bootstrap { frames_remaining } if *frames_remaining == bootstrap_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_runs_exactly_budget_frames() {
        let mut phase = SimPhase::new(3);
        let mut fill_frames = 0;
        for _ in 0..10 {
            if phase.is_bootstrap() {
                fill_frames += 1;
            }
            phase = phase.advance();
        }
        assert_eq!(fill_frames, 3);
        assert_eq!(phase, SimPhase::Steady);
    }

    #[test]
    fn test_zero_budget_is_steady() {
        assert_eq!(SimPhase::new(0), SimPhase::Steady);
        assert!(!SimPhase::new(0).is_bootstrap());
    }

    #[test]
    fn test_restart_from_steady() {
        let phase = SimPhase::new(1).advance();
        assert_eq!(phase, SimPhase::Steady);
        let restarted = SimPhase::restart(2);
        assert!(restarted.is_first_bootstrap_frame(2));
        assert!(!restarted.advance().is_first_bootstrap_frame(2));
    }
}
