//! Localization gate
//!
//! Navigation is only allowed while AMCL reports a converged position. The
//! gate watches the x/y variances of each covariance report and fires a
//! transition only when the threshold is crossed, so a steady stream of
//! reports on one side of it stays silent.

use crate::error::{RelayError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Index of the x variance in a row-major 6x6 pose covariance
pub const COVARIANCE_X_INDEX: usize = 0;
/// Index of the y variance in a row-major 6x6 pose covariance
pub const COVARIANCE_Y_INDEX: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizationState {
    Diverged,
    Converged,
}

/// Edge reported by [`NavigationGate::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Localization settled, navigation is allowed again
    Converged,
    /// Localization lost, in-flight navigation must be cancelled
    Diverged,
}

#[derive(Debug)]
pub struct NavigationGate {
    threshold: f64,
    state: Mutex<LocalizationState>,
}

impl NavigationGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: Mutex::new(LocalizationState::Diverged),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self) -> LocalizationState {
        *self.state.lock()
    }

    pub fn is_converged(&self) -> bool {
        self.state() == LocalizationState::Converged
    }

    /// Feed one covariance report, returning the transition it caused if any
    pub fn observe(&self, cov_x: f64, cov_y: f64) -> Option<GateTransition> {
        let converged_now = cov_x < self.threshold && cov_y < self.threshold;
        let mut state = self.state.lock();

        match (*state, converged_now) {
            (LocalizationState::Diverged, true) => {
                *state = LocalizationState::Converged;
                info!("Localization converged (cov x={:.3}, y={:.3})", cov_x, cov_y);
                Some(GateTransition::Converged)
            }
            (LocalizationState::Converged, false) => {
                *state = LocalizationState::Diverged;
                warn!("Localization diverged (cov x={:.3}, y={:.3})", cov_x, cov_y);
                Some(GateTransition::Diverged)
            }
            _ => {
                debug!("Covariance x={:.3}, y={:.3}, no transition", cov_x, cov_y);
                None
            }
        }
    }

    /// Feed a full 36-element covariance matrix
    pub fn observe_covariance(&self, covariance: &[f64]) -> Result<Option<GateTransition>> {
        match (covariance.get(COVARIANCE_X_INDEX), covariance.get(COVARIANCE_Y_INDEX)) {
            (Some(&x), Some(&y)) => Ok(self.observe(x, y)),
            _ => Err(RelayError::Protocol(format!(
                "covariance has {} elements, expected 36",
                covariance.len()
            ))),
        }
    }

    /// Reject navigation while localization is not converged
    pub fn check(&self) -> Result<()> {
        if self.is_converged() {
            Ok(())
        } else {
            Err(RelayError::NavigationRejected(
                "localization has not converged, navigation is not allowed".to_string(),
            ))
        }
    }
}

impl Default for NavigationGate {
    fn default() -> Self {
        Self::new(crate::config::GateConfig::default().covariance_threshold)
    }
}
