use crate::error::IntakeError;
use serde::{Deserialize, Serialize};

/// Result of submitting the section at a given index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum GateTransition {
    /// The frontier moved forward and `to` was unlocked.
    Advanced { from: usize, to: usize },
    /// The last section was submitted; nothing further to unlock.
    Completed { index: usize },
    /// A non-frontier section was resubmitted; navigation snapped back to the frontier.
    SnappedBack { from: usize, to: usize },
}

impl GateTransition {
    pub fn active_index(self) -> usize {
        match self {
            Self::Advanced { to, .. } | Self::SnappedBack { to, .. } => to,
            Self::Completed { index } => index,
        }
    }
}

/// Ordered unlock flags plus the active pointer.
///
/// `unlocked` is always a true-prefix followed by a false-suffix and index 0 is always
/// unlocked. The frontier is derived from the flags on every read and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatingState {
    unlocked: Vec<bool>,
    active_index: usize,
}

impl GatingState {
    /// Default gating: only the first section is unlocked.
    pub fn new(section_count: usize) -> Self {
        let count = section_count.max(1);
        let mut unlocked = vec![false; count];
        unlocked[0] = true;
        Self {
            unlocked,
            active_index: 0,
        }
    }

    /// Rebuild gating from persisted flags.
    ///
    /// Flags with a gap are rejected. An active index that points at a locked or
    /// out-of-range section is snapped to the frontier.
    pub fn from_parts(unlocked: Vec<bool>, active_index: usize) -> Result<Self, IntakeError> {
        if unlocked.is_empty() {
            return Err(IntakeError::Persistence(
                "gating flags must cover at least one section".to_string(),
            ));
        }
        if !unlocked[0] {
            return Err(IntakeError::Persistence(
                "first section must always be unlocked".to_string(),
            ));
        }
        let prefix = unlocked.iter().take_while(|flag| **flag).count();
        if unlocked[prefix..].iter().any(|flag| *flag) {
            return Err(IntakeError::Persistence(format!(
                "gating flags have a gap after index {}",
                prefix - 1
            )));
        }

        let mut state = Self {
            unlocked,
            active_index,
        };
        if !state.is_unlocked(active_index) {
            state.active_index = state.frontier();
        }
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.unlocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty()
    }

    pub fn unlocked(&self) -> &[bool] {
        &self.unlocked
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn is_unlocked(&self, index: usize) -> bool {
        self.unlocked.get(index).copied().unwrap_or(false)
    }

    /// Highest unlocked index.
    pub fn frontier(&self) -> usize {
        self.unlocked.iter().rposition(|flag| *flag).unwrap_or(0)
    }

    /// Every section index a user may navigate to.
    pub fn reachable(&self) -> Vec<usize> {
        self.unlocked
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .map(|(index, _)| index)
            .collect()
    }

    /// True once every section has been unlocked.
    pub fn is_complete(&self) -> bool {
        self.unlocked.iter().all(|flag| *flag)
    }

    /// Apply a successful submission of the section at `from_index`.
    pub fn advance(&mut self, from_index: usize) -> GateTransition {
        let frontier = self.frontier();
        if from_index != frontier {
            self.active_index = frontier;
            return GateTransition::SnappedBack {
                from: from_index,
                to: frontier,
            };
        }

        let next = from_index + 1;
        if next >= self.unlocked.len() {
            self.active_index = from_index;
            return GateTransition::Completed { index: from_index };
        }

        self.unlocked[next] = true;
        self.active_index = next;
        GateTransition::Advanced {
            from: from_index,
            to: next,
        }
    }

    /// Move the active pointer for review. Locked targets are rejected without change.
    pub fn select(&mut self, index: usize) -> bool {
        if !self.is_unlocked(index) {
            return false;
        }
        self.active_index = index;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.unlocked.len());
    }
}
