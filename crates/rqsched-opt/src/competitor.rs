//! Competitor tracking: which tasks share each core.

use std::collections::BTreeSet;
use std::time::Duration;

use rqsched_core::CoreId;

/// Per-core sets of resident task names.
#[derive(Debug, Clone, Default)]
pub struct CompetitorTracker {
    cores: Vec<BTreeSet<String>>,
}

impl CompetitorTracker {
    pub fn new(num_cores: usize) -> Self {
        Self {
            cores: vec![BTreeSet::new(); num_cores],
        }
    }

    pub fn insert(&mut self, core: CoreId, name: &str) {
        if let Some(set) = self.cores.get_mut(core) {
            set.insert(name.to_string());
        }
    }

    pub fn remove(&mut self, core: CoreId, name: &str) {
        if let Some(set) = self.cores.get_mut(core) {
            set.remove(name);
        }
    }

    /// Names resident on `core`, ordered.
    pub fn residents(&self, core: CoreId) -> impl Iterator<Item = &str> {
        self.cores
            .get(core)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn load(&self, core: CoreId) -> usize {
        self.cores.get(core).map_or(0, BTreeSet::len)
    }

    /// Everyone on `core` except `name`.
    pub fn competitors_of(&self, core: CoreId, name: &str) -> Vec<String> {
        self.residents(core)
            .filter(|n| *n != name)
            .map(str::to_string)
            .collect()
    }

    /// The competitor of `name` on `core` with the longest running execution
    /// segment, as reported by `running`. Ties go to the smaller name.
    /// Returns `None` when no competitor has executed at all.
    pub fn cause_task<F>(&self, core: CoreId, name: &str, running: F) -> Option<String>
    where
        F: Fn(&str) -> Duration,
    {
        let mut best: Option<(&str, Duration)> = None;
        for other in self.residents(core).filter(|n| *n != name) {
            let exec = running(other);
            if exec.is_zero() {
                continue;
            }
            // Residents come in name order, so a strict comparison keeps the
            // smaller name on ties.
            if best.is_none_or(|(_, b)| exec > b) {
                best = Some((other, exec));
            }
        }
        best.map(|(n, _)| n.to_string())
    }
}
