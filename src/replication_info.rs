use std::collections::BTreeMap;

/// Monotonic replication progress: `{max, progress, have}`.
///
/// `max` is the highest clock time observed across heads known to exist,
/// local or advertised. `progress` counts entries merged during the
/// current replication session. `have` marks time-slots *observed to
/// exist* — a slot can be true before its entry's ancestors are merged.
/// Reset only on `destroy`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationInfo {
    pub max: u64,
    pub progress: u64,
    have: BTreeMap<u64, bool>,
}

impl ReplicationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// An entry with clock time `t` is known to exist (advertised head or
    /// cache-loaded entry).
    pub fn observe(&mut self, t: u64) {
        self.max = self.max.max(t);
        self.have.insert(t, true);
    }

    /// An entry with clock time `t` was merged into the oplog.
    pub fn mark_merged(&mut self, t: u64) {
        self.progress += 1;
        self.have.insert(t, true);
    }

    pub fn have(&self, t: u64) -> bool {
        self.have.get(&t).copied().unwrap_or(false)
    }

    pub fn have_map(&self) -> &BTreeMap<u64, bool> {
        &self.have
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_precedes_materialization() {
        let mut info = ReplicationInfo::new();
        info.observe(512);
        assert_eq!(info.max, 512);
        assert_eq!(info.progress, 0);
        assert!(info.have(512));
        assert!(!info.have(1));

        info.mark_merged(1);
        assert_eq!(info.progress, 1);
        assert!(info.have(1));
        assert_eq!(info.max, 512);
    }

    #[test]
    fn progress_is_monotonic_and_resettable() {
        let mut info = ReplicationInfo::new();
        for t in 1..=5 {
            info.mark_merged(t);
        }
        assert_eq!(info.progress, 5);
        info.reset();
        assert_eq!(info, ReplicationInfo::new());
    }
}
