//! Per-cycle phase timing and object accounting.
//!
//! The controller opens a [`GcTracer`] per collection and the phases record
//! themselves under nested scoped timers, the way the collection phases of a
//! cycle have traditionally been reported (`MC_MARK`, `MC_SWEEP`, ...).

use std::time::{Duration, Instant};

use enum_map::{Enum, EnumMap};
use strum_macros::EnumIter;

/// The named timer regions of a collection cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter)]
pub enum ScopeKind {
    McMark,
    McSweep,
    McSweepNewspace,
    McCompact,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::McMark => "MC_MARK",
            ScopeKind::McSweep => "MC_SWEEP",
            ScopeKind::McSweepNewspace => "MC_SWEEP_NEWSPACE",
            ScopeKind::McCompact => "MC_COMPACT",
        }
    }
}

/// Accounting for one collection cycle.
#[derive(Default)]
pub struct GcTracer {
    scopes: EnumMap<ScopeKind, Duration>,
    is_compacting: bool,
    // Signed: the nursery sweep decrements per survivor, and survivors of
    // a finalized incremental cycle were never counted here.
    marked_count: isize,
    promoted_objects_count: usize,
    promoted_objects_size: usize,
}

impl GcTracer {
    pub fn new() -> GcTracer {
        GcTracer::default()
    }

    pub fn set_is_compacting(&mut self) {
        self.is_compacting = true;
    }

    pub fn is_compacting(&self) -> bool {
        self.is_compacting
    }

    pub fn increment_marked_count(&mut self) {
        self.marked_count += 1;
    }

    pub fn decrement_marked_count(&mut self) {
        self.marked_count -= 1;
    }

    pub fn marked_count(&self) -> isize {
        self.marked_count
    }

    pub fn increment_promoted_objects_size(&mut self, bytes: usize) {
        self.promoted_objects_count += 1;
        self.promoted_objects_size += bytes;
    }

    pub fn promoted_objects_count(&self) -> usize {
        self.promoted_objects_count
    }

    pub fn promoted_objects_size(&self) -> usize {
        self.promoted_objects_size
    }

    pub(crate) fn record_scope_time(&mut self, kind: ScopeKind, elapsed: Duration) {
        self.scopes[kind] += elapsed;
    }

    pub fn scope_time(&self, kind: ScopeKind) -> Duration {
        self.scopes[kind]
    }

    pub fn report(&self) {
        use strum::IntoEnumIterator;
        for kind in ScopeKind::iter() {
            let t = self.scopes[kind];
            if !t.is_zero() {
                debug!("{}: {:?}", kind.as_str(), t);
            }
        }
        debug!(
            "marked {} objects, promoted {} ({} bytes)",
            self.marked_count, self.promoted_objects_count, self.promoted_objects_size
        );
    }
}

/// RAII timer region. Timing for the named scope accumulates on drop.
pub struct TracerScope<'a> {
    tracer: &'a mut GcTracer,
    kind: ScopeKind,
    start: Instant,
}

impl<'a> TracerScope<'a> {
    pub fn new(tracer: &'a mut GcTracer, kind: ScopeKind) -> TracerScope<'a> {
        TracerScope {
            tracer,
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for TracerScope<'_> {
    fn drop(&mut self) {
        self.tracer.record_scope_time(self.kind, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_accumulate() {
        let mut tracer = GcTracer::new();
        {
            let _scope = TracerScope::new(&mut tracer, ScopeKind::McMark);
        }
        {
            let _scope = TracerScope::new(&mut tracer, ScopeKind::McMark);
        }
        // Two regions were timed; durations are additive and non-negative.
        assert!(tracer.scope_time(ScopeKind::McMark) >= Duration::ZERO);
        assert_eq!(tracer.scope_time(ScopeKind::McSweep), Duration::ZERO);
    }

    #[test]
    fn promotion_accounting() {
        let mut tracer = GcTracer::new();
        tracer.increment_promoted_objects_size(64);
        tracer.increment_promoted_objects_size(32);
        assert_eq!(tracer.promoted_objects_count(), 2);
        assert_eq!(tracer.promoted_objects_size(), 96);
    }
}
