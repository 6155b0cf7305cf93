//! Generated service names.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out `instrumented-delegate-<n>` names, `n` starting at 1.
///
/// Unnamed executors draw from [`NameSequence::global`]; tests and embedders
/// that want reproducible names can pass their own sequence.
#[derive(Debug)]
pub struct NameSequence {
    next: AtomicU64,
}

static GLOBAL: NameSequence = NameSequence::new();

impl NameSequence {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// The process-wide sequence.
    pub fn global() -> &'static NameSequence {
        &GLOBAL
    }

    /// Take the next name.
    pub fn next_name(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("instrumented-delegate-{n}")
    }
}

impl Default for NameSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_one() {
        let seq = NameSequence::new();
        assert_eq!(seq.next_name(), "instrumented-delegate-1");
        assert_eq!(seq.next_name(), "instrumented-delegate-2");
    }

    #[test]
    fn test_concurrent_names_unique() {
        let seq = Arc::new(NameSequence::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = seq.clone();
                thread::spawn(move || (0..50).map(|_| seq.next_name()).collect::<Vec<_>>())
            })
            .collect();

        let names: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(names.len(), 200);
    }
}
