use crate::sync::{AtomicU64, Ordering};
use derive_more::Display;

/// Stamp identifying one traversal of the event graph.
///
/// Zero is never handed out; it marks nodes that no traversal has visited.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Raw stamp value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Monotonically increasing source of traversal generations.
///
/// Generations drawn from one source never repeat, no matter how many
/// threads draw concurrently. Exhausting the source is a hard error: a reused
/// generation would make a traversal treat unvisited nodes as visited.
#[derive(Debug)]
pub struct GenerationSource {
    next: AtomicU64,
}

#[cfg(not(feature = "loom"))]
static GLOBAL: GenerationSource = GenerationSource {
    next: AtomicU64::new(1),
};

#[cfg(feature = "loom")]
loom::lazy_static! {
    static ref GLOBAL: GenerationSource = GenerationSource::new();
}

impl GenerationSource {
    /// Create a source whose first generation is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a source whose first generation is `first`.
    ///
    /// # Panics
    /// If `first` is zero.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        assert_ne!(first, 0, "GenerationSource::starting_at: [1]");
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// The process-wide source every traversal draws from.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Draw a fresh generation.
    ///
    /// # Panics
    /// If the source is exhausted.
    pub fn next(&self) -> Generation {
        let current = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |g| g.checked_add(1))
            .expect("GenerationSource::next: generation counter overflowed");
        Generation(current)
    }
}

impl Default for GenerationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn generations_increase() {
        let source = GenerationSource::new();
        let a = source.next();
        let b = source.next();
        assert_eq!(a.get(), 1);
        assert!(b > a);
    }

    #[test]
    fn global_generations_are_unique_across_threads() {
        let mut drawn: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        (0..1000)
                            .map(|_| GenerationSource::global().next().get())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let total = drawn.len();
        drawn.sort_unstable();
        drawn.dedup();
        assert_eq!(drawn.len(), total);
        assert!(drawn.iter().all(|&g| g != 0));
    }

    #[test]
    #[should_panic(expected = "generation counter overflowed")]
    fn exhausted_source_panics() {
        let source = GenerationSource::starting_at(u64::MAX - 1);
        assert_eq!(source.next().get(), u64::MAX - 1);
        let _ = source.next();
    }
}
