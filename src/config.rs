/// How fences take part in the logical dependence diff.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum FencePolicy {
    /// Fences add no logical dependences; their ordering is only visible
    /// through the event graph.
    #[default]
    EventGraphOnly,
    /// Every later operation of the context depends on the fence, and the
    /// fence depends on every earlier operation.
    LogicalBarrier,
}

/// Knobs of a [`Verifier`](crate::verifier::Verifier) run.
#[must_use]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VerifierConfig {
    fence_policy: FencePolicy,
    verbose: bool,
}

impl VerifierConfig {
    /// Default configuration.
    pub const fn new() -> Self {
        Self {
            fence_policy: FencePolicy::EventGraphOnly,
            verbose: false,
        }
    }

    /// Select how fences contribute to the dependence diff.
    pub const fn with_fence_policy(mut self, fence_policy: FencePolicy) -> Self {
        self.fence_policy = fence_policy;
        self
    }

    /// Attach full requirement descriptions to every finding.
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Selected fence policy.
    #[must_use]
    pub const fn fence_policy(&self) -> FencePolicy {
        self.fence_policy
    }

    /// Whether findings carry full requirement descriptions.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.verbose
    }
}
