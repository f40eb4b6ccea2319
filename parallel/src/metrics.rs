use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics shared by every reduction run on one engine.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Number of top-level reductions started.
    pub reductions: Counter,
    /// Number of reductions that returned an error.
    pub failures: Counter,
    /// Number of successful forks (each reserving two budget units).
    pub forks: Counter,
    /// Number of leaf reductions.
    pub leaves: Counter,
    /// Number of splittable ranges reduced sequentially because no budget was available.
    pub fallbacks: Counter,
    /// Budget units currently held across all in-flight reductions.
    pub budget_in_use: Gauge,
}

impl Metrics {
    /// Create metrics and register them with `registry`.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "reductions",
            "Number of reductions started",
            metrics.reductions.clone(),
        );
        registry.register(
            "failures",
            "Number of reductions that failed",
            metrics.failures.clone(),
        );
        registry.register(
            "forks",
            "Number of ranges forked onto child branches",
            metrics.forks.clone(),
        );
        registry.register(
            "leaves",
            "Number of ranges reduced sequentially",
            metrics.leaves.clone(),
        );
        registry.register(
            "fallbacks",
            "Number of splittable ranges reduced sequentially for lack of budget",
            metrics.fallbacks.clone(),
        );
        registry.register(
            "budget_in_use",
            "Number of budget units held by in-flight reductions",
            metrics.budget_in_use.clone(),
        );
        metrics
    }
}
