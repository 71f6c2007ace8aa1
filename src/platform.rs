//! The platform probe: runtime identity, host CPU topology, memory page
//! size, and which acceleration backends were detected. The core consumes
//! only `feature(name) -> bool`; nothing here
//! influences scheduling decisions.

/// A point-in-time snapshot of the host the graph is running on, computed
/// once and cached by [`probe`].
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    /// The number of logical CPUs available to this process.
    pub logical_cpus: usize,
    /// The platform's memory page size, in bytes.
    pub page_size: usize,
    /// Acceleration backends this build detected. This core implements none,
    /// so the set is always empty -- sufficient to exercise the interface
    /// contract without fabricating a backend that doesn't exist.
    pub backends: Vec<&'static str>,
}

impl PlatformInfo {
    /// `true` if `name` is among the detected acceleration backends.
    pub fn feature(&self, name: &str) -> bool {
        self.backends.contains(&name)
    }
}

/// A conservative page-size default for platforms without a cheap portable
/// lookup in the dependency stack; matches the common case on the
/// architectures this crate targets.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Probes the host once. Cheap enough to call per graph `start()`, but
/// callers that start many graphs may want to cache the result themselves.
pub fn probe() -> PlatformInfo {
    let logical_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    PlatformInfo {
        logical_cpus,
        page_size: DEFAULT_PAGE_SIZE,
        backends: Vec::new(),
    }
}
