//! Graph-wide tunables: ring capacity, process chunk size, and the other
//! knobs the scheduler needs that are independent of any one block or
//! topology, resolved once per graph rather than per callback.

/// Configuration governing buffer sizing and the scheduler's per-`process`
/// chunk size. Builder-style with defaults sized for a typical software
/// radio process chunk, sized so ring capacity comfortably exceeds twice
/// a typical chunk's worth of samples.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub(crate) ring_capacity_samples: usize,
    pub(crate) object_queue_capacity: usize,
    pub(crate) chunk_size: usize,
    pub(crate) stall_warn_threshold_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            ring_capacity_samples: 1 << 15,
            object_queue_capacity: 256,
            chunk_size: 4096,
            stall_warn_threshold_ms: 500,
        }
    }
}

impl GraphConfig {
    /// Starts from the defaults; use the `with_*` builders to override.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity, in samples, of each fixed-ring edge buffer.
    pub fn with_ring_capacity_samples(mut self, n: usize) -> Self {
        self.ring_capacity_samples = n;
        self
    }

    /// Capacity, in unconsumed objects, of each object-queue edge buffer.
    pub fn with_object_queue_capacity(mut self, n: usize) -> Self {
        self.object_queue_capacity = n;
        self
    }

    /// The number of samples (or objects) the scheduler asks a block to
    /// process per `process` call, capped by whatever is actually available.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// How long a worker may sit suspended on a buffer before the scheduler
    /// logs a back-pressure stall warning, in milliseconds.
    pub fn with_stall_warn_threshold_ms(mut self, ms: u64) -> Self {
        self.stall_warn_threshold_ms = ms;
        self
    }

    pub fn ring_capacity_samples(&self) -> usize {
        self.ring_capacity_samples
    }

    pub fn object_queue_capacity(&self) -> usize {
        self.object_queue_capacity
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn stall_warn_threshold_ms(&self) -> u64 {
        self.stall_warn_threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = GraphConfig::new()
            .with_chunk_size(128)
            .with_ring_capacity_samples(256);
        assert_eq!(cfg.chunk_size(), 128);
        assert_eq!(cfg.ring_capacity_samples(), 256);
        assert_eq!(cfg.object_queue_capacity(), GraphConfig::default().object_queue_capacity());
    }
}
