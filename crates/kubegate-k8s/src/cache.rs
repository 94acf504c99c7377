use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kubegate_types::ResourceDescriptor;
use parking_lot::RwLock;

/// How long a discovered catalog is trusted before it is fetched again
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

struct Snapshot {
    resources: Arc<HashMap<String, ResourceDescriptor>>,
    fetched_at: Instant,
}

/// Time-bounded snapshot of the resource catalog.
///
/// Readers never observe a half-written catalog: [`ResourceCache::set_all`]
/// swaps the whole map and its timestamp in one step.
pub struct ResourceCache {
    snapshot: RwLock<Snapshot>,
    ttl: Duration,
}

impl ResourceCache {
    /// Create an empty (and therefore invalid) cache
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                resources: Arc::new(HashMap::new()),
                fetched_at: Instant::now(),
            }),
            ttl,
        }
    }

    /// Check if the snapshot is non-empty and younger than the TTL
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Validity as seen at `now`
    pub fn is_valid_at(&self, now: Instant) -> bool {
        let snapshot = self.snapshot.read();
        !snapshot.resources.is_empty()
            && now.saturating_duration_since(snapshot.fetched_at) < self.ttl
    }

    pub fn get(&self, id: &str) -> Option<ResourceDescriptor> {
        self.snapshot.read().resources.get(id).cloned()
    }

    /// Replace the whole catalog and reset its age
    pub fn set_all(&self, resources: HashMap<String, ResourceDescriptor>) {
        *self.snapshot.write() = Snapshot {
            resources: Arc::new(resources),
            fetched_at: Instant::now(),
        };
    }

    /// All descriptors, sorted by id
    pub fn all(&self) -> Vec<ResourceDescriptor> {
        let resources = Arc::clone(&self.snapshot.read().resources);
        let mut all: Vec<ResourceDescriptor> = resources.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// When the current snapshot was stored
    pub fn fetched_at(&self) -> Instant {
        self.snapshot.read().fetched_at
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}
