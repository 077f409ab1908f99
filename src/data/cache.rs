use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use rustc_hash::FxHasher;

use super::aggregate::{AggregateResult, AggregationSpec, aggregate};
use super::error::Result;
use super::filter::{FilterCriteria, apply_filters};
use super::model::Dataset;

/// A filtered dataset together with the key it is cached under.
#[derive(Debug, Clone)]
pub struct Filtered {
    pub key: u64,
    pub data: Arc<Dataset>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Memoizes `apply_filters` and `aggregate` around the pure pipeline.
///
/// Datasets are identified by a caller supplied `source_id` (bumped on
/// every load) rather than by hashing their contents.
pub struct PipelineCache {
    filtered: LruCache<u64, FilterEntry>,
    aggregates: LruCache<u64, AggregateEntry>,
    stats: CacheStats,
}

/// Entries keep what they were computed from; a hash hit only counts when
/// that matches too.
struct FilterEntry {
    source_id: u64,
    criteria: FilterCriteria,
    data: Arc<Dataset>,
}

struct AggregateEntry {
    input: Arc<Dataset>,
    spec: AggregationSpec,
    result: Arc<AggregateResult>,
}

fn fx_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

impl PipelineCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PipelineCache {
            filtered: LruCache::new(cap),
            aggregates: LruCache::new(cap),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.filtered.clear();
        self.aggregates.clear();
    }

    pub fn filter(&mut self, source_id: u64, dataset: &Dataset, criteria: &FilterCriteria) -> Result<Filtered> {
        self.filter_keyed(fx_hash(&(source_id, criteria)), source_id, dataset, criteria)
    }

    fn filter_keyed(
        &mut self,
        key: u64,
        source_id: u64,
        dataset: &Dataset,
        criteria: &FilterCriteria,
    ) -> Result<Filtered> {
        if let Some(entry) = self.filtered.get(&key) {
            if entry.source_id == source_id && entry.criteria == *criteria {
                self.stats.hits += 1;
                return Ok(Filtered {
                    key,
                    data: Arc::clone(&entry.data),
                });
            }
            log::debug!("filter cache key {key:#x} collided; recomputing");
        }

        self.stats.misses += 1;
        let data = Arc::new(apply_filters(dataset, criteria)?);
        self.filtered.put(
            key,
            FilterEntry {
                source_id,
                criteria: criteria.clone(),
                data: Arc::clone(&data),
            },
        );
        Ok(Filtered { key, data })
    }

    pub fn aggregate(&mut self, filtered: &Filtered, spec: &AggregationSpec) -> Result<Arc<AggregateResult>> {
        self.aggregate_keyed(fx_hash(&(filtered.key, spec)), filtered, spec)
    }

    fn aggregate_keyed(
        &mut self,
        key: u64,
        filtered: &Filtered,
        spec: &AggregationSpec,
    ) -> Result<Arc<AggregateResult>> {
        if let Some(entry) = self.aggregates.get(&key) {
            if Arc::ptr_eq(&entry.input, &filtered.data) && entry.spec == *spec {
                self.stats.hits += 1;
                return Ok(Arc::clone(&entry.result));
            }
            log::debug!("aggregate cache key {key:#x} collided; recomputing");
        }

        self.stats.misses += 1;
        let result = Arc::new(aggregate(&filtered.data, spec)?);
        self.aggregates.put(
            key,
            AggregateEntry {
                input: Arc::clone(&filtered.data),
                spec: spec.clone(),
                result: Arc::clone(&result),
            },
        );
        Ok(result)
    }
}
