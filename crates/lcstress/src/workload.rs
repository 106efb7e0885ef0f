//! Per-thread load loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use layercache::{Cache, LayeredCache};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

/// Cache under test; flat or layered
pub enum Target {
    Flat(Cache<Vec<u8>>),
    Layered {
        cache: LayeredCache<Vec<u8>>,
        groups: Vec<String>,
    },
}

impl Target {
    fn get(&self, key_id: u64, key: &str) -> bool {
        match self {
            Target::Flat(cache) => cache.get(key).is_some(),
            Target::Layered { cache, groups } => {
                cache.get(group_of(groups, key_id), key).is_some()
            }
        }
    }

    fn set(&self, key_id: u64, key: &str, value: Vec<u8>, ttl: Duration) {
        match self {
            Target::Flat(cache) => {
                cache.set(key, value, ttl);
            }
            Target::Layered { cache, groups } => {
                cache.set(group_of(groups, key_id), key, value, ttl);
            }
        }
    }
}

fn group_of(groups: &[String], key_id: u64) -> &str {
    &groups[(key_id % groups.len() as u64) as usize]
}

/// Knobs shared by every load thread
#[derive(Debug, Clone)]
pub struct Workload {
    pub keys: u64,
    pub value_size: usize,
    pub read_ratio: f64,
    pub ttl: Duration,
}

/// Operation counters summed over all threads
#[derive(Debug, Default)]
pub struct Counters {
    pub gets: AtomicU64,
    pub hits: AtomicU64,
    pub sets: AtomicU64,
}

/// Issue random gets and sets until `stop` is raised
pub fn run(
    id: usize,
    target: &Target,
    workload: &Workload,
    counters: &Counters,
    stop: &AtomicBool,
) {
    let mut rng = SmallRng::seed_from_u64(42 + id as u64);
    let mut value = vec![0u8; workload.value_size];
    rng.fill_bytes(&mut value);

    let (mut gets, mut hits, mut sets) = (0u64, 0u64, 0u64);
    while !stop.load(Ordering::Relaxed) {
        let key_id = rng.gen_range(0..workload.keys);
        let key = key_id.to_string();

        if rng.gen_bool(workload.read_ratio) {
            gets += 1;
            if target.get(key_id, &key) {
                hits += 1;
            }
        } else {
            sets += 1;
            target.set(key_id, &key, value.clone(), workload.ttl);
        }
    }

    counters.gets.fetch_add(gets, Ordering::Relaxed);
    counters.hits.fetch_add(hits, Ordering::Relaxed);
    counters.sets.fetch_add(sets, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercache::Configuration;

    #[test]
    fn test_run_stops_and_counts() {
        let target = Target::Flat(Cache::new(Configuration::new()));
        let workload = Workload {
            keys: 16,
            value_size: 8,
            read_ratio: 0.5,
            ttl: Duration::from_secs(60),
        };
        let counters = Counters::default();
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| run(0, &target, &workload, &counters, &stop));
            std::thread::sleep(Duration::from_millis(20));
            stop.store(true, Ordering::Relaxed);
        });

        let total = counters.gets.load(Ordering::Relaxed) + counters.sets.load(Ordering::Relaxed);
        assert!(total > 0);
        assert!(counters.hits.load(Ordering::Relaxed) <= counters.gets.load(Ordering::Relaxed));
    }

    #[test]
    fn test_layered_target_routes_by_group() {
        let target = Target::Layered {
            cache: LayeredCache::new(Configuration::new()),
            groups: vec!["a".to_string(), "b".to_string()],
        };
        target.set(3, "3", vec![1], Duration::from_secs(60));
        assert!(target.get(3, "3"));
        if let Target::Layered { cache, .. } = &target {
            assert!(cache.get("b", "3").is_some());
            assert!(cache.get("a", "3").is_none());
        }
    }
}
