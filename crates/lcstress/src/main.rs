//! lcstress - multi-threaded load generator for layercache

mod workload;

use anyhow::{bail, Result};
use clap::Parser;
use layercache::{Cache, CacheStats, Configuration, LayeredCache};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use crate::workload::{Counters, Target, Workload};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of load threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Run time in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Size of the keyspace
    #[arg(short, long, default_value_t = 100_000)]
    keys: u64,

    /// Number of groups; 0 runs against a flat cache
    #[arg(short, long, default_value_t = 0)]
    groups: usize,

    /// Cache size budget
    #[arg(long, default_value_t = 50_000)]
    max_size: u64,

    /// Bucket count (power of two)
    #[arg(long, default_value_t = layercache::DEFAULT_BUCKETS)]
    buckets: usize,

    /// Minimum items examined per GC pass
    #[arg(long, default_value_t = 500)]
    items_to_prune: usize,

    /// Hits between promotions
    #[arg(long, default_value_t = 3)]
    gets_per_promote: i32,

    /// Value size in bytes
    #[arg(long, default_value_t = 64)]
    value_size: usize,

    /// Fraction of operations that are gets
    #[arg(long, default_value_t = 0.9)]
    read_ratio: f64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// End-of-run numbers
#[derive(Debug, Serialize)]
struct Summary {
    threads: usize,
    seconds: f64,
    gets: u64,
    hits: u64,
    sets: u64,
    ops_per_sec: f64,
    hit_ratio: f64,
    evictions: u64,
    size: u64,
    items: usize,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.read_ratio) {
        bail!("--read-ratio must be between 0 and 1, got {}", args.read_ratio);
    }
    if args.keys == 0 || args.threads == 0 {
        bail!("--keys and --threads must be positive");
    }

    let config = Configuration::new()
        .max_size(args.max_size)
        .buckets(args.buckets)
        .items_to_prune(args.items_to_prune)
        .gets_per_promote(args.gets_per_promote);

    let target = if args.groups == 0 {
        Target::Flat(Cache::try_new(config)?)
    } else {
        Target::Layered {
            cache: LayeredCache::try_new(config)?,
            groups: (0..args.groups).map(|i| format!("group:{}", i)).collect(),
        }
    };

    let workload = Workload {
        keys: args.keys,
        value_size: args.value_size,
        read_ratio: args.read_ratio,
        ttl: Duration::from_secs(args.duration.saturating_mul(2).max(60)),
    };
    let counters = Counters::default();
    let stop = AtomicBool::new(false);

    info!(
        "Running {} threads for {}s against a {} cache",
        args.threads,
        args.duration,
        if args.groups == 0 { "flat" } else { "layered" }
    );

    let start = Instant::now();
    std::thread::scope(|scope| {
        for id in 0..args.threads {
            let (target, load, counters, stop) = (&target, &workload, &counters, &stop);
            scope.spawn(move || workload::run(id, target, load, counters, stop));
        }
        std::thread::sleep(Duration::from_secs(args.duration));
        stop.store(true, Ordering::Relaxed);
    });
    let elapsed = start.elapsed().as_secs_f64();

    let summary = match &target {
        Target::Flat(cache) => {
            cache.sync_updates()?;
            let (size, items) = (cache.size()?, cache.item_count());
            summarize(&args, elapsed, &counters, cache.stats(), size, items)
        }
        Target::Layered { cache, .. } => {
            cache.sync_updates()?;
            let (size, items) = (cache.size()?, cache.item_count());
            summarize(&args, elapsed, &counters, cache.stats(), size, items)
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("threads:    {}", summary.threads);
        println!("seconds:    {:.2}", summary.seconds);
        println!("gets:       {}", summary.gets);
        println!("hits:       {}", summary.hits);
        println!("sets:       {}", summary.sets);
        println!("ops/sec:    {:.0}", summary.ops_per_sec);
        println!("hit ratio:  {:.3}", summary.hit_ratio);
        println!("evictions:  {}", summary.evictions);
        println!("size:       {}", summary.size);
        println!("items:      {}", summary.items);
    }

    Ok(())
}

fn summarize(
    args: &Args,
    seconds: f64,
    counters: &Counters,
    stats: &CacheStats,
    size: u64,
    items: usize,
) -> Summary {
    let gets = counters.gets.load(Ordering::Relaxed);
    let sets = counters.sets.load(Ordering::Relaxed);
    Summary {
        threads: args.threads,
        seconds,
        gets,
        hits: counters.hits.load(Ordering::Relaxed),
        sets,
        ops_per_sec: (gets + sets) as f64 / seconds.max(f64::EPSILON),
        hit_ratio: stats.hit_ratio(),
        evictions: stats.evictions(),
        size,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_reports_hits() {
        let args = Args::parse_from(["lcstress", "--threads", "2"]);
        let counters = Counters::default();
        counters.gets.store(10, Ordering::Relaxed);
        counters.hits.store(7, Ordering::Relaxed);
        counters.sets.store(5, Ordering::Relaxed);

        let summary = summarize(&args, 1.0, &counters, &CacheStats::new(), 3, 3);
        assert_eq!(summary.threads, 2);
        assert_eq!(summary.hits, 7);
        assert_eq!(summary.ops_per_sec, 15.0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["hits"], 7);
    }
}
