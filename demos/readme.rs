use std::thread;

use statblock::{StatContext, StatModule};

/// Mirrors the original `Application.cpp` driver: a handful of threads each
/// record a batch of calls under their own name and print the resulting
/// aggregate. The driver itself (thread-pool harness, console printing) is
/// explicitly out of scope for the crate — this file is a usage example,
/// not part of the library.
fn worker(ctx: &StatContext, name: &str, duration: u64, calls: u64) {
    let stats = StatModule::new(ctx);
    stats.set_interval(4);
    let handle = stats.add_stat(name);

    for _ in 0..calls {
        stats.add_call_info(handle, duration);
    }

    println!(
        "{name}: count={} avg={} min={} max={}",
        stats.get_call_count(handle),
        stats.get_avg_duration(handle),
        stats.get_min_duration(handle),
        stats.get_max_duration(handle),
    );
}

fn main() {
    tracing_subscriber::fmt::init();

    let ctx = StatContext::global();

    thread::scope(|scope| {
        scope.spawn(|| worker(ctx, "test func1 call", 10, 700_000));
        scope.spawn(|| worker(ctx, "test func2 call", 25, 50_000));
    });
}
