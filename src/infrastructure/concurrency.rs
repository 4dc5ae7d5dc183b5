/// Concurrency management for plantrace.
/// Configures the worker pool used when instrumenting many units.

use anyhow::Result;

/// Initialize the global rayon thread pool with controlled worker count.
/// Reserves ~50% of CPU capacity for the program being traced.
pub fn init_thread_pool() -> Result<()> {
    let cores = num_cpus::get();
    // Reserve 50% capacity, minimum 1 worker
    let workers = std::cmp::max(1, cores / 2);

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()?;

    println!(
        "[plantrace] Initialized thread pool: {} workers (system has {} cores)",
        workers, cores
    );

    Ok(())
}
