//! Scatter/gather over contiguous chunks on a bounded rayon pool.
//!
//! Every chunk runs under `catch_unwind`, so a panicking chunk is reported
//! as a [`ChunkFailure`] and its siblings still complete.

use rayon::prelude::*;
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

/// A chunk whose items were dropped from the output.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub feature_count: usize,
    pub reason: String,
}

/// Split `len` items into at most `parts` contiguous ranges whose sizes
/// differ by at most one; the first `len % parts` ranges get the extra item.
pub fn chunk_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.min(len);
    if parts == 0 {
        return Vec::new();
    }
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

/// Run `work` over `workers` chunks of `items` and gather the results in
/// chunk order.
pub fn scatter_gather<T, R, F>(
    items: &[T],
    workers: usize,
    work: F,
) -> Result<(Vec<R>, Vec<ChunkFailure>), rayon::ThreadPoolBuildError>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &[T]) -> Result<Vec<R>, String> + Sync,
{
    let ranges = chunk_ranges(items.len(), workers);
    if ranges.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ranges.len())
        .thread_name(|i| format!("zonal-worker-{}", i))
        .build()?;

    let outcomes: Vec<(usize, usize, Result<Vec<R>, String>)> = pool.install(|| {
        ranges
            .par_iter()
            .enumerate()
            .map(|(index, range)| {
                let chunk = &items[range.clone()];
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(index, chunk)))
                    .unwrap_or_else(|payload| Err(panic_message(payload)));
                (index, chunk.len(), result)
            })
            .collect()
    });

    let mut gathered = Vec::new();
    let mut failures = Vec::new();
    for (chunk_index, feature_count, result) in outcomes {
        match result {
            Ok(mut rows) => gathered.append(&mut rows),
            Err(reason) => failures.push(ChunkFailure {
                chunk_index,
                feature_count,
                reason,
            }),
        }
    }
    Ok((gathered, failures))
}
