// src/parallel.rs

use crate::error::{Result, SvdError};
use crate::jacobi::{
    rotate_column_pair, validate_declared_shape, JacobiSvdConfig, OneSidedJacobiSvd, SweepStrategy,
};
use log::{info, trace};
use ndarray::{Array2, ArrayViewMut1, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Multithreaded engine: each sweep runs as a sequence of conflict-free batches
/// on a private worker pool.
pub type ParallelJacobiSvd = OneSidedJacobiSvd<ParallelSweep>;

impl ParallelJacobiSvd {
    /// Creates a multithreaded engine with `num_threads` workers and the default configuration.
    pub fn new(rows: usize, cols: usize, num_threads: usize) -> Result<Self> {
        Self::with_config(rows, cols, num_threads, JacobiSvdConfig::default())
    }

    pub fn with_config(
        rows: usize,
        cols: usize,
        num_threads: usize,
        config: JacobiSvdConfig,
    ) -> Result<Self> {
        validate_declared_shape(rows, cols)?;
        let strategy = ParallelSweep::new(num_threads, rows.min(cols))?;
        info!(
            "Built Jacobi worker pool: {} threads, {} batches per sweep for {}x{} inputs.",
            strategy.num_threads(),
            strategy.batches.len(),
            rows,
            cols
        );
        OneSidedJacobiSvd::from_parts(rows, cols, config, strategy)
    }

    /// Number of workers in the engine's pool.
    pub fn num_threads(&self) -> usize {
        self.strategy.num_threads()
    }
}

/// Round-robin (circle method) schedule of all unordered column pairs of
/// `num_columns` columns.
///
/// Each inner vector is one batch; within a batch no column index appears twice,
/// and across all batches every pair `(i, j)` with `i < j` appears exactly once.
/// An odd column count is padded with a bye slot, whose pairings are dropped.
pub fn round_robin_batches(num_columns: usize) -> Vec<Vec<(usize, usize)>> {
    if num_columns < 2 {
        return Vec::new();
    }
    let slots = num_columns + num_columns % 2;
    let mut ring: Vec<usize> = (0..slots).collect();
    let mut batches = Vec::with_capacity(slots - 1);
    for _ in 0..slots - 1 {
        let batch: Vec<(usize, usize)> = (0..slots / 2)
            .map(|k| (ring[k], ring[slots - 1 - k]))
            .filter(|&(a, b)| a < num_columns && b < num_columns)
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        batches.push(batch);
        // Slot 0 stays fixed; everything else moves one position around the circle.
        ring[1..].rotate_right(1);
    }
    batches
}

/// Sweep strategy that applies each batch's rotations concurrently.
#[derive(Debug)]
pub struct ParallelSweep {
    pool: ThreadPool,
    batches: Vec<Vec<(usize, usize)>>,
}

impl ParallelSweep {
    /// Builds a pool of `num_threads` workers and the batch schedule for
    /// `num_columns` working columns.
    pub fn new(num_threads: usize, num_columns: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(SvdError::invalid(
                "Multithreaded engine needs at least one worker thread",
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("osj-svd-worker-{}", index))
            .build()?;
        Ok(Self {
            pool,
            batches: round_robin_batches(num_columns),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

type ColumnPairViews<'a> = (
    ArrayViewMut1<'a, f64>,
    ArrayViewMut1<'a, f64>,
    ArrayViewMut1<'a, f64>,
    ArrayViewMut1<'a, f64>,
);

/// Hands out exclusive views of the two working columns and two V columns of
/// every pair in `batch`. No column may appear in two pairs of one batch.
fn split_batch_columns<'a>(
    work: &'a mut Array2<f64>,
    v: &'a mut Array2<f64>,
    batch: &[(usize, usize)],
) -> Vec<ColumnPairViews<'a>> {
    debug_assert!(
        {
            let mut seen = vec![false; work.ncols()];
            batch.iter().flat_map(|&(i, j)| [i, j]).all(|k| !std::mem::replace(&mut seen[k], true))
        },
        "batch {:?} reuses a column",
        batch
    );
    let mut work_columns: Vec<Option<ArrayViewMut1<'a, f64>>> =
        work.axis_iter_mut(Axis(1)).map(Some).collect();
    let mut v_columns: Vec<Option<ArrayViewMut1<'a, f64>>> =
        v.axis_iter_mut(Axis(1)).map(Some).collect();

    batch
        .iter()
        .map(|&(i, j)| {
            const SHARED: &str = "round-robin batches never share a column";
            (
                work_columns[i].take().expect(SHARED),
                work_columns[j].take().expect(SHARED),
                v_columns[i].take().expect(SHARED),
                v_columns[j].take().expect(SHARED),
            )
        })
        .collect()
}

impl SweepStrategy for ParallelSweep {
    fn sweep(&mut self, work: &mut Array2<f64>, v: &mut Array2<f64>, tolerance_sq: f64) -> usize {
        let mut rotations = 0;
        for (batch_index, batch) in self.batches.iter().enumerate() {
            let pairs = split_batch_columns(work, v, batch);
            // The parallel iterator joins before install returns: no rotation of
            // the next batch starts until this one is complete.
            let applied = self.pool.install(|| {
                pairs
                    .into_par_iter()
                    .map(|(u_i, u_j, v_i, v_j)| !rotate_column_pair(u_i, u_j, v_i, v_j, tolerance_sq))
                    .filter(|&rotated| rotated)
                    .count()
            });
            trace!(
                "Batch {}/{}: {} pairs, {} rotations.",
                batch_index + 1,
                self.batches.len(),
                batch.len(),
                applied
            );
            rotations += applied;
        }
        rotations
    }
}
