// Singular value decomposition by one-sided Jacobi rotations

#![doc = include_str!("../README.md")]

pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod jacobi;
pub mod parallel;

#[cfg(test)]
mod jacobi_tests;

pub use diagnostics::SelftestResiduals;
pub use engine::{create_svd_engine, create_svd_engine_with_config, SvdEngine};
pub use error::{Result, SvdError};
pub use jacobi::{
    JacobiFactors, JacobiSvdConfig, OneSidedJacobiSvd, SequentialJacobiSvd, SequentialSweep,
    SweepStrategy,
};
pub use parallel::{round_robin_batches, ParallelJacobiSvd, ParallelSweep};
