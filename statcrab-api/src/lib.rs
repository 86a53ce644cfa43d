//! # StatCrab API
//!
//! User-facing analysis surface over the statcrab combiners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statcrab_api::AnalysisEnvironment;
//!
//! let env = AnalysisEnvironment::new().with_parallelism(4);
//! let series = env.numeric_series(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0]]);
//! let (mean, _var) = series.mean_and_var().unwrap();
//! assert!((mean - 3.0).abs() < 1e-9);
//! ```
//!
//! - [`environment`] — [`AnalysisEnvironment`](environment::AnalysisEnvironment):
//!   entry point holding the worker budget for every analysis run.
//! - [`series`] — [`NumericSeries`](series::NumericSeries),
//!   [`VectorSeries`](series::VectorSeries) and
//!   [`KeyedSeries`](series::KeyedSeries): per-series statistic methods that
//!   run through the reference driver.

pub mod environment;
pub mod series;

pub use environment::AnalysisEnvironment;
pub use series::{KeyedSeries, NumericSeries, TukeyParameters, VectorSeries};

pub use statcrab_core;
