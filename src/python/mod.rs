//! Python bindings for the rust-selfplay engine.
//!
//! A Python object can stand in for the numeric model: wrap it in
//! `Evaluator` and hand it to the training entry points.
//!
//! # Quick Start
//!
//! ```python
//! import rust_selfplay as sp
//!
//! class Model:
//!     def evaluate(self, positions, action_counts, action_features):
//!         return [0.0] * len(positions), []
//!
//!     def learn(self, positions, action_counts, action_features, labels, policy_labels):
//!         return 0.0
//!
//!     def save(self):
//!         return b""
//!
//! evaluator = sp.Evaluator(Model(), name="model", batch_size=64)
//! matches, steps, loss = sp.train_nim(evaluator, stones=21, max_take=3, matches=200)
//! ```

use pyo3::prelude::*;

mod py_nn;
mod py_training;

pub use py_nn::*;
pub use py_training::*;

/// rust-selfplay: search and self-play training for two-player games.
#[pymodule]
fn rust_selfplay(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyEvaluator>()?;
    m.add_function(wrap_pyfunction!(train_nim, m)?)?;
    m.add("FORMAT_VERSION", crate::training::FORMAT_VERSION)?;
    Ok(())
}
