//! Evaluator backed by a Python object.

use std::io::Write;
use std::sync::Arc;

use numpy::PyArray1;
use pyo3::prelude::*;

use crate::core::EvalError;
use crate::nn::{EncodedState, EvalOutput, Evaluator, FeatureBatch};

/// Python model driven through its `evaluate`, `learn` and `save` methods.
///
/// Positions and action features are passed as lists of flat numpy arrays
/// together with the per-position action counts.
pub struct PythonModel {
    model: PyObject,
    name: String,
    batch_size: usize,
    has_policy: bool,
}

fn backend(err: PyErr) -> EvalError {
    EvalError::Backend(err.to_string())
}

fn arrays<'py>(py: Python<'py>, states: &[EncodedState]) -> Vec<Bound<'py, PyArray1<f32>>> {
    states
        .iter()
        .map(|state| PyArray1::from_slice_bound(py, &state.tensor))
        .collect()
}

impl Evaluator for PythonModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, batch: &FeatureBatch) -> Result<EvalOutput, EvalError> {
        Python::with_gil(|py| {
            let args = (
                arrays(py, &batch.positions),
                batch.action_counts.clone(),
                arrays(py, &batch.action_features),
            );
            let result = self.model.call_method1(py, "evaluate", args).map_err(backend)?;
            let (scores, action_weights): (Vec<f32>, Vec<f32>) =
                result.extract(py).map_err(backend)?;
            Ok(EvalOutput { scores, action_weights })
        })
    }

    fn learn(
        &self,
        batch: &FeatureBatch,
        labels: &[f32],
        policy_labels: &[Vec<f32>],
    ) -> Result<f32, EvalError> {
        Python::with_gil(|py| {
            let args = (
                arrays(py, &batch.positions),
                batch.action_counts.clone(),
                arrays(py, &batch.action_features),
                labels.to_vec(),
                policy_labels.to_vec(),
            );
            let loss = self.model.call_method1(py, "learn", args).map_err(backend)?;
            loss.extract(py).map_err(backend)
        })
    }

    fn save(&self, out: &mut dyn Write) -> Result<(), EvalError> {
        let bytes: Vec<u8> = Python::with_gil(|py| {
            let data = self.model.call_method0(py, "save").map_err(backend)?;
            data.extract(py).map_err(backend)
        })?;
        out.write_all(&bytes)?;
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn has_policy(&self) -> bool {
        self.has_policy
    }
}

/// Python wrapper for `PythonModel`.
#[pyclass(name = "Evaluator")]
pub struct PyEvaluator {
    pub(crate) inner: Arc<PythonModel>,
}

#[pymethods]
impl PyEvaluator {
    /// Wrap `model`, an object with `evaluate`, `learn` and `save` methods.
    #[new]
    #[pyo3(signature = (model, name = "python".to_string(), batch_size = 100, has_policy = false))]
    fn new(model: PyObject, name: String, batch_size: usize, has_policy: bool) -> Self {
        Self {
            inner: Arc::new(PythonModel {
                model,
                name,
                batch_size: batch_size.max(1),
                has_policy,
            }),
        }
    }

    #[getter]
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    #[getter]
    fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    #[getter]
    fn has_policy(&self) -> bool {
        self.inner.has_policy
    }

    fn __repr__(&self) -> String {
        format!(
            "Evaluator(name={:?}, batch_size={}, has_policy={})",
            self.inner.name, self.inner.batch_size, self.inner.has_policy
        )
    }
}
