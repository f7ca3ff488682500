use ::income_bins::model::{BracketSet, Region, RegionTable, WeightMatrix};
use ::income_bins::percentile::PercentileCurve;
use ::income_bins::weights::{TargetBracket, WeightResult};
use ::income_bins::ReweightError;
use pyo3::prelude::*;

#[pymodule]
fn income_bins(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyWeightResult>()?;
    m.add_class::<PyTargetBracket>()?;
    m.add_function(wrap_pyfunction!(compute_weights, m)?)?;
    m.add_function(wrap_pyfunction!(apply_weights, m)?)?;
    m.add_function(wrap_pyfunction!(median_income, m)?)?;
    Ok(())
}

fn to_py_err(e: ReweightError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
}

#[pyclass(name = "WeightResult")]
#[derive(Clone)]
pub struct PyWeightResult {
    #[pyo3(get)]
    pub weights: Vec<Vec<f64>>,
    #[pyo3(get)]
    pub shares: Vec<f64>,
    #[pyo3(get)]
    pub median: f64,
    #[pyo3(get)]
    pub steps: Vec<f64>,
    #[pyo3(get)]
    pub targets: Vec<PyTargetBracket>,
}

#[pyclass(name = "TargetBracket")]
#[derive(Clone)]
pub struct PyTargetBracket {
    #[pyo3(get)]
    pub name: String,
    #[pyo3(get)]
    pub lower: f64,
    #[pyo3(get)]
    pub upper: Option<f64>,
}

impl From<TargetBracket> for PyTargetBracket {
    fn from(target: TargetBracket) -> Self {
        PyTargetBracket {
            name: target.name,
            lower: target.lower,
            upper: target.upper,
        }
    }
}

impl From<WeightResult> for PyWeightResult {
    fn from(result: WeightResult) -> Self {
        PyWeightResult {
            weights: result.weights.to_rows(),
            targets: result
                .target_brackets()
                .into_iter()
                .map(PyTargetBracket::from)
                .collect(),
            shares: result.shares,
            median: result.median,
            steps: result.steps,
        }
    }
}

#[pymethods]
impl PyWeightResult {
    #[getter]
    fn shape(&self) -> (usize, usize) {
        (
            self.weights.len(),
            self.weights.first().map(|r| r.len()).unwrap_or(0),
        )
    }

    fn as_tuple(&self) -> (Vec<Vec<f64>>, Vec<f64>, f64) {
        (self.weights.clone(), self.shares.clone(), self.median)
    }

    fn __repr__(&self) -> String {
        let (rows, cols) = self.shape();
        format!(
            "WeightResult(median={}, shape=({}, {}), shares={:?})",
            self.median, rows, cols, self.shares
        )
    }
}

#[pymethods]
impl PyTargetBracket {
    fn __repr__(&self) -> String {
        match self.upper {
            Some(upper) => format!(
                "TargetBracket(name='{}', lower={}, upper={})",
                self.name, self.lower, upper
            ),
            None => format!(
                "TargetBracket(name='{}', lower={}, upper=None)",
                self.name, self.lower
            ),
        }
    }
}

#[pyfunction]
pub fn compute_weights(
    bins: Vec<f64>,
    ubins: Vec<f64>,
    perc: Vec<f64>,
    pop: Vec<f64>,
) -> PyResult<PyWeightResult> {
    let result = ::income_bins::compute_weights(&bins, &ubins, &perc, &pop).map_err(to_py_err)?;
    Ok(PyWeightResult::from(result))
}

#[pyfunction]
pub fn median_income(bins: Vec<f64>, ubins: Vec<f64>, perc: Vec<f64>) -> PyResult<f64> {
    let brackets = BracketSet::new(bins, ubins).map_err(to_py_err)?;
    let curve = PercentileCurve::new(&brackets, perc).map_err(to_py_err)?;
    curve.median().map_err(to_py_err)
}

/// 各行（地域）に重み行列を適用し、正規化した割合を返す
#[pyfunction]
#[pyo3(signature = (rows, weights, round_decimals=None))]
pub fn apply_weights(
    rows: Vec<Vec<f64>>,
    weights: Vec<Vec<f64>>,
    round_decimals: Option<u32>,
) -> PyResult<Vec<Vec<f64>>> {
    let weights = WeightMatrix::from_rows(weights).map_err(to_py_err)?;

    let bracket_names = (0..weights.cols).map(|i| format!("Bin{}", i)).collect();
    let mut table = RegionTable::new("index", bracket_names);
    for (i, values) in rows.into_iter().enumerate() {
        table
            .push(Region {
                code: i.to_string(),
                values,
                reported_total: None,
            })
            .map_err(to_py_err)?;
    }

    let names: Vec<String> = (0..weights.rows).map(|i| format!("Bin{}", i)).collect();
    let result = ::income_bins::apply_weights(&table, &weights, &names, round_decimals)
        .map_err(to_py_err)?;

    Ok(result.regions.into_iter().map(|r| r.values).collect())
}
