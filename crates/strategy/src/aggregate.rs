//! Aggregation kernels shared by the strategies
//!
//! Every kernel sorts its inputs by client id before accumulating, so the
//! output does not depend on the order in which results arrived.

use std::collections::BTreeMap;

use fed_core::{
    AggregationError, ClientId, EvaluateResult, FitResult, Metrics, Parameters, Result, Scalar,
    Tensor,
};
use serde::{Deserialize, Serialize};

/// How client metrics are combined into round metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricsAggregation {
    /// Drop client metrics
    None,

    /// Example-weighted mean of every numeric metric
    #[default]
    WeightedAverage,
}

impl MetricsAggregation {
    pub fn apply<'a, I>(&self, weighted: I) -> Metrics
    where
        I: IntoIterator<Item = (u64, &'a Metrics)>,
    {
        match self {
            MetricsAggregation::None => Metrics::new(),
            MetricsAggregation::WeightedAverage => weighted_metrics(weighted),
        }
    }
}

fn sorted<T>(results: &[(ClientId, T)]) -> Vec<&(ClientId, T)> {
    let mut refs: Vec<_> = results.iter().collect();
    refs.sort_by(|a, b| a.0.cmp(&b.0));
    refs
}

/// Reject result sets whose tensor shapes disagree
fn check_shapes(results: &[&(ClientId, FitResult)]) -> Result<Vec<Vec<usize>>> {
    let first = results.first().ok_or(AggregationError::NoResults)?;
    let expected = first.1.parameters.shape_signature();

    for (client_id, result) in results.iter().skip(1).map(|r| (&r.0, &r.1)) {
        if !result.parameters.same_shape(&first.1.parameters) {
            return Err(AggregationError::ShapeMismatch {
                client_id: client_id.clone(),
                expected,
                actual: result.parameters.shape_signature(),
            }
            .into());
        }
    }
    Ok(expected)
}

/// Element-wise average of client parameters weighted by `num_examples`
///
/// Results with zero examples carry zero weight. Fails if there are no
/// results, the shapes disagree or the total weight is zero.
pub fn weighted_average(results: &[(ClientId, FitResult)]) -> Result<Parameters> {
    let results = sorted(results);
    let shapes = check_shapes(&results)?;

    let total: u64 = results.iter().map(|r| r.1.num_examples).sum();
    if total == 0 {
        return Err(AggregationError::ZeroWeight.into());
    }

    let mut sums: Vec<Vec<f64>> = results[0]
        .1
        .parameters
        .tensors()
        .iter()
        .map(|t| vec![0.0; t.len()])
        .collect();

    for (_, result) in results.iter().map(|r| (&r.0, &r.1)) {
        if result.num_examples == 0 {
            continue;
        }
        let weight = result.num_examples as f64;
        for (sum, tensor) in sums.iter_mut().zip(result.parameters.tensors()) {
            for (acc, &value) in sum.iter_mut().zip(tensor.values()) {
                *acc += weight * value as f64;
            }
        }
    }

    let total = total as f64;
    let tensors = shapes
        .into_iter()
        .zip(sums)
        .map(|(shape, sum)| Tensor::new(shape, sum.into_iter().map(|v| (v / total) as f32).collect()))
        .collect::<Result<Vec<_>>>()?;

    Ok(Parameters::new(tensors))
}

/// Coordinate-wise median of client parameters
///
/// Results with zero examples are left out; for an even count the two
/// middle values are averaged.
pub fn coordinate_median(results: &[(ClientId, FitResult)]) -> Result<Parameters> {
    let results = sorted(results);
    let shapes = check_shapes(&results)?;

    let contributing: Vec<&FitResult> = results
        .iter()
        .map(|r| &r.1)
        .filter(|r| r.num_examples > 0)
        .collect();
    if contributing.is_empty() {
        return Err(AggregationError::ZeroWeight.into());
    }

    let mut column = Vec::with_capacity(contributing.len());
    let mut tensors = Vec::with_capacity(shapes.len());

    for (index, shape) in shapes.into_iter().enumerate() {
        let len = contributing[0].parameters.tensors()[index].len();
        let mut values = Vec::with_capacity(len);

        for position in 0..len {
            column.clear();
            column.extend(
                contributing
                    .iter()
                    .map(|r| r.parameters.tensors()[index].values()[position]),
            );
            column.sort_by(|a, b| a.total_cmp(b));

            let mid = column.len() / 2;
            let median = if column.len() % 2 == 0 {
                ((column[mid - 1] as f64 + column[mid] as f64) / 2.0) as f32
            } else {
                column[mid]
            };
            values.push(median);
        }

        tensors.push(Tensor::new(shape, values)?);
    }

    Ok(Parameters::new(tensors))
}

/// Mean of client losses weighted by `num_examples`
pub fn weighted_loss(results: &[(ClientId, EvaluateResult)]) -> Result<f64> {
    if results.is_empty() {
        return Err(AggregationError::NoResults.into());
    }
    let results = sorted(results);

    let total: u64 = results.iter().map(|r| r.1.num_examples).sum();
    if total == 0 {
        return Err(AggregationError::ZeroWeight.into());
    }

    let weighted: f64 = results
        .iter()
        .map(|r| r.1.num_examples as f64 * r.1.loss)
        .sum();
    Ok(weighted / total as f64)
}

/// Example-weighted mean of every numeric metric reported by any client
///
/// Non-numeric values are ignored; a metric only reported by clients with
/// zero examples is left out.
pub fn weighted_metrics<'a, I>(weighted: I) -> Metrics
where
    I: IntoIterator<Item = (u64, &'a Metrics)>,
{
    let mut sums: BTreeMap<&str, (f64, u64)> = BTreeMap::new();

    for (num_examples, metrics) in weighted {
        if num_examples == 0 {
            continue;
        }
        for (name, value) in metrics {
            if let Some(v) = value.as_f64() {
                let entry = sums.entry(name.as_str()).or_insert((0.0, 0));
                entry.0 += num_examples as f64 * v;
                entry.1 += num_examples;
            }
        }
    }

    sums.into_iter()
        .map(|(name, (sum, count))| (name.to_string(), Scalar::Float(sum / count as f64)))
        .collect()
}
