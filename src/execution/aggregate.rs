use super::partition::BatchSpec;
use crate::errors::{RiskError, RiskResult};
use crate::models::gbm::BatchOutput;

/// Merged simulation output, in ascending batch-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub terminal: Vec<f64>,
    pub paths: Option<Vec<Vec<f64>>>,
}

/// Merge batch outputs against the plan that produced them.
///
/// Any disagreement between plan and outputs (missing or duplicate index,
/// wrong batch length, wrong total) is an internal defect and fails with
/// `AggregationError`; nothing is ever dropped to make the counts fit.
pub fn aggregate(
    plan: &[BatchSpec],
    mut outputs: Vec<BatchOutput>,
    expected_paths: usize,
) -> RiskResult<Distribution> {
    if outputs.len() != plan.len() {
        return Err(RiskError::AggregationError(format!(
            "expected {} batches, got {}",
            plan.len(),
            outputs.len()
        )));
    }

    outputs.sort_by_key(|o| o.index);

    let keep_paths = outputs.first().map(|o| o.paths.is_some()).unwrap_or(false);
    let mut terminal = Vec::with_capacity(expected_paths);
    let mut paths = keep_paths.then(|| Vec::with_capacity(expected_paths));

    for (spec, output) in plan.iter().zip(outputs) {
        if output.index != spec.index {
            return Err(RiskError::AggregationError(format!(
                "batch index mismatch: expected {}, got {}",
                spec.index, output.index
            )));
        }
        if output.terminal.len() != spec.size {
            return Err(RiskError::AggregationError(format!(
                "batch {} returned {} paths, expected {}",
                spec.index,
                output.terminal.len(),
                spec.size
            )));
        }
        terminal.extend_from_slice(&output.terminal);

        match (paths.as_mut(), output.paths) {
            (Some(all), Some(batch)) if batch.len() == spec.size => all.extend(batch),
            (None, None) => {}
            _ => {
                return Err(RiskError::AggregationError(format!(
                    "batch {} path matrix inconsistent with request",
                    spec.index
                )));
            }
        }
    }

    if terminal.len() != expected_paths {
        return Err(RiskError::AggregationError(format!(
            "aggregated {} paths, expected {expected_paths}",
            terminal.len()
        )));
    }

    Ok(Distribution { terminal, paths })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(index: usize, size: usize) -> BatchSpec {
        BatchSpec { index, size, seed: 0 }
    }

    fn output(index: usize, values: &[f64]) -> BatchOutput {
        BatchOutput { index, terminal: values.to_vec(), paths: None }
    }

    #[test]
    fn test_merges_in_index_order() {
        let plan = [spec(0, 2), spec(1, 1), spec(2, 2)];
        let outs = vec![output(2, &[5.0, 6.0]), output(0, &[1.0, 2.0]), output(1, &[3.0])];
        let dist = aggregate(&plan, outs, 5).unwrap();
        assert_eq!(dist.terminal, vec![1.0, 2.0, 3.0, 5.0, 6.0]);
        assert!(dist.paths.is_none());
    }

    #[test]
    fn test_length_mismatch_fails() {
        let plan = [spec(0, 2), spec(1, 2)];
        let outs = vec![output(0, &[1.0, 2.0]), output(1, &[3.0])];
        assert!(matches!(aggregate(&plan, outs, 4), Err(RiskError::AggregationError(_))));
    }

    #[test]
    fn test_missing_batch_fails() {
        let plan = [spec(0, 1), spec(1, 1)];
        let outs = vec![output(0, &[1.0])];
        assert!(matches!(aggregate(&plan, outs, 2), Err(RiskError::AggregationError(_))));
    }

    #[test]
    fn test_duplicate_index_fails() {
        let plan = [spec(0, 1), spec(1, 1)];
        let outs = vec![output(0, &[1.0]), output(0, &[1.0])];
        assert!(matches!(aggregate(&plan, outs, 2), Err(RiskError::AggregationError(_))));
    }

    #[test]
    fn test_path_matrix_concatenated() {
        let plan = [spec(0, 1), spec(1, 1)];
        let outs = vec![
            BatchOutput { index: 1, terminal: vec![2.0], paths: Some(vec![vec![1.0, 2.0]]) },
            BatchOutput { index: 0, terminal: vec![3.0], paths: Some(vec![vec![1.0, 3.0]]) },
        ];
        let dist = aggregate(&plan, outs, 2).unwrap();
        assert_eq!(dist.paths.unwrap(), vec![vec![1.0, 3.0], vec![1.0, 2.0]]);
    }
}
