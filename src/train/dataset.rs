//! Training frame assembly: typed rows to matrices, targets and the
//! time-ordered three-way split.

use std::ops::Range;

use crate::features::row::{FeatureRow, Features};
use crate::model::tree::FeatureMatrix;

/// All rows for a training run, in race-code (time) order, plus the fixed
/// feature-name ordering that will be serialized into the artifact.
#[derive(Debug, Default)]
pub struct TrainingFrame {
    pub rows: Vec<FeatureRow>,
    pub feature_names: Vec<String>,
}

impl TrainingFrame {
    pub fn new(mut rows: Vec<FeatureRow>) -> Self {
        // Contiguity per race and global time order are what the split and
        // the grouping rely on.
        rows.sort_by(|a, b| a.race_code.cmp(&b.race_code).then(a.umaban.cmp(&b.umaban)));
        Self {
            rows,
            feature_names: Features::NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matrix(&self) -> FeatureMatrix {
        let vectors: Vec<Vec<f64>> = self.rows.iter().map(|r| r.features.values()).collect();
        FeatureMatrix::from_rows(&vectors)
    }

    /// Finishing positions. Training rows always carry a target.
    pub fn targets(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.target.unwrap_or(18.0))
            .collect()
    }

    /// Binary target: finished within the top `k`.
    pub fn binary_targets(&self, k: f64) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| {
                if r.target.unwrap_or(99.0) <= k {
                    1.0
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Ranking target: inverted finishing position, higher is better.
    pub fn rank_targets(&self) -> Vec<f64> {
        let y = self.targets();
        let max_rank = y.iter().copied().fold(1.0f64, f64::max);
        y.iter().map(|&v| max_rank - v + 1.0).collect()
    }

    /// Starter counts per race by run-length over the sorted race codes.
    pub fn group_sizes(&self, range: Range<usize>) -> Vec<usize> {
        let mut groups = Vec::new();
        let mut current: Option<&str> = None;
        let mut count = 0usize;
        for row in &self.rows[range] {
            match current {
                Some(rc) if rc == row.race_code => count += 1,
                _ => {
                    if count > 0 {
                        groups.push(count);
                    }
                    current = Some(&row.race_code);
                    count = 1;
                }
            }
        }
        if count > 0 {
            groups.push(count);
        }
        groups
    }
}

/// Contiguous 70/15/15 split in time order; no shuffling.
#[derive(Debug, Clone)]
pub struct TimeSplit {
    pub train: Range<usize>,
    pub calib: Range<usize>,
    pub test: Range<usize>,
}

pub fn time_split(n: usize) -> TimeSplit {
    let train_end = (n as f64 * 0.70) as usize;
    let calib_end = (n as f64 * 0.85) as usize;
    TimeSplit {
        train: 0..train_end,
        calib: train_end..calib_end,
        test: calib_end..n,
    }
}

pub fn slice_matrix(m: &FeatureMatrix, range: &Range<usize>) -> FeatureMatrix {
    let indices: Vec<usize> = range.clone().collect();
    m.subset(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(race_code: &str, umaban: u32, target: f64) -> FeatureRow {
        FeatureRow {
            race_code: race_code.to_string(),
            umaban,
            target: Some(target),
            ..Default::default()
        }
    }

    #[test]
    fn test_time_split_proportions() {
        let s = time_split(100);
        assert_eq!(s.train, 0..70);
        assert_eq!(s.calib, 70..85);
        assert_eq!(s.test, 85..100);
    }

    #[test]
    fn test_group_sizes_run_length() {
        let frame = TrainingFrame::new(vec![
            row("A", 1, 1.0),
            row("A", 2, 2.0),
            row("A", 3, 3.0),
            row("B", 1, 1.0),
            row("B", 2, 2.0),
        ]);
        assert_eq!(frame.group_sizes(0..5), vec![3, 2]);
        assert_eq!(frame.group_sizes(0..4), vec![3, 1]);
    }

    #[test]
    fn test_rank_targets_invert_positions() {
        let frame = TrainingFrame::new(vec![row("A", 1, 1.0), row("A", 2, 4.0)]);
        // max rank 4: winner becomes 4, the 4th-place horse becomes 1
        assert_eq!(frame.rank_targets(), vec![4.0, 1.0]);
    }

    #[test]
    fn test_binary_targets() {
        let frame = TrainingFrame::new(vec![
            row("A", 1, 1.0),
            row("A", 2, 2.0),
            row("A", 3, 5.0),
        ]);
        assert_eq!(frame.binary_targets(1.0), vec![1.0, 0.0, 0.0]);
        assert_eq!(frame.binary_targets(3.0), vec![1.0, 1.0, 0.0]);
    }
}
