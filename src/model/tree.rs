//! Regression tree on quantile-binned features.
//!
//! The three boosting families share this tree: histogram split finding over
//! binned columns, with the growth order and leaf-statistics policy supplied
//! by the caller.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Column-major dense feature matrix.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub columns: Vec<Vec<f64>>,
    pub n_rows: usize,
}

impl FeatureMatrix {
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n_rows = rows.len();
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut columns = vec![Vec::with_capacity(n_rows); n_features];
        for row in rows {
            for (j, &v) in row.iter().enumerate() {
                columns[j].push(if v.is_finite() { v } else { 0.0 });
            }
        }
        Self { columns, n_rows }
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn value(&self, row: usize, feature: usize) -> f64 {
        self.columns[feature][row]
    }

    /// Contiguous row slice of this matrix (by index list).
    pub fn subset(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|col| indices.iter().map(|&i| col[i]).collect())
            .collect();
        Self {
            columns,
            n_rows: indices.len(),
        }
    }
}

/// Per-feature quantile bin mapping plus the binned columns.
#[derive(Debug)]
pub struct BinnedMatrix {
    pub n_rows: usize,
    /// bins[feature][row], capped at 255 bins
    pub bins: Vec<Vec<u8>>,
    /// Raw-value upper edge per bin boundary; `thresholds[f][b]` splits
    /// bin <= b from bin > b.
    pub thresholds: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub fn build(matrix: &FeatureMatrix, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 255);
        let results: Vec<(Vec<u8>, Vec<f64>)> = matrix
            .columns
            .par_iter()
            .map(|col| Self::bin_column(col, max_bins))
            .collect();

        let mut bins = Vec::with_capacity(results.len());
        let mut thresholds = Vec::with_capacity(results.len());
        for (b, t) in results {
            bins.push(b);
            thresholds.push(t);
        }
        Self {
            n_rows: matrix.n_rows,
            bins,
            thresholds,
        }
    }

    fn bin_column(col: &[f64], max_bins: usize) -> (Vec<u8>, Vec<f64>) {
        let mut sorted: Vec<f64> = col.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted.dedup();

        // Quantile cut points over the distinct values
        let mut edges: Vec<f64> = if sorted.len() <= max_bins {
            sorted.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
        } else {
            (1..max_bins)
                .map(|i| {
                    let q = i as f64 / max_bins as f64;
                    let idx = ((sorted.len() - 1) as f64 * q) as usize;
                    sorted[idx]
                })
                .collect()
        };
        edges.dedup();

        let binned = col
            .iter()
            .map(|&v| edges.partition_point(|&e| e < v) as u8)
            .collect();
        (binned, edges)
    }

    pub fn n_features(&self) -> usize {
        self.bins.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: u32,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
    pub is_leaf: bool,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: -1,
            right: -1,
            value,
            is_leaf: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return node.value;
            }
            let v = x.get(node.feature as usize).copied().unwrap_or(0.0);
            idx = if v <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }

    pub fn predict_matrix_row(&self, m: &FeatureMatrix, row: usize) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return node.value;
            }
            let v = m.value(row, node.feature as usize);
            idx = if v <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }
}

/// Candidate split for one node.
#[derive(Debug, Clone)]
pub(crate) struct Split {
    pub feature: usize,
    pub bin: u8,
    pub threshold: f64,
    pub gain: f64,
}

pub(crate) struct SplitContext<'a> {
    pub binned: &'a BinnedMatrix,
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub features: &'a [usize],
    pub min_child_weight: f64,
    pub reg_lambda: f64,
}

/// Best gain split for the rows in `indices`, scanning histograms of every
/// candidate feature in parallel.
pub(crate) fn find_best_split(ctx: &SplitContext<'_>, indices: &[usize]) -> Option<Split> {
    let total_grad: f64 = indices.iter().map(|&i| ctx.grad[i]).sum();
    let total_hess: f64 = indices.iter().map(|&i| ctx.hess[i]).sum();
    if total_hess < 2.0 * ctx.min_child_weight {
        return None;
    }

    let parent_score = total_grad * total_grad / (total_hess + ctx.reg_lambda);

    ctx.features
        .par_iter()
        .filter_map(|&f| {
            let n_bins = ctx.binned.n_bins(f);
            if n_bins < 2 {
                return None;
            }
            let col = &ctx.binned.bins[f];
            let mut hist = vec![(0.0f64, 0.0f64); n_bins];
            for &i in indices {
                let b = col[i] as usize;
                hist[b].0 += ctx.grad[i];
                hist[b].1 += ctx.hess[i];
            }

            let mut best: Option<Split> = None;
            let (mut left_grad, mut left_hess) = (0.0, 0.0);
            for b in 0..n_bins - 1 {
                left_grad += hist[b].0;
                left_hess += hist[b].1;
                let right_grad = total_grad - left_grad;
                let right_hess = total_hess - left_hess;
                if left_hess < ctx.min_child_weight || right_hess < ctx.min_child_weight {
                    continue;
                }
                let gain = 0.5
                    * (left_grad * left_grad / (left_hess + ctx.reg_lambda)
                        + right_grad * right_grad / (right_hess + ctx.reg_lambda)
                        - parent_score);
                if gain > best.as_ref().map(|s| s.gain).unwrap_or(1e-12) {
                    best = Some(Split {
                        feature: f,
                        bin: b as u8,
                        threshold: ctx.binned.thresholds[f][b],
                        gain,
                    });
                }
            }
            best
        })
        .max_by(|a, b| a.gain.partial_cmp(&b.gain).unwrap_or(std::cmp::Ordering::Equal))
}

/// Leaf weight from the gradient statistics of the given rows. `estimation`
/// restricts the statistics to a subset (ordered boosting); when that subset
/// is empty the full row set is used.
pub(crate) fn leaf_value(
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    estimation: Option<&[bool]>,
    reg_lambda: f64,
) -> f64 {
    let mut g = 0.0;
    let mut h = 0.0;
    if let Some(mask) = estimation {
        for &i in indices {
            if mask[i] {
                g += grad[i];
                h += hess[i];
            }
        }
        if h == 0.0 {
            return leaf_value(grad, hess, indices, None, reg_lambda);
        }
    } else {
        for &i in indices {
            g += grad[i];
            h += hess[i];
        }
    }
    if h + reg_lambda == 0.0 {
        0.0
    } else {
        -g / (h + reg_lambda)
    }
}

pub(crate) fn partition(
    binned: &BinnedMatrix,
    indices: &[usize],
    feature: usize,
    bin: u8,
) -> (Vec<usize>, Vec<usize>) {
    let col = &binned.bins[feature];
    let mut left = Vec::with_capacity(indices.len() / 2);
    let mut right = Vec::with_capacity(indices.len() / 2);
    for &i in indices {
        if col[i] <= bin {
            left.push(i);
        } else {
            right.push(i);
        }
    }
    (left, right)
}

#[derive(Debug)]
pub(crate) struct TreeBuilder {
    pub max_depth: usize,
    pub max_leaves: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub learning_rate: f64,
}

struct OpenNode {
    indices: Vec<usize>,
    depth: usize,
    split: Option<Split>,
}

impl TreeBuilder {
    /// Depth-wise (level-order) growth.
    pub fn grow_depth_wise(
        &self,
        binned: &BinnedMatrix,
        grad: &[f64],
        hess: &[f64],
        indices: Vec<usize>,
        features: &[usize],
        estimation: Option<&[bool]>,
    ) -> Tree {
        let ctx = SplitContext {
            binned,
            grad,
            hess,
            features,
            min_child_weight: self.min_child_weight,
            reg_lambda: self.reg_lambda,
        };
        let mut tree = Tree::default();
        self.grow_node(&ctx, &mut tree, indices, 0, estimation);
        tree
    }

    fn grow_node(
        &self,
        ctx: &SplitContext<'_>,
        tree: &mut Tree,
        indices: Vec<usize>,
        depth: usize,
        estimation: Option<&[bool]>,
    ) -> i32 {
        let make_leaf = |tree: &mut Tree, indices: &[usize]| -> i32 {
            let value = leaf_value(ctx.grad, ctx.hess, indices, estimation, ctx.reg_lambda)
                * self.learning_rate;
            tree.nodes.push(TreeNode::leaf(value));
            (tree.nodes.len() - 1) as i32
        };

        if depth >= self.max_depth || indices.len() < 2 {
            return make_leaf(tree, &indices);
        }
        let split = match find_best_split(ctx, &indices) {
            Some(s) => s,
            None => return make_leaf(tree, &indices),
        };

        let (left_idx, right_idx) = partition(ctx.binned, &indices, split.feature, split.bin);
        if left_idx.is_empty() || right_idx.is_empty() {
            return make_leaf(tree, &indices);
        }

        let node_idx = tree.nodes.len();
        tree.nodes.push(TreeNode {
            feature: split.feature as u32,
            threshold: split.threshold,
            left: -1,
            right: -1,
            value: 0.0,
            is_leaf: false,
        });
        let left = self.grow_node(ctx, tree, left_idx, depth + 1, estimation);
        let right = self.grow_node(ctx, tree, right_idx, depth + 1, estimation);
        tree.nodes[node_idx].left = left;
        tree.nodes[node_idx].right = right;
        node_idx as i32
    }

    /// Leaf-wise (best-first) growth: always expand the open leaf with the
    /// highest gain until the leaf budget is spent.
    pub fn grow_leaf_wise(
        &self,
        binned: &BinnedMatrix,
        grad: &[f64],
        hess: &[f64],
        indices: Vec<usize>,
        features: &[usize],
    ) -> Tree {
        let ctx = SplitContext {
            binned,
            grad,
            hess,
            features,
            min_child_weight: self.min_child_weight,
            reg_lambda: self.reg_lambda,
        };
        // The depth cap is looser than depth-wise growth; the leaf budget is
        // what actually bounds this tree.
        let depth_cap = self.max_depth + 4;

        let mut tree = Tree::default();
        let root_split = find_best_split(&ctx, &indices);
        tree.nodes.push(TreeNode::leaf(0.0));
        let mut open: Vec<(usize, OpenNode)> = vec![(
            0,
            OpenNode {
                indices,
                depth: 0,
                split: root_split,
            },
        )];
        let mut n_leaves = 1usize;

        while n_leaves < self.max_leaves {
            // Highest-gain splittable open leaf
            let pick = open
                .iter()
                .enumerate()
                .filter(|(_, (_, n))| n.split.is_some() && n.depth < depth_cap)
                .max_by(|a, b| {
                    let ga = a.1 .1.split.as_ref().unwrap().gain;
                    let gb = b.1 .1.split.as_ref().unwrap().gain;
                    ga.partial_cmp(&gb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            let pick = match pick {
                Some(i) => i,
                None => break,
            };

            let (node_idx, node) = open.swap_remove(pick);
            let split = node.split.unwrap();
            let (left_idx, right_idx) = partition(binned, &node.indices, split.feature, split.bin);
            if left_idx.is_empty() || right_idx.is_empty() {
                continue;
            }

            let left_node = (tree.nodes.len()) as i32;
            tree.nodes.push(TreeNode::leaf(0.0));
            let right_node = (tree.nodes.len()) as i32;
            tree.nodes.push(TreeNode::leaf(0.0));

            tree.nodes[node_idx] = TreeNode {
                feature: split.feature as u32,
                threshold: split.threshold,
                left: left_node,
                right: right_node,
                value: 0.0,
                is_leaf: false,
            };
            n_leaves += 1;

            let left_split = find_best_split(&ctx, &left_idx);
            let right_split = find_best_split(&ctx, &right_idx);
            open.push((
                left_node as usize,
                OpenNode {
                    indices: left_idx,
                    depth: node.depth + 1,
                    split: left_split,
                },
            ));
            open.push((
                right_node as usize,
                OpenNode {
                    indices: right_idx,
                    depth: node.depth + 1,
                    split: right_split,
                },
            ));
        }

        // Fill in the remaining open leaves
        for (node_idx, node) in open {
            let value = leaf_value(grad, hess, &node.indices, None, self.reg_lambda)
                * self.learning_rate;
            tree.nodes[node_idx] = TreeNode::leaf(value);
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (FeatureMatrix, Vec<f64>, Vec<f64>) {
        // y = 1 for x >= 5, else -1; gradients for squared error at pred=0
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let m = FeatureMatrix::from_rows(&rows);
        let grad: Vec<f64> = (0..10).map(|i| if i >= 5 { -1.0 } else { 1.0 }).collect();
        let hess = vec![1.0; 10];
        (m, grad, hess)
    }

    #[test]
    fn test_binning_preserves_order() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let m = FeatureMatrix::from_rows(&rows);
        let binned = BinnedMatrix::build(&m, 16);
        let col = &binned.bins[0];
        for w in col.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert!(binned.n_bins(0) <= 16);
    }

    #[test]
    fn test_depth_wise_learns_step_function() {
        let (m, grad, hess) = step_data();
        let binned = BinnedMatrix::build(&m, 32);
        let builder = TreeBuilder {
            max_depth: 3,
            max_leaves: 8,
            min_child_weight: 1.0,
            reg_lambda: 0.0,
            learning_rate: 1.0,
        };
        let tree = builder.grow_depth_wise(
            &binned,
            &grad,
            &hess,
            (0..10).collect(),
            &[0],
            None,
        );
        // leaf value is -G/H: +1 for the high side, -1 for the low side
        assert!(tree.predict(&[9.0]) > 0.5);
        assert!(tree.predict(&[0.0]) < -0.5);
    }

    #[test]
    fn test_leaf_wise_learns_step_function() {
        let (m, grad, hess) = step_data();
        let binned = BinnedMatrix::build(&m, 32);
        let builder = TreeBuilder {
            max_depth: 3,
            max_leaves: 4,
            min_child_weight: 1.0,
            reg_lambda: 0.0,
            learning_rate: 1.0,
        };
        let tree = builder.grow_leaf_wise(&binned, &grad, &hess, (0..10).collect(), &[0]);
        assert!(tree.predict(&[9.0]) > 0.5);
        assert!(tree.predict(&[0.0]) < -0.5);
    }

    #[test]
    fn test_min_child_weight_blocks_split() {
        let (m, grad, hess) = step_data();
        let binned = BinnedMatrix::build(&m, 32);
        let ctx = SplitContext {
            binned: &binned,
            grad: &grad,
            hess: &hess,
            features: &[0],
            min_child_weight: 100.0,
            reg_lambda: 0.0,
        };
        assert!(find_best_split(&ctx, &(0..10).collect::<Vec<_>>()).is_none());
    }
}
