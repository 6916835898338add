use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::{binning::BinMapper, Hyperparameters};

/// Gain below which a node stays a leaf.
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Tree node. Rows with `value <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Internal split.
    Split {
        /// Feature column index.
        feature: usize,
        /// Split threshold.
        threshold: f64,
        /// Index of the left child.
        left: usize,
        /// Index of the right child.
        right: usize,
        /// Loss reduction achieved by the split.
        gain: f64,
    },
    /// Terminal node holding a shrunken residual mean.
    Leaf {
        /// Contribution added to the prediction.
        value: f64,
    },
}

/// One regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Walks the tree for one feature row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                }) => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Some(Node::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }

    /// Nodes in arena order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Longest root-to-leaf path, counted in splits.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    /// Checks child links point forward inside the arena and features are in range.
    pub(crate) fn is_well_formed(&self, n_features: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(idx, node)| match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    *feature < n_features
                        && threshold.is_finite()
                        && *left > idx
                        && *right > idx
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
                Node::Leaf { value } => value.is_finite(),
            })
    }
}

/// Binned training view shared by every tree of one fit.
pub(crate) struct TrainingFrame<'a> {
    pub(crate) mappers: &'a [BinMapper],
    /// `bins[feature][row]`.
    pub(crate) bins: &'a [Vec<u16>],
}

/// Grows one tree on the residuals and accumulates split gains per feature.
pub(crate) struct TreeGrower<'a> {
    frame: &'a TrainingFrame<'a>,
    residuals: &'a [f64],
    params: &'a Hyperparameters,
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl<'a> TreeGrower<'a> {
    pub(crate) fn new(
        frame: &'a TrainingFrame<'a>,
        residuals: &'a [f64],
        params: &'a Hyperparameters,
    ) -> Self {
        Self {
            frame,
            residuals,
            params,
            nodes: Vec::new(),
            gains: vec![0.0; frame.mappers.len()],
        }
    }

    /// Grows the tree over `rows`, returning it with the per-feature gain totals.
    pub(crate) fn grow(mut self, rows: Vec<usize>) -> (RegressionTree, Vec<f64>) {
        self.build(rows, 0);
        (RegressionTree { nodes: self.nodes }, self.gains)
    }

    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let sum: f64 = rows.iter().map(|&row| self.residuals[row]).sum();
        self.nodes.push(self.leaf(sum, rows.len()));
        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf {
            return idx;
        }
        let Some(best) = self.best_split(&rows, sum) else {
            return idx;
        };
        let bins = &self.frame.bins[best.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&row| usize::from(bins[row]) <= best.bin);
        self.gains[best.feature] += best.gain;
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: self.frame.mappers[best.feature].threshold(best.bin),
            left,
            right,
            gain: best.gain,
        };
        idx
    }

    fn leaf(&self, sum: f64, count: usize) -> Node {
        Node::Leaf {
            value: self.params.learning_rate * sum
                / (count as f64 + self.params.l2_regularization),
        }
    }

    /// Histogram scan; the first candidate with strictly higher gain wins ties.
    fn best_split(&self, rows: &[usize], sum: f64) -> Option<BestSplit> {
        let lambda = self.params.l2_regularization;
        let count = rows.len();
        let parent = sum * sum / (count as f64 + lambda);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        for (feature, mapper) in self.frame.mappers.iter().enumerate() {
            let n_bins = mapper.n_bins();
            if n_bins < 2 {
                continue;
            }
            let bins = &self.frame.bins[feature];
            let mut hist_sum = vec![0.0; n_bins];
            let mut hist_count = vec![0usize; n_bins];
            for &row in rows {
                let bin = usize::from(bins[row]);
                hist_sum[bin] += self.residuals[row];
                hist_count[bin] += 1;
            }
            let mut left_sum = 0.0;
            let mut left_count = 0;
            for bin in 0..n_bins - 1 {
                left_sum += hist_sum[bin];
                left_count += hist_count[bin];
                let right_count = count - left_count;
                if left_count < min_leaf {
                    continue;
                }
                if right_count < min_leaf {
                    break;
                }
                let right_sum = sum - left_sum;
                let gain = left_sum * left_sum / (left_count as f64 + lambda)
                    + right_sum * right_sum / (right_count as f64 + lambda)
                    - parent;
                let improves = best.as_ref().map_or(gain > MIN_SPLIT_GAIN, |b| gain > b.gain);
                if improves {
                    best = Some(BestSplit { feature, bin, gain });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn predict_follows_left_on_equal_threshold() {
        let tree = RegressionTree {
            nodes: vec![
                Node::Split {
                    feature: 1,
                    threshold: 5.0,
                    left: 1,
                    right: 2,
                    gain: 1.0,
                },
                Node::Leaf { value: -2.0 },
                Node::Leaf { value: 3.0 },
            ],
        };
        assert_eq!(tree.predict_row(array![0.0, 5.0].view()), -2.0);
        assert_eq!(tree.predict_row(array![0.0, 5.5].view()), 3.0);
        assert_eq!(tree.depth(), 1);
        assert!(tree.is_well_formed(2));
        assert!(!tree.is_well_formed(1));
    }

    #[test]
    fn grower_splits_on_the_informative_feature() {
        let features = array![[0.0, 7.0], [1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let residuals = [-10.0, -10.0, 10.0, 10.0];
        let mappers: Vec<BinMapper> = features
            .columns()
            .into_iter()
            .map(|column| BinMapper::fit(column, 256))
            .collect();
        let bins: Vec<Vec<u16>> = mappers
            .iter()
            .zip(features.columns())
            .map(|(mapper, column)| column.iter().map(|v| mapper.bin(*v)).collect())
            .collect();
        let frame = TrainingFrame {
            mappers: &mappers,
            bins: &bins,
        };
        let params = Hyperparameters {
            max_depth: 1,
            learning_rate: 1.0,
            l2_regularization: 0.0,
            ..Hyperparameters::default()
        };
        let (tree, gains) = TreeGrower::new(&frame, &residuals, &params).grow(vec![0, 1, 2, 3]);
        assert!(matches!(
            tree.nodes()[0],
            Node::Split { feature: 0, threshold, .. } if threshold == 1.5
        ));
        assert_eq!(tree.predict_row(features.row(0)), -10.0);
        assert_eq!(tree.predict_row(features.row(3)), 10.0);
        assert!(gains[0] > 0.0);
        assert_eq!(gains[1], 0.0);
    }
}
