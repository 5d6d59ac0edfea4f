use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Splits whose gain is below this fraction of the parent score are treated
/// as rounding noise.
const MIN_RELATIVE_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn evaluate(&self, sample: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// Controls how far a tree grows. Leaves hold `-G / (H + lambda)` over the
/// gradient and hessian sums of their rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    pub max_depth: Option<usize>,
    pub min_child_weight: f64,
    pub lambda: f64,
    pub gamma: f64,
}

impl GrowthParams {
    /// Squared-error CART grown until every leaf is pure or unsplittable.
    pub const CART: Self = Self {
        max_depth: None,
        min_child_weight: 1.0,
        lambda: 0.0,
        gamma: 0.0,
    };

    pub fn boosted(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            min_child_weight: 1.0,
            lambda: 1.0,
            gamma: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    /// Fits a CART regressor and returns it with its normalised importances.
    pub fn fit(records: &Array2<f64>, targets: &Array1<f64>) -> (Self, Vec<f64>) {
        let gradients = targets.iter().map(|t| -t).collect::<Vec<_>>();
        let hessians = vec![1.0; targets.len()];
        let (tree, gains) = Self::grow(records, &gradients, &hessians, GrowthParams::CART);
        (tree, normalize(gains))
    }

    /// Grows a tree on per-row gradient statistics. The second value holds
    /// the summed split gain of every feature.
    pub fn grow(
        records: &Array2<f64>,
        gradients: &[f64],
        hessians: &[f64],
        params: GrowthParams,
    ) -> (Self, Vec<f64>) {
        let mut grower = Grower {
            records,
            gradients,
            hessians,
            params,
            gains: vec![0.0; records.ncols()],
        };
        let root = grower.node((0..records.nrows()).collect(), 0);
        (Self { root }, grower.gains)
    }

    pub fn predict(&self, records: &Array2<f64>) -> Array1<f64> {
        records
            .axis_iter(Axis(0))
            .map(|row| self.root.evaluate(row))
            .collect()
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a> {
    records: &'a Array2<f64>,
    gradients: &'a [f64],
    hessians: &'a [f64],
    params: GrowthParams,
    gains: Vec<f64>,
}

impl Grower<'_> {
    fn totals(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &row| {
            (g + self.gradients[row], h + self.hessians[row])
        })
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn node(&mut self, rows: Vec<usize>, depth: usize) -> TreeNode {
        let (g, h) = self.totals(&rows);
        let leaf = TreeNode::Leaf {
            value: -g / (h + self.params.lambda),
        };
        if rows.len() < 2 || self.params.max_depth.is_some_and(|max| depth >= max) {
            return leaf;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return leaf;
        };

        let records = self.records;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&row| records[[row, split.feature]] < split.threshold);
        if left.is_empty() || right.is_empty() {
            return leaf;
        }

        self.gains[split.feature] += split.gain;
        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.node(left, depth + 1)),
            right: Box::new(self.node(right, depth + 1)),
        }
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<Candidate> {
        let records = self.records;
        let parent = self.score(g_total, h_total);
        let mut order = rows.to_vec();
        let mut best: Option<Candidate> = None;

        for feature in 0..records.ncols() {
            order.sort_by(|&a, &b| records[[a, feature]].total_cmp(&records[[b, feature]]));
            let (mut g_left, mut h_left) = (0.0, 0.0);
            for pair in order.windows(2) {
                let (row, next) = (pair[0], pair[1]);
                g_left += self.gradients[row];
                h_left += self.hessians[row];
                let (here, after) = (records[[row, feature]], records[[next, feature]]);
                if here == after {
                    continue;
                }
                let (g_right, h_right) = (g_total - g_left, h_total - h_left);
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight
                {
                    continue;
                }
                let gain =
                    0.5 * (self.score(g_left, h_left) + self.score(g_right, h_right) - parent);
                if best.as_ref().is_none_or(|current| gain > current.gain) {
                    best = Some(Candidate {
                        feature,
                        threshold: here + (after - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        let floor = self.params.gamma.max(MIN_RELATIVE_GAIN * parent.abs());
        best.filter(|candidate| candidate.gain > floor)
    }
}

/// Scales importances to sum to 1; all-zero input stays all zero.
pub fn normalize(gains: Vec<f64>) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total > 0.0 {
        gains.into_iter().map(|gain| gain / total).collect()
    } else {
        gains
    }
}

/// Bagged CART ensemble; every tree is fitted on a bootstrap sample of the
/// rows drawn from one seeded generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(
        records: &Array2<f64>,
        targets: &Array1<f64>,
        n_trees: usize,
        seed: u64,
    ) -> (Self, Vec<f64>) {
        let rows = records.nrows();
        let mut importances = vec![0.0; records.ncols()];
        if rows == 0 {
            return (Self { trees: Vec::new() }, importances);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(n_trees);
        for _ in 0..n_trees {
            let sample = (0..rows)
                .map(|_| rng.gen_range(0..rows))
                .collect::<Vec<_>>();
            let (tree, tree_importances) = RegressionTree::fit(
                &records.select(Axis(0), &sample),
                &targets.select(Axis(0), &sample),
            );
            for (total, value) in importances.iter_mut().zip(tree_importances) {
                *total += value;
            }
            trees.push(tree);
        }
        (Self { trees }, normalize(importances))
    }

    pub fn predict(&self, records: &Array2<f64>) -> Array1<f64> {
        let mut sum = Array1::zeros(records.nrows());
        for tree in &self.trees {
            sum += &tree.predict(records);
        }
        sum / self.trees.len().max(1) as f64
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Squared-error gradient boosting with second-order leaf weights and an L2
/// leaf penalty, in the manner of XGBoost's exact greedy learner. Importances
/// are total split gain per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(
        records: &Array2<f64>,
        targets: &Array1<f64>,
        rounds: usize,
        learning_rate: f64,
        max_depth: usize,
    ) -> (Self, Vec<f64>) {
        let base_score = targets.mean().unwrap_or_default();
        let mut predictions = Array1::from_elem(targets.len(), base_score);
        let hessians = vec![1.0; targets.len()];
        let params = GrowthParams::boosted(max_depth);
        let mut gains = vec![0.0; records.ncols()];
        let mut trees = Vec::with_capacity(rounds);

        for _ in 0..rounds {
            let gradients = predictions
                .iter()
                .zip(targets)
                .map(|(prediction, target)| prediction - target)
                .collect::<Vec<_>>();
            let (tree, tree_gains) = RegressionTree::grow(records, &gradients, &hessians, params);
            predictions.scaled_add(learning_rate, &tree.predict(records));
            for (total, gain) in gains.iter_mut().zip(tree_gains) {
                *total += gain;
            }
            trees.push(tree);
        }

        let model = Self {
            base_score,
            learning_rate,
            trees,
        };
        (model, normalize(gains))
    }

    pub fn predict(&self, records: &Array2<f64>) -> Array1<f64> {
        let mut output = Array1::from_elem(records.nrows(), self.base_score);
        for tree in &self.trees {
            output.scaled_add(self.learning_rate, &tree.predict(records));
        }
        output
    }
}
