//! Seeded isolation forest.
//!
//! Each tree is grown on a subsample drawn without replacement, splitting on a
//! random non-constant feature at a uniform threshold between the node's
//! minimum and maximum for that feature, down to `ceil(log2(sample_size))`
//! levels. Points that isolate in few splits are anomalous.
//!
//! Scores follow the usual convention: `score_samples` is the negated
//! anomaly score `-2^(-E[h(x)] / c(n))`, the offset is the `contamination`
//! percentile of the training scores, and `decision = score - offset` is
//! negative for outliers.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::config::ModelConfig;

// ---

/// Upper bound on rows drawn per tree.
pub const MAX_SAMPLES: usize = 256;

/// Fewer rows than this cannot be split meaningfully.
pub const MIN_FIT_ROWS: usize = 2;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn fit(data: &[Vec<f64>], rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        // ---
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(data, rows, 0, max_depth, rng);
        tree
    }

    fn grow(
        &mut self,
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        // ---
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= max_depth || rows.len() < 2 {
            return idx;
        }

        let mut features: Vec<usize> = (0..data[rows[0]].len()).collect();
        features.shuffle(rng);

        let split = features.into_iter().find_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (lo < hi).then_some((f, lo, hi))
        });

        // Every feature is constant at this node: it cannot be split further.
        let Some((feature, lo, hi)) = split else {
            return idx;
        };

        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] <= threshold);

        let left = self.grow(data, left_rows, depth + 1, max_depth, rng);
        let right = self.grow(data, right_rows, depth + 1, max_depth, rng);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        // ---
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[feature] <= threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// A fitted forest together with its decision offset.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    // ---
    trees: Vec<Tree>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on `data` (one feature vector per row). Returns `None` when there
    /// are fewer than [`MIN_FIT_ROWS`] rows.
    pub fn fit(data: &[Vec<f64>], config: &ModelConfig) -> Option<Self> {
        // ---
        let n = data.len();
        if n < MIN_FIT_ROWS {
            return None;
        }

        let sample_size = n.min(MAX_SAMPLES);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let trees = (0..config.n_estimators)
            .map(|_| {
                let mut tree_rng = StdRng::seed_from_u64(rng.gen());
                let rows = rand::seq::index::sample(&mut tree_rng, n, sample_size).into_vec();
                Tree::fit(data, rows, max_depth, &mut tree_rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };
        let scores = forest.score_samples(data);
        forest.offset = percentile(&scores, config.contamination * 100.0);
        Some(forest)
    }

    /// Negated anomaly score per row, in `[-1, 0)`; lower is more anomalous.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        // ---
        let norm = average_path_length(self.sample_size);
        data.iter()
            .map(|x| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
                    / self.trees.len() as f64;
                -(2f64.powf(-mean_depth / norm))
            })
            .collect()
    }

    /// `score_samples - offset`; negative for outliers.
    pub fn decision_function(&self, data: &[Vec<f64>]) -> Vec<f64> {
        self.score_samples(data)
            .into_iter()
            .map(|s| s - self.offset)
            .collect()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` nodes.
fn average_path_length(n: usize) -> f64 {
    // ---
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Percentile `q` (0..=100) with linear interpolation between closest ranks.
fn percentile(values: &[f64], q: f64) -> f64 {
    // ---
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
