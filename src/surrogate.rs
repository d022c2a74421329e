use crate::config::{SurrogateConfig, SurrogateKind};
use crate::error::{Result, TunerError};
use crate::observation::{Metric, ObservationTable};

pub const FEATURE_COUNT: usize = 4;

pub type Features = [f64; FEATURE_COUNT];

/// A regression model mapping a parameter tuple's features to a metric value
pub trait Surrogate: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, features: &[Features], targets: &[f64]) -> Result<()>;

    fn predict(&self, features: &Features) -> Result<f64>;
}

fn check_training_data(features: &[Features], targets: &[f64]) -> Result<()> {
    if features.is_empty() {
        return Err(TunerError::EmptyObservationTable);
    }
    if features.len() != targets.len() {
        return Err(TunerError::invalid(
            "targets",
            targets.len(),
            format!("expected one target per feature row ({})", features.len()),
        ));
    }
    if let Some(bad) = targets.iter().find(|t| !t.is_finite()) {
        return Err(TunerError::invalid("targets", bad, "targets must be finite"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    cost: f64,
}

/// CART regression tree with squared-error splits.
///
/// Candidate thresholds sit halfway between consecutive distinct values; features are
/// scanned in order and the first strictly cheapest split wins, so fitting is
/// deterministic.
#[derive(Debug, Clone)]
pub struct DecisionTreeRegressor {
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

impl Default for DecisionTreeRegressor {
    fn default() -> Self {
        Self::new(None, 2, 1)
    }
}

impl DecisionTreeRegressor {
    pub fn new(max_depth: Option<usize>, min_samples_split: usize, min_samples_leaf: usize) -> Self {
        Self {
            max_depth,
            min_samples_split: min_samples_split.max(2),
            min_samples_leaf: min_samples_leaf.max(1),
            nodes: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    fn best_split(&self, features: &[Features], targets: &[f64], indices: &[usize]) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.min_samples_leaf;
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..FEATURE_COUNT {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| features[a][feature].total_cmp(&features[b][feature]));

            let total_sum: f64 = order.iter().map(|&i| targets[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| targets[i] * targets[i]).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for pos in 1..n {
                let prev = order[pos - 1];
                left_sum += targets[prev];
                left_sq += targets[prev] * targets[prev];

                if pos < min_leaf || n - pos < min_leaf {
                    continue;
                }
                let lo = features[prev][feature];
                let hi = features[order[pos]][feature];
                if lo == hi {
                    continue;
                }

                let n_left = pos as f64;
                let n_right = (n - pos) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let cost = (left_sq - left_sum * left_sum / n_left).max(0.0)
                    + (right_sq - right_sum * right_sum / n_right).max(0.0);

                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    // Adjacent floats can round the midpoint up onto `hi`
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(SplitCandidate { feature, threshold, cost });
                }
            }
        }

        best
    }

    fn build(&mut self, features: &[Features], targets: &[f64], indices: Vec<usize>, depth: usize) -> usize {
        let n = indices.len();
        let first = targets[indices[0]];
        let pure = indices.iter().all(|&i| targets[i] == first);
        let mean = if pure {
            first
        } else {
            indices.iter().map(|&i| targets[i]).sum::<f64>() / n as f64
        };
        let depth_reached = self.max_depth.map_or(false, |max| depth >= max);

        let split = if pure || depth_reached || n < self.min_samples_split {
            None
        } else {
            self.best_split(features, targets, &indices)
        };

        let node_index = self.nodes.len();
        let Some(split) = split else {
            self.nodes.push(Node::Leaf { value: mean });
            return node_index;
        };

        // Placeholder until both children exist
        self.nodes.push(Node::Leaf { value: mean });
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| features[i][split.feature] <= split.threshold);

        let left = self.build(features, targets, left_rows, depth + 1);
        let right = self.build(features, targets, right_rows, depth + 1);
        self.nodes[node_index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_index
    }
}

impl Surrogate for DecisionTreeRegressor {
    fn name(&self) -> &'static str {
        "decision_tree"
    }

    fn fit(&mut self, features: &[Features], targets: &[f64]) -> Result<()> {
        check_training_data(features, targets)?;
        self.nodes.clear();
        let indices: Vec<usize> = (0..features.len()).collect();
        self.build(features, targets, indices, 0);
        log::debug!(
            "Fitted decision tree on {} rows: {} nodes, depth {}",
            features.len(),
            self.node_count(),
            self.depth()
        );
        Ok(())
    }

    fn predict(&self, features: &Features) -> Result<f64> {
        if self.nodes.is_empty() {
            return Err(TunerError::SurrogateNotFitted);
        }
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return Ok(*value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Mean target of the `k` nearest training rows under standardized Euclidean distance
#[derive(Debug, Clone)]
pub struct NearestNeighborsRegressor {
    k: usize,
    center: Features,
    scale: Features,
    points: Vec<Features>,
    targets: Vec<f64>,
}

impl NearestNeighborsRegressor {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            center: [0.0; FEATURE_COUNT],
            scale: [1.0; FEATURE_COUNT],
            points: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn standardize(&self, features: &Features) -> Features {
        let mut out = [0.0; FEATURE_COUNT];
        for (f, value) in out.iter_mut().enumerate() {
            *value = (features[f] - self.center[f]) / self.scale[f];
        }
        out
    }
}

impl Surrogate for NearestNeighborsRegressor {
    fn name(&self) -> &'static str {
        "nearest_neighbors"
    }

    fn fit(&mut self, features: &[Features], targets: &[f64]) -> Result<()> {
        check_training_data(features, targets)?;
        let n = features.len() as f64;
        for f in 0..FEATURE_COUNT {
            let mean = features.iter().map(|row| row[f]).sum::<f64>() / n;
            let variance = features.iter().map(|row| (row[f] - mean).powi(2)).sum::<f64>() / n;
            self.center[f] = mean;
            // Constant features contribute nothing to the distance
            self.scale[f] = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        }
        self.points = features.iter().map(|row| self.standardize(row)).collect();
        self.targets = targets.to_vec();
        Ok(())
    }

    fn predict(&self, features: &Features) -> Result<f64> {
        if self.points.is_empty() {
            return Err(TunerError::SurrogateNotFitted);
        }
        let query = self.standardize(features);
        let mut distances: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d: f64 = p.iter().zip(query.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (d, i)
            })
            .collect();
        // Stable on ties: the earlier training row wins
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let k = self.k.min(distances.len());
        Ok(distances[..k].iter().map(|&(_, i)| self.targets[i]).sum::<f64>() / k as f64)
    }
}

/// Build an unfitted surrogate from configuration
pub fn build_surrogate(config: &SurrogateConfig) -> Box<dyn Surrogate> {
    match config.kind {
        SurrogateKind::DecisionTree => Box::new(DecisionTreeRegressor::new(
            config.max_depth,
            config.min_samples_split,
            config.min_samples_leaf,
        )),
        SurrogateKind::NearestNeighbors { k } => Box::new(NearestNeighborsRegressor::new(k)),
    }
}

/// One fitted surrogate per metric
pub struct FittedSurrogates {
    pub psnr: Box<dyn Surrogate>,
    pub ssim: Box<dyn Surrogate>,
}

impl FittedSurrogates {
    pub fn get(&self, metric: Metric) -> &dyn Surrogate {
        match metric {
            Metric::Psnr => self.psnr.as_ref(),
            Metric::Ssim => self.ssim.as_ref(),
        }
    }
}

/// Train both surrogates on the whole table; there is no held-out split
pub fn fit_surrogates(table: &ObservationTable, config: &SurrogateConfig) -> Result<FittedSurrogates> {
    if table.is_empty() {
        return Err(TunerError::EmptyObservationTable);
    }
    let features = table.features();

    let mut psnr = build_surrogate(config);
    psnr.fit(&features, &table.targets(Metric::Psnr, config.psnr_cap))?;
    let mut ssim = build_surrogate(config);
    ssim.fit(&features, &table.targets(Metric::Ssim, config.psnr_cap))?;

    log::info!("Trained {} surrogates on {} observations", psnr.name(), table.len());
    Ok(FittedSurrogates { psnr, ssim })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterTuple;
    use crate::similarity::MetricPair;

    fn grid_features() -> Vec<Features> {
        let mut rows = Vec::new();
        for b in [-20.0, -10.0, 0.0, 10.0] {
            for t in [50.0, 100.0, 150.0] {
                for c in [1.0, 1.5] {
                    for m in [1.0, 3.0] {
                        rows.push([b, t, c, m]);
                    }
                }
            }
        }
        rows
    }

    #[test]
    fn test_fully_grown_tree_reproduces_training_targets() {
        let features = grid_features();
        let targets: Vec<f64> = features
            .iter()
            .map(|f| -(f[0] / 10.0).powi(2) + f[1] / 50.0 - f[2] + 0.1 * f[3])
            .collect();

        let mut tree = DecisionTreeRegressor::default();
        tree.fit(&features, &targets).expect("fit should succeed");

        for (row, expected) in features.iter().zip(&targets) {
            let predicted = tree.predict(row).unwrap();
            assert!((predicted - expected).abs() < 1e-12, "row {:?}: {} vs {}", row, predicted, expected);
        }
    }

    #[test]
    fn test_depth_limit_averages_leaves() {
        let features: Vec<Features> = (0..4).map(|i| [i as f64, 0.0, 0.0, 0.0]).collect();
        let targets = vec![0.0, 0.0, 10.0, 10.0];

        let mut stump = DecisionTreeRegressor::new(Some(1), 2, 1);
        stump.fit(&features, &targets).unwrap();
        assert_eq!(stump.depth(), 1);
        assert_eq!(stump.predict(&[1.0, 0.0, 0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(stump.predict(&[3.0, 0.0, 0.0, 0.0]).unwrap(), 10.0);
        // Between training values the midpoint threshold decides
        assert_eq!(stump.predict(&[1.4, 0.0, 0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(stump.predict(&[1.6, 0.0, 0.0, 0.0]).unwrap(), 10.0);

        let mut root_only = DecisionTreeRegressor::new(Some(0), 2, 1);
        root_only.fit(&features, &targets).unwrap();
        assert_eq!(root_only.predict(&[0.0, 0.0, 0.0, 0.0]).unwrap(), 5.0);
    }

    #[test]
    fn test_min_samples_leaf_is_respected() {
        let features: Vec<Features> = (0..5).map(|i| [i as f64, 0.0, 0.0, 0.0]).collect();
        let targets = vec![100.0, 0.0, 0.0, 0.0, 0.0];

        let mut tree = DecisionTreeRegressor::new(None, 2, 2);
        tree.fit(&features, &targets).unwrap();
        // The outlier cannot be isolated in a leaf of its own
        assert_eq!(tree.predict(&[0.0, 0.0, 0.0, 0.0]).unwrap(), 50.0);
    }

    #[test]
    fn test_fitting_is_deterministic() {
        let features = grid_features();
        let targets: Vec<f64> = features.iter().map(|f| (f[0] * f[1]).sin()).collect();

        let mut a = DecisionTreeRegressor::default();
        let mut b = DecisionTreeRegressor::default();
        a.fit(&features, &targets).unwrap();
        b.fit(&features, &targets).unwrap();
        assert_eq!(a.nodes, b.nodes);
    }

    #[test]
    fn test_invalid_training_data() {
        let mut tree = DecisionTreeRegressor::default();
        assert!(matches!(tree.fit(&[], &[]), Err(TunerError::EmptyObservationTable)));
        assert!(matches!(
            tree.fit(&[[0.0; 4]], &[1.0, 2.0]),
            Err(TunerError::InvalidParameter { .. })
        ));
        assert!(matches!(
            tree.fit(&[[0.0; 4]], &[f64::INFINITY]),
            Err(TunerError::InvalidParameter { .. })
        ));
        assert!(matches!(tree.predict(&[0.0; 4]), Err(TunerError::SurrogateNotFitted)));
    }

    #[test]
    fn test_nearest_neighbors_averages_closest_rows() {
        let features: Vec<Features> = vec![
            [0.0, 50.0, 1.0, 1.0],
            [10.0, 50.0, 1.0, 1.0],
            [20.0, 50.0, 1.0, 1.0],
            [30.0, 50.0, 1.0, 1.0],
        ];
        let targets = vec![1.0, 2.0, 3.0, 4.0];

        let mut single = NearestNeighborsRegressor::new(1);
        single.fit(&features, &targets).unwrap();
        assert_eq!(single.predict(&features[2]).unwrap(), 3.0);

        let mut pair = NearestNeighborsRegressor::new(2);
        pair.fit(&features, &targets).unwrap();
        assert_eq!(pair.predict(&[29.0, 50.0, 1.0, 1.0]).unwrap(), 3.5);
    }

    #[test]
    fn test_fit_surrogates_trains_one_model_per_metric() {
        let mut table = ObservationTable::new();
        table.push(ParameterTuple::new(0, 100, 1.0, 1), MetricPair { psnr: f64::INFINITY, ssim: 0.2 });
        table.push(ParameterTuple::new(10, 100, 1.0, 1), MetricPair { psnr: 8.0, ssim: 0.9 });

        let fitted = fit_surrogates(&table, &SurrogateConfig::default()).unwrap();
        assert_eq!(fitted.get(Metric::Psnr).predict(&[0.0, 100.0, 1.0, 1.0]).unwrap(), 100.0);
        assert_eq!(fitted.get(Metric::Ssim).predict(&[10.0, 100.0, 1.0, 1.0]).unwrap(), 0.9);
        assert_eq!(fitted.psnr.name(), "decision_tree");

        assert!(matches!(
            fit_surrogates(&ObservationTable::new(), &SurrogateConfig::default()),
            Err(TunerError::EmptyObservationTable)
        ));
    }
}
