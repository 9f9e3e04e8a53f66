//! Running evaluation metrics
//!
//! Labels and predictions arrive batch by batch as `f32` slices: class
//! indices for classification tasks (predictions already argmax-ed), raw
//! scores for regression. Degenerate cases report 0 rather than NaN.

pub trait Metric: Send {
    fn reset(&mut self);
    fn update(&mut self, labels: &[f32], predictions: &[f32]);
    /// Named values, in a stable order
    fn values(&self) -> Vec<(String, f64)>;
}

fn class(x: f32) -> u32 {
    x.round().max(0.0) as u32
}

#[derive(Debug, Default, Clone)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for Accuracy {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        for (l, p) in labels.iter().zip(predictions) {
            if class(*l) == class(*p) {
                self.correct += 1;
            }
            self.total += 1;
        }
    }

    fn values(&self) -> Vec<(String, f64)> {
        let acc = if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        };
        vec![("accuracy".to_string(), acc)]
    }
}

/// Binary confusion counts with class 1 as positive
#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: f64,
    tn: f64,
    fp: f64,
    fn_: f64,
}

impl Confusion {
    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        for (l, p) in labels.iter().zip(predictions) {
            match (class(*l) == 1, class(*p) == 1) {
                (true, true) => self.tp += 1.0,
                (false, false) => self.tn += 1.0,
                (false, true) => self.fp += 1.0,
                (true, false) => self.fn_ += 1.0,
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct F1 {
    counts: Confusion,
}

impl F1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for F1 {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        self.counts.update(labels, predictions);
    }

    fn values(&self) -> Vec<(String, f64)> {
        let c = self.counts;
        let denom = 2.0 * c.tp + c.fp + c.fn_;
        let f1 = if denom == 0.0 { 0.0 } else { 2.0 * c.tp / denom };
        vec![("f1".to_string(), f1)]
    }
}

#[derive(Debug, Default, Clone)]
pub struct MatthewsCorrelation {
    counts: Confusion,
}

impl MatthewsCorrelation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MatthewsCorrelation {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        self.counts.update(labels, predictions);
    }

    fn values(&self) -> Vec<(String, f64)> {
        let Confusion { tp, tn, fp, fn_ } = self.counts;
        let denom = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        let mcc = if denom == 0.0 {
            0.0
        } else {
            (tp * tn - fp * fn_) / denom
        };
        vec![("mcc".to_string(), mcc)]
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        cov / denom
    }
}

/// 1-based ranks, ties share their average rank
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

#[derive(Debug, Default, Clone)]
struct Pairs {
    labels: Vec<f64>,
    predictions: Vec<f64>,
}

impl Pairs {
    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        for (l, p) in labels.iter().zip(predictions) {
            self.labels.push(*l as f64);
            self.predictions.push(*p as f64);
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PearsonCorrelation {
    pairs: Pairs,
}

impl PearsonCorrelation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for PearsonCorrelation {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        self.pairs.update(labels, predictions);
    }

    fn values(&self) -> Vec<(String, f64)> {
        vec![(
            "pearsonr".to_string(),
            pearson(&self.pairs.labels, &self.pairs.predictions),
        )]
    }
}

#[derive(Debug, Default, Clone)]
pub struct SpearmanCorrelation {
    pairs: Pairs,
}

impl SpearmanCorrelation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for SpearmanCorrelation {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        self.pairs.update(labels, predictions);
    }

    fn values(&self) -> Vec<(String, f64)> {
        let rho = pearson(&ranks(&self.pairs.labels), &ranks(&self.pairs.predictions));
        vec![("spearmanr".to_string(), rho)]
    }
}

/// Several metrics fed the same pairs
#[derive(Default)]
pub struct CompositeMetric {
    metrics: Vec<Box<dyn Metric>>,
}

impl CompositeMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: impl Metric + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Metric for CompositeMetric {
    fn reset(&mut self) {
        for m in &mut self.metrics {
            m.reset();
        }
    }

    fn update(&mut self, labels: &[f32], predictions: &[f32]) {
        for m in &mut self.metrics {
            m.update(labels, predictions);
        }
    }

    fn values(&self) -> Vec<(String, f64)> {
        self.metrics.iter().flat_map(|m| m.values()).collect()
    }
}

/// `name:value,name:value` as in the progress and validation lines
pub fn format_values(values: &[(String, f64)]) -> String {
    values
        .iter()
        .map(|(name, v)| format!("{}:{:.4}", name, v))
        .collect::<Vec<_>>()
        .join(",")
}
