//! Boosted Haar cascade detector.
//!
//! Reads OpenCV-format cascade XML (`haarcascade_frontalface_default.xml`,
//! `haarcascade_eye.xml`, ...) and runs a multi-scale sliding-window search
//! over an image pyramid, grouping overlapping hits into final regions.

use crate::imaging;
use crate::types::Rect;
use image::GrayImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Relative tolerance used when grouping overlapping hits.
const GROUP_EPS: f64 = 0.2;
/// Windows whose interior standard deviation is at or below this are skipped.
const MIN_WINDOW_STDDEV: f64 = 10.0;
/// Slack applied to stage thresholds.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cascade XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("invalid cascade: {0}")]
    Invalid(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Multi-scale search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid growth per level (> 1).
    pub scale_factor: f64,
    /// Hits a group needs beyond this count to survive. 0 disables grouping.
    pub min_neighbors: usize,
    /// Smallest window, in source pixels.
    pub min_size: (u32, u32),
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
        }
    }
}

// --- XML schema (only the parts evaluation needs) ---

#[derive(Deserialize)]
struct StorageXml {
    cascade: CascadeXml,
}

#[derive(Deserialize)]
struct CascadeXml {
    #[serde(rename = "stageType")]
    stage_type: String,
    #[serde(rename = "featureType")]
    feature_type: String,
    height: String,
    width: String,
    stages: ListXml<StageXml>,
    features: ListXml<FeatureXml>,
}

#[derive(Deserialize)]
struct ListXml<T> {
    #[serde(rename = "_", default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct StageXml {
    #[serde(rename = "stageThreshold")]
    stage_threshold: String,
    #[serde(rename = "weakClassifiers")]
    weak_classifiers: ListXml<WeakXml>,
}

#[derive(Deserialize)]
struct WeakXml {
    #[serde(rename = "internalNodes")]
    internal_nodes: String,
    #[serde(rename = "leafValues")]
    leaf_values: String,
}

#[derive(Deserialize)]
struct FeatureXml {
    rects: ListXml<String>,
    #[serde(default)]
    tilted: Option<String>,
}

// --- Evaluation model ---

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

/// Decision-tree node. Child indices `<= 0` name a leaf (`-idx`).
#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    weak: Vec<WeakClassifier>,
}

/// A loaded boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

fn parse_num<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, CascadeError> {
    text.trim()
        .parse()
        .map_err(|_| CascadeError::Invalid(format!("{what}: cannot parse {:?}", text.trim())))
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;
        tracing::info!(
            path = %path.display(),
            window = ?cascade.window,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );
        Ok(cascade)
    }

    /// Parse cascade XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let storage: StorageXml = quick_xml::de::from_str(xml)?;
        let raw = storage.cascade;

        if raw.stage_type.trim() != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {}", raw.stage_type.trim())));
        }
        if raw.feature_type.trim() != "HAAR" {
            return Err(CascadeError::Unsupported(format!(
                "feature type {}",
                raw.feature_type.trim()
            )));
        }

        let width: u32 = parse_num(&raw.width, "width")?;
        let height: u32 = parse_num(&raw.height, "height")?;
        if width < 3 || height < 3 {
            return Err(CascadeError::Invalid(format!("window {width}x{height} is too small")));
        }

        let features = raw
            .features
            .items
            .iter()
            .enumerate()
            .map(|(i, f)| parse_feature(i, f, width, height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = raw
            .stages
            .items
            .iter()
            .map(|s| parse_stage(s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        Ok(Self {
            window: (width, height),
            stages,
            features,
        })
    }

    /// Base detection window (width, height).
    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    /// Detect objects, returning grouped regions in `gray` coordinates.
    ///
    /// Output order follows grouping order and is not a stable geometric order.
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.window;
        let scale_factor = params.scale_factor.max(1.0001);

        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_win_w = (win_w as f64 * factor).round() as u32;
            let scaled_win_h = (win_h as f64 * factor).round() as u32;
            if scaled_win_w > img_w || scaled_win_h > img_h {
                break;
            }

            let level_w = (img_w as f64 / factor).round() as u32;
            let level_h = (img_h as f64 / factor).round() as u32;
            // A level must leave room to slide the window at least once.
            if level_w <= win_w || level_h <= win_h {
                break;
            }

            if scaled_win_w >= params.min_size.0 && scaled_win_h >= params.min_size.1 {
                let level = imaging::resize_bilinear(gray, level_w, level_h);
                let integral = IntegralImage::new(&level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..level_h - win_h).step_by(step) {
                    for x in (0..level_w - win_w).step_by(step) {
                        if self.accepts(&integral, x, y) {
                            hits.push(Rect::new(
                                (x as f64 * factor).round() as u32,
                                (y as f64 * factor).round() as u32,
                                scaled_win_w,
                                scaled_win_h,
                            ));
                        }
                    }
                }
            }

            factor *= scale_factor;
        }

        tracing::trace!(raw_hits = hits.len(), "cascade scan finished");
        group_rectangles(&hits, params.min_neighbors, GROUP_EPS)
    }

    /// Run every stage on the window whose top-left corner is (x, y).
    fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (win_w, win_h) = self.window;

        // Variance normalisation over the window interior, inset by one pixel.
        let (nx, ny, nw, nh) = (x + 1, y + 1, win_w - 2, win_h - 2);
        let area = (nw * nh) as f64;
        let sum = integral.sum(nx, ny, nw, nh) as f64;
        let sq_sum = integral.sq_sum(nx, ny, nw, nh) as f64;
        let nf = area * sq_sum - sum * sum;
        if nf <= 0.0 {
            return false;
        }
        let nf = nf.sqrt();
        // nf = area * stddev
        if area / nf >= 1.0 / MIN_WINDOW_STDDEV {
            return false;
        }
        let inv_nf = 1.0 / nf;

        for stage in &self.stages {
            let mut stage_sum = 0.0f64;
            for weak in &stage.weak {
                let mut idx = 0usize;
                loop {
                    let node = weak.nodes[idx];
                    let value = self.feature_value(integral, node.feature, x, y) * inv_nf;
                    let next = if value < node.threshold { node.left } else { node.right };
                    if next <= 0 {
                        stage_sum += weak.leaves[(-next) as usize];
                        break;
                    }
                    idx = next as usize;
                }
            }
            if stage_sum < stage.threshold - STAGE_THRESHOLD_EPS {
                return false;
            }
        }
        true
    }

    fn feature_value(&self, integral: &IntegralImage, feature: usize, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

fn parse_feature(
    index: usize,
    raw: &FeatureXml,
    win_w: u32,
    win_h: u32,
) -> Result<Feature, CascadeError> {
    if raw.tilted.as_deref().map(str::trim).is_some_and(|t| t != "0") {
        return Err(CascadeError::Unsupported(format!("feature {index} uses tilted rectangles")));
    }

    let rects = raw
        .rects
        .items
        .iter()
        .map(|text| {
            let parts: Vec<&str> = text.split_whitespace().collect();
            if parts.len() != 5 {
                return Err(CascadeError::Invalid(format!(
                    "feature {index}: rect needs 5 values, got {:?}",
                    text.trim()
                )));
            }
            let rect = WeightedRect {
                x: parse_num(parts[0], "rect x")?,
                y: parse_num(parts[1], "rect y")?,
                width: parse_num(parts[2], "rect width")?,
                height: parse_num(parts[3], "rect height")?,
                weight: parse_num(parts[4], "rect weight")?,
            };
            if rect.x + rect.width > win_w || rect.y + rect.height > win_h {
                return Err(CascadeError::Invalid(format!(
                    "feature {index}: rect exceeds {win_w}x{win_h} window"
                )));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::Invalid(format!("feature {index} has no rects")));
    }
    Ok(Feature { rects })
}

fn parse_stage(raw: &StageXml, num_features: usize) -> Result<Stage, CascadeError> {
    let threshold: f64 = parse_num(&raw.stage_threshold, "stageThreshold")?;
    let weak = raw
        .weak_classifiers
        .items
        .iter()
        .map(|w| parse_weak(w, num_features))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage { threshold, weak })
}

fn parse_weak(raw: &WeakXml, num_features: usize) -> Result<WeakClassifier, CascadeError> {
    let values: Vec<&str> = raw.internal_nodes.split_whitespace().collect();
    if values.is_empty() || values.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!(
            "internalNodes must hold groups of 4 values, got {}",
            values.len()
        )));
    }

    let nodes = values
        .chunks(4)
        .map(|c| {
            Ok(Node {
                left: parse_num(c[0], "node left")?,
                right: parse_num(c[1], "node right")?,
                feature: parse_num(c[2], "node feature")?,
                threshold: parse_num(c[3], "node threshold")?,
            })
        })
        .collect::<Result<Vec<_>, CascadeError>>()?;

    let leaves = raw
        .leaf_values
        .split_whitespace()
        .map(|v| parse_num(v, "leaf value"))
        .collect::<Result<Vec<f64>, _>>()?;

    for node in &nodes {
        if node.feature >= num_features {
            return Err(CascadeError::Invalid(format!(
                "node references feature {} of {num_features}",
                node.feature
            )));
        }
        for child in [node.left, node.right] {
            let ok = if child > 0 {
                (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !ok {
                return Err(CascadeError::Invalid(format!("dangling tree child {child}")));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

/// Summed-area tables for pixel values and squared pixel values.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn lookup(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::lookup(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::lookup(&self.sq_sum, self.stride, x, y, w, h)
    }
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles, average each cluster, and drop weak or nested clusters.
///
/// Clusters with `threshold` or fewer members are discarded. `threshold == 0`
/// returns the input unchanged.
pub fn group_rectangles(rects: &[Rect], threshold: usize, eps: f64) -> Vec<Rect> {
    if threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Class ids in order of first appearance.
    let mut class_of_root = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut classes = 0usize;
    for i in 0..n {
        let root = find_root(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = classes;
            classes += 1;
        }
        labels.push(class_of_root[root]);
    }

    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0usize; classes];
    for (rect, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += rect.x as u64;
        s[1] += rect.y as u64;
        s[2] += rect.width as u64;
        s[3] += rect.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| {
            let avg = |v: u64| (v as f64 / c as f64).round() as u32;
            Rect::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut out = Vec::new();
    for i in 0..classes {
        let n1 = counts[i];
        if n1 <= threshold {
            continue;
        }
        let r1 = averaged[i];
        let nested = (0..classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= threshold {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            out.push(r1);
        }
    }
    out
}
