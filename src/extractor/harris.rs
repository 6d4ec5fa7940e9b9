use ndarray::{Array1, Array2, s};

use super::Extractor;
use crate::config::ModelConf;
use crate::error::{Error, Result};
use crate::feature::Prediction;
use crate::preprocess::ProcessedImage;

/// 描述子采样网格的边长
const PATCH_GRID: usize = 5;
/// 描述子采样步长
const PATCH_STRIDE: usize = 2;

/// Harris 角点 + 归一化图像块描述子
pub struct HarrisExtractor {
    /// Harris 响应公式中的经验常数
    k: f32,
    /// 相对于最大响应的阈值
    threshold: f32,
    nms_radius: usize,
    max_keypoints: usize,
    /// 忽略的图像边缘宽度
    border: usize,
}

impl HarrisExtractor {
    pub fn new(conf: &ModelConf) -> Result<Self> {
        let threshold = conf.param_f64("threshold").unwrap_or(0.01) as f32;
        if !(0. ..1.).contains(&threshold) {
            return Err(Error::Config(format!("harris threshold 需在 [0, 1) 内: {threshold}")));
        }
        let half_patch = PATCH_GRID / 2 * PATCH_STRIDE;
        Ok(Self {
            k: conf.param_f64("k").unwrap_or(0.04) as f32,
            threshold,
            nms_radius: conf.nms_radius.unwrap_or(4) as usize,
            max_keypoints: conf.max_keypoints.unwrap_or(1024),
            border: (conf.param_u64("border").unwrap_or(4) as usize).max(half_patch),
        })
    }

    /// 计算 Harris 响应图
    fn response(&self, gray: &Array2<f32>) -> Array2<f32> {
        let (h, w) = gray.dim();
        let mut ixx = Array2::<f32>::zeros((h, w));
        let mut iyy = Array2::<f32>::zeros((h, w));
        let mut ixy = Array2::<f32>::zeros((h, w));
        // Sobel 梯度
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let p = |dy: usize, dx: usize| gray[[y + dy - 1, x + dx - 1]];
                let gx = (p(0, 2) + 2. * p(1, 2) + p(2, 2)) - (p(0, 0) + 2. * p(1, 0) + p(2, 0));
                let gy = (p(2, 0) + 2. * p(2, 1) + p(2, 2)) - (p(0, 0) + 2. * p(0, 1) + p(0, 2));
                ixx[[y, x]] = gx * gx;
                iyy[[y, x]] = gy * gy;
                ixy[[y, x]] = gx * gy;
            }
        }

        let mut response = Array2::<f32>::zeros((h, w));
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let window = s![y - 1..=y + 1, x - 1..=x + 1];
                let a = ixx.slice(window).sum();
                let b = iyy.slice(window).sum();
                let c = ixy.slice(window).sum();
                let trace = a + b;
                response[[y, x]] = a * b - c * c - self.k * trace * trace;
            }
        }
        response
    }

    /// 非极大值抑制，返回按响应从大到小排序的 (x, y, score)
    fn select(&self, response: &Array2<f32>) -> Vec<(usize, usize, f32)> {
        let (h, w) = response.dim();
        let max = response.iter().copied().fold(0f32, f32::max);
        if max <= 0. || h <= 2 * self.border || w <= 2 * self.border {
            return vec![];
        }
        let min_score = max * self.threshold;
        let r = self.nms_radius;

        let mut points = vec![];
        for y in self.border..h - self.border {
            for x in self.border..w - self.border {
                let v = response[[y, x]];
                if v <= min_score {
                    continue;
                }
                let window = response.slice(s![
                    y.saturating_sub(r)..(y + r + 1).min(h),
                    x.saturating_sub(r)..(x + r + 1).min(w)
                ]);
                if window.iter().all(|&u| u <= v) {
                    points.push((x, y, v));
                }
            }
        }
        // 响应相同时按坐标排序，保证结果稳定
        points.sort_by(|a, b| b.2.total_cmp(&a.2).then((a.1, a.0).cmp(&(b.1, b.0))));
        points.truncate(self.max_keypoints);
        points
    }

    /// 以特征点为中心的去均值、L2 归一化图像块
    fn describe(gray: &Array2<f32>, x: usize, y: usize) -> Array1<f32> {
        let half = PATCH_GRID / 2 * PATCH_STRIDE;
        let mut patch = Array1::<f32>::zeros(PATCH_GRID * PATCH_GRID);
        for i in 0..PATCH_GRID {
            for j in 0..PATCH_GRID {
                patch[i * PATCH_GRID + j] =
                    gray[[y + i * PATCH_STRIDE - half, x + j * PATCH_STRIDE - half]];
            }
        }
        let mean = patch.mean().unwrap_or(0.);
        patch -= mean;
        let norm = patch.dot(&patch).sqrt();
        if norm > f32::EPSILON {
            patch /= norm;
        }
        patch
    }
}

impl Extractor for HarrisExtractor {
    fn extract(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        let gray = image.gray();
        let points = self.select(&self.response(&gray));

        let n = points.len();
        let mut keypoints = Array2::<f32>::zeros((n, 2));
        let mut scores = Array1::<f32>::zeros(n);
        let mut descriptors = Array2::<f32>::zeros((PATCH_GRID * PATCH_GRID, n));
        for (i, &(x, y, score)) in points.iter().enumerate() {
            keypoints[[i, 0]] = x as f32;
            keypoints[[i, 1]] = y as f32;
            scores[i] = score;
            descriptors.column_mut(i).assign(&Self::describe(&gray, x, y));
        }

        let mut pred = Prediction::new();
        pred.insert("keypoints".into(), keypoints.into_dyn().into());
        pred.insert("scores".into(), scores.into_dyn().into());
        pred.insert("descriptors".into(), descriptors.into_dyn().into());
        Ok(pred)
    }
}
