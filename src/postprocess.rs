use ndarray::{ArrayD, Axis, arr1};

use crate::error::{Error, Result};
use crate::feature::{FeatureArray, Prediction};

/// 模型输出中需要按图片尺寸还原的字段
pub const KEYPOINTS: &str = "keypoints";
/// 原图尺寸 (width, height)
pub const IMAGE_SIZE: &str = "image_size";

/// 将模型输出还原到原图坐标系，并按需降低浮点精度
///
/// `processed_size` 和 `original_size` 均为 (width, height)
pub fn postprocess(
    mut pred: Prediction,
    processed_size: (u32, u32),
    original_size: (u32, u32),
    as_half: bool,
) -> Result<Prediction> {
    pred.insert(
        IMAGE_SIZE.to_string(),
        arr1(&[original_size.0 as i64, original_size.1 as i64]).into_dyn().into(),
    );

    if let Some(kps) = pred.remove(KEYPOINTS) {
        let kps = if processed_size == original_size {
            check_keypoints(&kps)?;
            promote_keypoints(kps)
        } else {
            let scale = [
                (original_size.0 as f64 / processed_size.0 as f64) as f32,
                (original_size.1 as f64 / processed_size.1 as f64) as f32,
            ];
            rescale_keypoints(kps, scale)?
        };
        pred.insert(KEYPOINTS.to_string(), kps);
    }

    if as_half {
        pred = pred.into_iter().map(|(k, v)| (k, v.to_half())).collect();
    }
    Ok(pred)
}

fn check_keypoints(kps: &FeatureArray) -> Result<()> {
    match kps.shape().last() {
        Some(2) => Ok(()),
        _ => Err(Error::InvalidPrediction(format!(
            "keypoints 的最后一维长度需为 2，实际形状为 {:?}",
            kps.shape()
        ))),
    }
}

/// 整数和 f16 坐标统一转为 f32，f32 和 f64 保持不变
fn promote_keypoints(kps: FeatureArray) -> FeatureArray {
    match kps {
        FeatureArray::F32(_) | FeatureArray::F64(_) => kps,
        other => FeatureArray::F32(other.to_f32()),
    }
}

/// 像素中心位于 (i + 0.5)，缩放后需要先平移再还原
fn rescale_keypoints(kps: FeatureArray, scale: [f32; 2]) -> Result<FeatureArray> {
    check_keypoints(&kps)?;
    let rescaled = match kps {
        FeatureArray::F64(a) => {
            let scale = scale.map(f64::from);
            FeatureArray::F64(apply(a, |v, i| (v + 0.5) * scale[i] - 0.5))
        }
        FeatureArray::F32(a) => FeatureArray::F32(apply(a, |v, i| (v + 0.5) * scale[i] - 0.5)),
        other => {
            let a = other.to_f32();
            FeatureArray::F32(apply(a, |v, i| (v + 0.5) * scale[i] - 0.5))
        }
    };
    Ok(rescaled)
}

/// 对最后一维为 (x, y) 的数组逐元素变换
fn apply<T: Copy>(mut a: ArrayD<T>, f: impl Fn(T, usize) -> T) -> ArrayD<T> {
    let last = Axis(a.ndim() - 1);
    for mut lane in a.lanes_mut(last) {
        for (i, v) in lane.iter_mut().enumerate() {
            *v = f(*v, i);
        }
    }
    a
}
