use log::{debug, info};
use ndarray::{ArrayD, Axis, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::{Device, Extractor};
use crate::config::ModelConf;
use crate::error::{Error, Result};
use crate::feature::{FeatureArray, Prediction};
use crate::preprocess::ProcessedImage;

impl From<ort::Error> for Error {
    fn from(err: ort::Error) -> Self {
        Error::Inference(err.to_string())
    }
}

/// 基于 ONNX Runtime 的通用模型
///
/// 输入为 1 x C x H x W 的图片，所有输出去掉 batch 维度后原样返回
pub struct OnnxExtractor {
    session: Session,
    input_name: String,
}

impl OnnxExtractor {
    pub fn new(conf: &ModelConf, device: Device) -> Result<Self> {
        let weights = conf.weights.as_ref().ok_or_else(|| {
            Error::Config(format!("模型 `{}` 需要指定权重文件 weights", conf.name))
        })?;

        let mut builder = Session::builder()?.with_log_level(LogLevel::Error)?;
        if device != Device::Cpu {
            // CUDA 不可用时 ort 会自动回退到 CPU
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder.commit_from_file(weights).map_err(|e| {
            Error::Config(format!("无法加载模型 {}: {e}", weights.display()))
        })?;
        info!("已加载 ONNX 模型: {}", weights.display());

        let input_name = conf.param_str("input_name").unwrap_or("image").to_string();
        Ok(Self { session, input_name })
    }
}

impl Extractor for OnnxExtractor {
    fn extract(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        let batch = image.image.view().insert_axis(Axis(0));
        let batch = batch.as_standard_layout();
        let tensor = TensorRef::from_array_view(batch.view())?;

        let inputs = ort::inputs![self.input_name.as_str() => tensor];
        let outputs = self.session.run(inputs)?;

        let mut pred = Prediction::new();
        for (name, value) in outputs.iter() {
            let array = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                FeatureArray::F32(to_array(shape, data)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
                FeatureArray::I64(to_array(shape, data)?)
            } else {
                return Err(Error::InvalidPrediction(format!("输出 {name} 的类型不受支持")));
            };
            debug!("{}: {} {:?}", name, array.dtype(), array.shape());
            pred.insert(name.to_string(), array);
        }
        Ok(pred)
    }
}

/// 构造数组并去掉 batch 维度
fn to_array<T: Clone>(shape: &[i64], data: &[T]) -> Result<ArrayD<T>> {
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
    let array = ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())?;
    if array.ndim() == 0 {
        return Ok(array);
    }
    Ok(array.index_axis_move(Axis(0), 0))
}
