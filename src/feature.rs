use std::collections::BTreeMap;

use half::f16;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// 一张图片的模型输出，字段名 => 数组
pub type Prediction = BTreeMap<String, FeatureArray>;

/// 带类型信息的多维数组，对应特征库中的一个 dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureArray {
    F16(ArrayD<f16>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
}

macro_rules! impl_from_array {
    ($($ty: ty => $variant: ident),*) => {
        $(
            impl From<ArrayD<$ty>> for FeatureArray {
                fn from(array: ArrayD<$ty>) -> Self {
                    Self::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(f16 => F16, f32 => F32, f64 => F64, i32 => I32, i64 => I64, u8 => U8);

impl FeatureArray {
    /// numpy 风格的类型名
    pub fn dtype(&self) -> &'static str {
        match self {
            Self::F16(_) => "float16",
            Self::F32(_) => "float32",
            Self::F64(_) => "float64",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::U8(_) => "uint8",
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F16(a) => a.shape(),
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::I64(a) => a.shape(),
            Self::U8(a) => a.shape(),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F16(_) | Self::F32(_) | Self::F64(_))
    }

    /// 将 float32 转换为 float16，其余类型保持不变
    pub fn to_half(self) -> Self {
        match self {
            Self::F32(a) => Self::F16(a.mapv(f16::from_f32)),
            other => other,
        }
    }

    /// 转换为 float32 视图，用于导出和展示
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            Self::F16(a) => a.mapv(f16::to_f32),
            Self::F32(a) => a.clone(),
            Self::F64(a) => a.mapv(|v| v as f32),
            Self::I32(a) => a.mapv(|v| v as f32),
            Self::I64(a) => a.mapv(|v| v as f32),
            Self::U8(a) => a.mapv(f32::from),
        }
    }
}
