use std::path::PathBuf;

use thiserror::Error;

/// 特征提取过程中的错误
#[derive(Error, Debug)]
pub enum Error {
    /// 图片目录中没有任何匹配的图片
    #[error("未在目录中找到任何图片: {}", root.display())]
    EmptyDataset { root: PathBuf },

    /// 显式指定的图片不存在
    #[error("图片 {name} 不存在于目录: {}", root.display())]
    MissingImage { name: String, root: PathBuf },

    /// 无法识别的图片列表输入
    #[error("无效的输入: {0}")]
    InvalidInput(String),

    /// 特征库中已存在同名记录
    #[error("特征库中已存在记录: {0}")]
    DuplicateKey(String),

    /// 未注册的模型名称
    #[error("未知的模型 `{name}`，可用模型: {available}")]
    UnknownModel { name: String, available: String },

    #[error("配置错误: {0}")]
    Config(String),

    /// 模型输出不符合约定
    #[error("模型输出无效: {0}")]
    InvalidPrediction(String),

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("图片解码失败: {}: {source}", path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("特征库错误: {0}")]
    Store(#[from] heed::Error),

    #[error("序列化错误: {0}")]
    Encode(#[from] bincode::Error),

    #[error("数组形状错误: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("后台任务失败: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
