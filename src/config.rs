use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::*;
use crate::error::{Error, Result};

/// 默认扫描的图片文件名模式
pub const DEFAULT_GLOBS: &[&str] = &["*.jpg", "*.png", "*.jpeg", "*.JPG", "*.PNG"];

/// 图片预处理配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PreprocessConf {
    /// 扫描目录时使用的文件名模式
    pub globs: Vec<String>,
    /// 是否以灰度图读取
    pub grayscale: bool,
    /// 图片最长边的最大尺寸
    pub resize_max: Option<u32>,
    /// 即使图片小于 resize_max 也强制缩放
    pub resize_force: bool,
}

impl Default for PreprocessConf {
    fn default() -> Self {
        Self {
            globs: DEFAULT_GLOBS.iter().map(|s| s.to_string()).collect(),
            grayscale: false,
            resize_max: None,
            resize_force: false,
        }
    }
}

impl PreprocessConf {
    pub fn validate(&self) -> Result<()> {
        if self.resize_max == Some(0) {
            return Err(Error::Config("resize_max 必须为正整数".into()));
        }
        if self.globs.is_empty() {
            return Err(Error::Config("globs 不能为空".into()));
        }
        for g in &self.globs {
            glob::Pattern::new(g)
                .map_err(|e| Error::Config(format!("无效的文件名模式 {g}: {e}")))?;
        }
        Ok(())
    }
}

/// 模型配置，除通用字段外的参数由具体模型自行解释
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ModelConf {
    /// 模型名称，用于在注册表中查找实现
    pub name: String,
    /// 权重文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<PathBuf>,
    /// 最多保留的特征点数量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_keypoints: Option<usize>,
    /// 非极大值抑制半径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nms_radius: Option<u32>,
    /// 模型特有的其他参数
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelConf {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(Value::as_f64)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// 一次特征提取的完整配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtractConf {
    /// 输出特征库的文件名（不含扩展名）
    pub output: String,
    pub model: ModelConf,
    #[serde(default)]
    pub preprocessing: PreprocessConf,
}

impl ExtractConf {
    /// 按名称获取预设配置
    pub fn preset(name: &str) -> Option<Self> {
        PRESETS.get(name).cloned()
    }

    /// 从 JSON 文件加载配置，未填写的预处理字段使用默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output.is_empty() {
            return Err(Error::Config("output 不能为空".into()));
        }
        if self.model.name.is_empty() {
            return Err(Error::Config("model.name 不能为空".into()));
        }
        self.preprocessing.validate()
    }
}

fn preprocessing(grayscale: bool, resize_max: Option<u32>, resize_force: bool) -> PreprocessConf {
    PreprocessConf { grayscale, resize_max, resize_force, ..Default::default() }
}

fn superpoint(output: &str, nms_radius: u32, pre: PreprocessConf) -> ExtractConf {
    ExtractConf {
        output: output.to_string(),
        model: ModelConf {
            nms_radius: Some(nms_radius),
            max_keypoints: Some(4096),
            ..ModelConf::new("superpoint")
        },
        preprocessing: pre,
    }
}

/// 可在命令行中直接按名称选择的预设配置
pub static PRESETS: LazyLock<BTreeMap<&'static str, ExtractConf>> = LazyLock::new(|| {
    let mut m = BTreeMap::new();
    m.insert(
        "superpoint_aachen",
        superpoint("feats-superpoint-n4096-r1024", 3, preprocessing(true, Some(1024), false)),
    );
    // 即使原图更小也缩放到 1600，图片质量较好时可以提升特征点定位精度
    m.insert(
        "superpoint_max",
        superpoint("feats-superpoint-n4096-rmax1600", 3, preprocessing(true, Some(1600), true)),
    );
    m.insert(
        "superpoint_inloc",
        superpoint("feats-superpoint-n4096-r1600", 4, preprocessing(true, Some(1600), false)),
    );
    m.insert(
        "d2net-ss",
        ExtractConf {
            output: "feats-d2net-ss".into(),
            model: ModelConf::new("d2net").with("multiscale", false),
            preprocessing: preprocessing(false, Some(1600), false),
        },
    );
    m.insert(
        "dir",
        ExtractConf {
            output: "global-feats-dir".into(),
            model: ModelConf::new("dir"),
            preprocessing: preprocessing(false, None, false),
        },
    );
    m.insert(
        "harris_r1024",
        ExtractConf {
            output: "feats-harris-n1024-r1024".into(),
            model: ModelConf {
                nms_radius: Some(4),
                max_keypoints: Some(1024),
                ..ModelConf::new("harris")
            },
            preprocessing: preprocessing(true, Some(1024), false),
        },
    );
    m.insert(
        "harris_max",
        ExtractConf {
            output: "feats-harris-n2048-rmax1600".into(),
            model: ModelConf {
                nms_radius: Some(4),
                max_keypoints: Some(2048),
                ..ModelConf::new("harris")
            },
            preprocessing: preprocessing(true, Some(1600), true),
        },
    );
    m.insert(
        "dhash",
        ExtractConf {
            output: "global-feats-dhash".into(),
            model: ModelConf::new("dhash").with("hash_size", 8),
            preprocessing: preprocessing(true, None, false),
        },
    );
    m
});

#[derive(Parser, Debug, Clone)]
#[command(name = "imfeat", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取目录中图片的特征并写入特征库
    Extract(ExtractCommand),
    /// 列出特征库中已有的图片
    List(ListCommand),
    /// 查看特征库中某张图片的全部数据
    Show(ShowCommand),
    /// 将某个数据导出为 npy 文件
    Export(ExportCommand),
    /// 列出所有预设配置
    Presets(PresetsCommand),
}
