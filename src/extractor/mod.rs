mod dhash;
mod harris;
#[cfg(feature = "onnx")]
mod onnx;

use std::collections::BTreeMap;

use clap::ValueEnum;
pub use dhash::DHashExtractor;
pub use harris::HarrisExtractor;
use log::info;
#[cfg(feature = "onnx")]
pub use onnx::OnnxExtractor;

use crate::config::ModelConf;
use crate::error::{Error, Result};
use crate::feature::Prediction;
use crate::preprocess::ProcessedImage;

/// 特征提取模型
///
/// 每次调用处理一张图片，返回字段名到数组的映射。模型持有权重和设备上下文，
/// 在一次运行中只创建一次。
pub trait Extractor: Send {
    fn extract(&mut self, image: &ProcessedImage) -> Result<Prediction>;
}

/// 推理设备，仅在创建模型时决定一次
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    /// 有可用的加速设备时使用加速设备
    #[default]
    Auto,
    Cpu,
    Cuda,
}

pub type ExtractorFactory = Box<dyn Fn(&ModelConf, Device) -> Result<Box<dyn Extractor>> + Send + Sync>;

/// 模型名称到构造函数的注册表
pub struct ExtractorRegistry {
    factories: BTreeMap<String, ExtractorFactory>,
}

impl ExtractorRegistry {
    /// 创建一个空的注册表
    pub fn empty() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// 注册一个模型，同名模型会被覆盖
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&ModelConf, Device) -> Result<Box<dyn Extractor>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// 按配置中的模型名称创建模型
    pub fn create(&self, conf: &ModelConf, device: Device) -> Result<Box<dyn Extractor>> {
        let factory = self.factories.get(&conf.name).ok_or_else(|| Error::UnknownModel {
            name: conf.name.clone(),
            available: self.names().collect::<Vec<_>>().join(", "),
        })?;
        info!("加载模型 {} ({:?})", conf.name, device);
        factory(conf, device)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("harris", |conf, _| Ok(Box::new(HarrisExtractor::new(conf)?)));
        registry.register("dhash", |conf, _| Ok(Box::new(DHashExtractor::new(conf)?)));
        #[cfg(feature = "onnx")]
        for name in ["onnx", "superpoint", "d2net", "dir"] {
            registry.register(name, |conf, device| Ok(Box::new(OnnxExtractor::new(conf, device)?)));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl Extractor for Nothing {
        fn extract(&mut self, _image: &ProcessedImage) -> Result<Prediction> {
            Ok(Prediction::new())
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ExtractorRegistry::default();
        assert!(registry.contains("harris"));
        assert!(registry.contains("dhash"));
    }

    #[test]
    fn unknown_model() {
        let registry = ExtractorRegistry::default();
        match registry.create(&ModelConf::new("superglue"), Device::Cpu) {
            Err(Error::UnknownModel { name, available }) => {
                assert_eq!(name, "superglue");
                assert!(available.contains("harris"));
            }
            _ => panic!("expected UnknownModel"),
        }
    }

    #[test]
    fn custom_registration() {
        let mut registry = ExtractorRegistry::empty();
        registry.register("nothing", |_, _| Ok(Box::new(Nothing)));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["nothing"]);
        assert!(registry.create(&ModelConf::new("nothing"), Device::Auto).is_ok());
    }
}
