use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use log::info;
use tokio::task::spawn_blocking;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractConf, Opts};
use crate::dataset::ImageList;
use crate::extractor::Device;
use crate::metrics::{self, PushConfig};
use crate::pipeline::PipelineBuilder;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    /// 图片所在目录
    #[arg(long, value_name = "DIR")]
    pub image_dir: PathBuf,
    /// 特征库输出目录，文件名由配置中的 output 决定
    #[arg(long, value_name = "DIR", required_unless_present = "feature_path")]
    pub export_dir: Option<PathBuf>,
    /// 预设配置名称，可通过 `presets` 子命令查看
    #[arg(long, default_value = "superpoint_aachen")]
    pub conf: String,
    /// 从 JSON 文件读取配置，优先于 --conf
    #[arg(long, value_name = "FILE")]
    pub conf_file: Option<PathBuf>,
    /// 以 float16 保存浮点数据
    #[arg(long)]
    pub as_half: bool,
    /// 图片列表文件，每行一个相对路径，文件名支持通配符
    #[arg(long, value_name = "FILE")]
    pub image_list: Option<PathBuf>,
    /// 直接指定特征库路径
    #[arg(long, value_name = "FILE")]
    pub feature_path: Option<PathBuf>,
    /// 推理设备
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,
    /// 覆盖配置中的模型权重路径
    #[arg(long, value_name = "FILE")]
    pub weights: Option<PathBuf>,
    /// 覆盖配置中的 resize_max
    #[arg(long)]
    pub resize_max: Option<u32>,
    /// 强制缩放到 resize_max
    #[arg(long)]
    pub resize_force: bool,
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
    /// prometheus 主动推送地址，提取结束后推送一次
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl ExtractCommand {
    /// 读取配置并应用命令行覆盖项
    pub fn extract_conf(&self) -> anyhow::Result<ExtractConf> {
        let mut conf = match &self.conf_file {
            Some(path) => ExtractConf::from_json_file(path)
                .with_context(|| format!("无法读取配置文件 {}", path.display()))?,
            None => ExtractConf::preset(&self.conf)
                .ok_or_else(|| anyhow!("未知的预设配置: {}", self.conf))?,
        };
        if let Some(weights) = &self.weights {
            conf.model.weights = Some(weights.clone());
        }
        if let Some(resize_max) = self.resize_max {
            conf.preprocessing.resize_max = Some(resize_max);
        }
        if self.resize_force {
            conf.preprocessing.resize_force = true;
        }
        conf.validate()?;
        Ok(conf)
    }

    fn push_config(&self) -> anyhow::Result<Option<PushConfig>> {
        let Some(url) = self.prometheus_push.clone() else {
            return Ok(None);
        };
        let instance = self.prometheus_instance.clone().unwrap_or_else(|| "imfeat".to_string());
        let auth = match &self.prometheus_auth {
            Some(s) => {
                let (username, password) =
                    s.split_once(':').ok_or_else(|| anyhow!("认证信息格式应为 username:password"))?;
                Some((username.to_string(), password.to_string()))
            }
            None => None,
        };
        Ok(Some(PushConfig { url, instance, auth }))
    }
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let conf = self.extract_conf()?;
        let push = self.push_config()?;

        let mut pipeline = PipelineBuilder::new(conf, &self.image_dir)
            .as_half(self.as_half)
            .device(self.device)
            .progress(!self.no_progress);
        if let Some(dir) = &self.export_dir {
            pipeline = pipeline.export_dir(dir);
        }
        if let Some(path) = &self.feature_path {
            pipeline = pipeline.feature_path(path);
        }
        if let Some(list) = &self.image_list {
            pipeline = pipeline.image_list(ImageList::from_path(list));
        }

        let report = pipeline.run().await?;
        info!(
            "共 {} 张图片，新增 {} 张，跳过 {} 张",
            report.total, report.extracted, report.skipped
        );
        println!("{}", report.feature_path.display());

        if let Some(push) = push {
            spawn_blocking(move || metrics::push(push)).await?;
        }
        Ok(())
    }
}
