use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{debug, info};
use tokio::sync::mpsc::{Sender, channel};
use tokio::task::{JoinHandle, spawn_blocking};

use crate::config::ExtractConf;
use crate::dataset::{ImageDataset, ImageList};
use crate::error::{Error, Result};
use crate::extractor::{Device, Extractor, ExtractorRegistry};
use crate::metrics;
use crate::postprocess::postprocess;
use crate::preprocess::ProcessedImage;
use crate::store::{FeatureStore, default_path};
use crate::utils::pb_style;

/// 一次提取的统计结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    /// 实际写入的特征库路径
    pub feature_path: PathBuf,
    /// 需要处理的图片总数
    pub total: usize,
    /// 本次新提取的图片数
    pub extracted: usize,
    /// 特征库中已存在而跳过的图片数
    pub skipped: usize,
}

pub struct PipelineBuilder {
    conf: ExtractConf,
    image_dir: PathBuf,
    export_dir: Option<PathBuf>,
    feature_path: Option<PathBuf>,
    image_list: Option<ImageList>,
    as_half: bool,
    device: Device,
    registry: Arc<ExtractorRegistry>,
    progress: bool,
}

impl PipelineBuilder {
    pub fn new(conf: ExtractConf, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf,
            image_dir: image_dir.into(),
            export_dir: None,
            feature_path: None,
            image_list: None,
            as_half: false,
            device: Device::default(),
            registry: Arc::new(ExtractorRegistry::default()),
            progress: false,
        }
    }

    /// 输出目录，特征库保存为 `<export_dir>/<output>.mdb`
    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// 直接指定特征库路径，优先于 export_dir
    pub fn feature_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.feature_path = Some(path.into());
        self
    }

    pub fn image_list(mut self, list: ImageList) -> Self {
        self.image_list = Some(list);
        self
    }

    /// 以 float16 保存浮点数据
    pub fn as_half(mut self, as_half: bool) -> Self {
        self.as_half = as_half;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn registry(mut self, registry: Arc<ExtractorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn resolve_feature_path(&self) -> Result<PathBuf> {
        match (&self.feature_path, &self.export_dir) {
            (Some(path), _) => Ok(path.clone()),
            (None, Some(dir)) => Ok(default_path(dir, &self.conf.output)),
            (None, None) => Err(Error::Config("需要指定 export_dir 或 feature_path".into())),
        }
    }

    pub async fn run(self) -> Result<ExtractionReport> {
        self.conf.validate()?;
        let feature_path = self.resolve_feature_path()?;
        info!("特征提取配置: {}", serde_json::to_string(&self.conf)?);

        // 扫描图片并读取已有记录
        let (dataset, skip) = spawn_blocking({
            let image_dir = self.image_dir.clone();
            let pre = self.conf.preprocessing.clone();
            let list = self.image_list.clone();
            let feature_path = feature_path.clone();
            move || -> Result<(ImageDataset, HashSet<String>)> {
                let dataset = ImageDataset::new(image_dir, pre, list.as_ref())?;
                let skip = FeatureStore::list_keys(&feature_path)?;
                Ok((dataset, skip))
            }
        })
        .await??;

        let total = dataset.len();
        let todo = dataset
            .names()
            .iter()
            .filter(|name| !skip.contains(*name))
            .cloned()
            .collect::<Vec<_>>();
        let skipped = total - todo.len();
        let model = self.conf.model.name.clone();
        metrics::inc_skip_count(&model, skipped);

        if dataset.is_empty() {
            info!("图片列表为空，无需提取");
            return Ok(ExtractionReport { feature_path, total, extracted: 0, skipped });
        }
        if todo.is_empty() {
            info!("全部 {} 张图片已存在于 {}，跳过", total, feature_path.display());
            return Ok(ExtractionReport { feature_path, total, extracted: 0, skipped });
        }
        info!("共 {} 张图片，已存在 {} 张，待提取 {} 张", total, skipped, todo.len());

        // 模型只在确实需要推理时加载
        let (extractor, store) = spawn_blocking({
            let registry = self.registry.clone();
            let model_conf = self.conf.model.clone();
            let device = self.device;
            let feature_path = feature_path.clone();
            move || -> Result<(Box<dyn Extractor>, FeatureStore)> {
                let extractor = registry.create(&model_conf, device)?;
                let store = FeatureStore::open(&feature_path)?;
                Ok((extractor, store))
            }
        })
        .await??;

        let pb = if self.progress {
            ProgressBar::new(todo.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        // 预读下一张图片，与当前图片的推理重叠
        let (tx, mut rx) = channel(1);
        let loader = task_load(Arc::new(dataset), todo, tx);

        let mut worker = Worker { extractor, store, as_half: self.as_half, model };
        let mut extracted = 0;
        while let Some(image) = rx.recv().await {
            let image = image?;
            pb.set_message(image.name.clone());
            worker = spawn_blocking(move || -> Result<Worker> {
                worker.process(image)?;
                Ok(worker)
            })
            .await??;
            extracted += 1;
            pb.inc(1);
        }
        loader.await?;
        pb.finish_and_clear();

        info!("提取完成，新增 {} 张图片: {}", extracted, feature_path.display());
        Ok(ExtractionReport { feature_path, total, extracted, skipped })
    }
}

/// 按顺序读取并预处理图片，遇到错误时发送错误并停止
fn task_load(
    dataset: Arc<ImageDataset>,
    names: Vec<String>,
    tx: Sender<Result<ProcessedImage>>,
) -> JoinHandle<()> {
    spawn_blocking(move || {
        for name in names {
            let image = dataset.load(&name);
            let failed = image.is_err();
            // 接收端已关闭，说明推理出错
            if tx.blocking_send(image).is_err() || failed {
                break;
            }
        }
    })
}

/// 推理、后处理、写入，在阻塞线程池中执行
struct Worker {
    extractor: Box<dyn Extractor>,
    store: FeatureStore,
    as_half: bool,
    model: String,
}

impl Worker {
    fn process(&mut self, image: ProcessedImage) -> Result<()> {
        let start = Instant::now();
        let pred = self.extractor.extract(&image)?;
        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_extract_duration(&self.model, image.size(), elapsed);

        let pred = postprocess(pred, image.size(), image.original_size, self.as_half)?;
        debug!(
            "{}: {:?} -> {:?}, {} 个字段, {:.3}s",
            image.name,
            image.original_size,
            image.size(),
            pred.len(),
            elapsed
        );
        self.store.append(&image.name, &pred)?;
        metrics::inc_extract_count(&self.model);
        Ok(())
    }
}
