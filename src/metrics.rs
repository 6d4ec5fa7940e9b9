use std::sync::LazyLock;

use log::error;
use prometheus::*;

static METRIC_EXTRACT_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_feat_extract_image_count",
        "count of the images whose features were extracted",
        &["model"]
    )
    .unwrap()
});

static METRIC_SKIP_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_feat_skip_image_count",
        "count of the images skipped because they already exist in the store",
        &["model"]
    )
    .unwrap()
});

static METRIC_EXTRACT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_feat_extract_duration",
        "duration of the per-image extraction in seconds",
        &["model", "size"]
    )
    .unwrap()
});

/// 增加已提取图片计数
pub fn inc_extract_count(model: &str) {
    METRIC_EXTRACT_IMAGE_COUNT.with_label_values(&[model]).inc();
}

pub fn inc_skip_count(model: &str, n: usize) {
    METRIC_SKIP_IMAGE_COUNT.with_label_values(&[model]).inc_by(n as u64);
}

/// 记录单张图片的推理耗时，按预处理后的尺寸分组
pub fn observe_extract_duration(model: &str, size: (u32, u32), duration: f32) {
    METRIC_EXTRACT_DURATION
        .with_label_values(&[model, to_fixed_size(size)])
        .observe(duration as f64);
}

/// 将图像面积范围调整到几个固定值
fn to_fixed_size((width, height): (u32, u32)) -> &'static str {
    let area = width as u64 * height as u64;
    if area <= 256 * 256 {
        "256"
    } else if area <= 512 * 512 {
        "512"
    } else if area <= 1024 * 1024 {
        "1024"
    } else if area <= 1600 * 1600 {
        "1600"
    } else {
        "1600+"
    }
}

/// Pushgateway 推送配置
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub instance: String,
    /// username, password
    pub auth: Option<(String, String)>,
}

/// 推送当前进程的全部指标，失败时只记录日志
pub fn push(conf: PushConfig) {
    let metric_families = prometheus::gather();
    let r = prometheus::push_metrics(
        "imfeat",
        labels! {
            "instance".to_string() => conf.instance.clone(),
        },
        &conf.url,
        metric_families,
        conf.auth.map(|(username, password)| BasicAuthentication { username, password }),
    );
    if let Err(e) = r {
        error!("推送指标失败: {e}");
    }
}
