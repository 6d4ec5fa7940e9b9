use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;
use tokio::task::spawn_blocking;

use crate::cli::{SubCommandExtend, open_existing};
use crate::config::Opts;
use crate::feature::FeatureArray;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 特征库路径
    pub store: PathBuf,
    /// 图片名称
    pub name: String,
    /// 字段名称，如 keypoints、descriptors
    pub field: String,
    /// 输出文件，默认为 `<field>.npy`
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let cmd = self.clone();
        spawn_blocking(move || -> anyhow::Result<()> {
            let mut pred = open_existing(&cmd.store)?
                .get(&cmd.name)?
                .ok_or_else(|| anyhow!("特征库中没有图片: {}", cmd.name))?;
            let array = pred
                .remove(&cmd.field)
                .ok_or_else(|| anyhow!("图片 {} 没有字段 {}", cmd.name, cmd.field))?;
            let output = cmd.output.unwrap_or_else(|| PathBuf::from(format!("{}.npy", cmd.field)));

            // npy 不一定支持 float16，统一导出为 float32
            match array {
                FeatureArray::F16(a) => write_npy(&output, &a.mapv(|v| v.to_f32()))?,
                FeatureArray::F32(a) => write_npy(&output, &a)?,
                FeatureArray::F64(a) => write_npy(&output, &a)?,
                FeatureArray::I32(a) => write_npy(&output, &a)?,
                FeatureArray::I64(a) => write_npy(&output, &a)?,
                FeatureArray::U8(a) => write_npy(&output, &a)?,
            }
            info!("导出成功: {}", output.display());
            Ok(())
        })
        .await?
    }
}
