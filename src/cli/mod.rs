mod export;
mod extract;
mod list;
mod presets;
mod show;

pub use export::*;
pub use extract::*;
pub use list::*;
pub use presets::*;
pub use show::*;

use std::path::Path;

use anyhow::bail;

use crate::config::Opts;
use crate::store::FeatureStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 以只读用途打开已有的特征库，避免误建空文件
fn open_existing(path: &Path) -> anyhow::Result<FeatureStore> {
    if !FeatureStore::exists(path) {
        bail!("特征库不存在: {}", path.display());
    }
    Ok(FeatureStore::open(path)?)
}
