use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tokio::task::spawn_blocking;

use crate::cli::{SubCommandExtend, open_existing};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 特征库路径
    pub store: PathBuf,
    /// 图片名称
    pub name: String,
    /// 同时打印数组内容
    #[arg(long)]
    pub values: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let path = self.store.clone();
        let name = self.name.clone();
        let pred = spawn_blocking(move || -> anyhow::Result<_> {
            open_existing(&path)?.get(&name)?.ok_or_else(|| anyhow!("特征库中没有图片: {name}"))
        })
        .await??;

        for (field, array) in &pred {
            println!("{field}\t{}\t{:?}", array.dtype(), array.shape());
            if self.values {
                println!("{}", array.to_f32());
            }
        }
        Ok(())
    }
}
