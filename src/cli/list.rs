use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::task::spawn_blocking;

use crate::cli::{SubCommandExtend, open_existing};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 特征库路径
    pub store: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let path = self.store.clone();
        let keys = spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            Ok(open_existing(&path)?.keys()?)
        })
        .await??;

        match self.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&keys)?)
            }
            OutputFormat::Table => {
                for key in &keys {
                    println!("{key}");
                }
            }
        }
        Ok(())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
