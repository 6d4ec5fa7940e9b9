use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractConf, Opts, PRESETS};

#[derive(Parser, Debug, Clone)]
pub struct PresetsCommand {
    /// 只打印指定预设的完整配置
    pub name: Option<String>,
}

impl SubCommandExtend for PresetsCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        match &self.name {
            Some(name) => {
                let conf = ExtractConf::preset(name)
                    .ok_or_else(|| anyhow::anyhow!("未知的预设配置: {name}"))?;
                println!("{}", serde_json::to_string_pretty(&conf)?);
            }
            None => {
                for (name, conf) in PRESETS.iter() {
                    println!("{name}\t{}\t{}", conf.model.name, conf.output);
                }
            }
        }
        Ok(())
    }
}
