use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use heed::types::{DecodeIgnore, SerdeBincode, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions, WithTls};
use log::debug;

use crate::error::{Error, Result};
use crate::feature::Prediction;

/// 特征库文件的扩展名
pub const STORE_EXTENSION: &str = "mdb";

const GROUPS_DB: &str = "groups";

type GroupsDb = Database<Str, SerdeBincode<Prediction>>;

/// 以图片名称为键的特征库，每张图片对应一组命名数组
///
/// 底层为单文件 lmdb，每写入一张图片提交一次事务，进程中断后已提交的记录仍然有效
pub struct FeatureStore {
    path: PathBuf,
    env: Env<WithTls>,
    groups: GroupsDb,
}

impl FeatureStore {
    fn open_env(path: &Path) -> Result<Env<WithTls>> {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 38) // 256GiB 的稀疏映射，实际占用随数据增长
                .max_dbs(1)
                .flags(EnvFlags::NO_SUB_DIR)
                .open(path)?
        };
        Ok(env)
    }

    /// 特征库文件是否存在
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    /// 读取已有的图片名称，文件不存在时返回空集合
    ///
    /// 读取完成后立即关闭文件，不影响随后以写模式打开
    pub fn list_keys(path: impl AsRef<Path>) -> Result<HashSet<String>> {
        let path = path.as_ref();
        if !Self::exists(path) {
            return Ok(HashSet::new());
        }
        let env = Self::open_env(path)?;
        let rtxn = env.read_txn()?;
        let Some(groups) = env.open_database::<Str, DecodeIgnore>(&rtxn, Some(GROUPS_DB))? else {
            return Ok(HashSet::new());
        };
        let mut keys = HashSet::new();
        for item in groups.iter(&rtxn)? {
            let (key, ()) = item?;
            keys.insert(key.to_string());
        }
        debug!("{} 中已有 {} 条记录", path.display(), keys.len());
        Ok(keys)
    }

    /// 以读写模式打开特征库，不存在时创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let env = Self::open_env(&path)?;
        let mut wtxn = env.write_txn()?;
        let groups = env.create_database::<Str, SerdeBincode<Prediction>>(&mut wtxn, Some(GROUPS_DB))?;
        wtxn.commit()?;
        Ok(Self { path, env, groups })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 全部图片名称，按字典序排列
    pub fn keys(&self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        let groups = self.groups.remap_data_type::<DecodeIgnore>();
        let mut keys = vec![];
        for item in groups.iter(&rtxn)? {
            let (key, ()) = item?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.groups.remap_data_type::<DecodeIgnore>().get(&rtxn, name)?.is_some())
    }

    pub fn get(&self, name: &str) -> Result<Option<Prediction>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.groups.get(&rtxn, name)?)
    }

    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.groups.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 写入一张图片的特征并立即提交，已存在同名记录时返回错误
    pub fn append(&mut self, name: &str, pred: &Prediction) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        if self.groups.remap_data_type::<DecodeIgnore>().get(&wtxn, name)?.is_some() {
            return Err(Error::DuplicateKey(name.to_string()));
        }
        self.groups.put(&mut wtxn, name, pred)?;
        wtxn.commit()?;
        Ok(())
    }
}

/// 特征库的默认路径 `<export_dir>/<output>.mdb`
pub fn default_path(export_dir: &Path, output: &str) -> PathBuf {
    export_dir.join(format!("{output}.{STORE_EXTENSION}"))
}
