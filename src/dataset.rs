use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::PreprocessConf;
use crate::error::{Error, Result};
use crate::preprocess::{ProcessedImage, preprocess, read_image};
use crate::utils::to_posix;

/// 显式指定的图片列表
#[derive(Debug, Clone, PartialEq)]
pub enum ImageList {
    /// 列表文件，每行一个相对路径，文件名部分支持通配符
    File(PathBuf),
    /// 内存中的图片名称
    Names(Vec<String>),
}

impl ImageList {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }
}

/// 递归扫描 root，返回按路径排序并去重后的图片名称
pub fn discover(root: &Path, globs: &[String]) -> Result<Vec<String>> {
    let patterns = globs
        .iter()
        .map(|g| Pattern::new(g).map_err(|e| Error::Config(format!("无效的文件名模式 {g}: {e}"))))
        .collect::<Result<Vec<_>>>()?;

    let mut paths = BTreeSet::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if patterns.iter().any(|p| p.matches(&file_name)) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                paths.insert(rel.to_path_buf());
            }
        }
    }

    if paths.is_empty() {
        return Err(Error::EmptyDataset { root: root.to_path_buf() });
    }

    let names = paths
        .iter()
        .map(|p| to_posix(p).ok_or_else(|| Error::InvalidInput(p.display().to_string())))
        .collect::<Result<Vec<_>>>()?;
    info!("在 {} 中找到 {} 张图片", root.display(), names.len());
    Ok(names)
}

/// 解析单个图片列表文件
///
/// 忽略空行和 `#` 开头的注释，每行只取第一列，其余列（如相机内参）忽略
pub fn parse_image_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let names = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!("从 {} 读取到 {} 个图片名称", path.display(), names.len());
    Ok(names)
}

/// 解析图片列表文件，文件名部分可以包含通配符以同时读取多个列表
pub fn parse_image_lists(path: &Path) -> Result<Vec<String>> {
    if path.is_file() {
        return parse_image_list(path);
    }

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let pattern = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .and_then(|s| Pattern::new(&s).ok())
        .ok_or_else(|| Error::InvalidInput(format!("无效的图片列表路径: {}", path.display())))?;

    let mut files = vec![];
    if parent.is_dir() {
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && pattern.matches(&entry.file_name().to_string_lossy())
            {
                files.push(entry.path());
            }
        }
    }
    if files.is_empty() {
        return Err(Error::InvalidInput(format!("找不到图片列表文件: {}", path.display())));
    }
    files.sort();

    let mut names = vec![];
    for file in files {
        names.extend(parse_image_list(&file)?);
    }
    Ok(names)
}

/// 解析符号链接以及 `.`、`..`，文件不存在时只解析父目录，均失败时返回原路径
fn canonical(path: &Path) -> PathBuf {
    if let Ok(path) = fs::canonicalize(path) {
        return path;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(file)) => fs::canonicalize(parent)
            .map(|p| p.join(file))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// 将显式给出的名称规范化为相对于 root 的 POSIX 路径
///
/// 绝对路径先按字面去掉 root 前缀，不匹配时再比较两者的规范路径
fn normalize_name(root: &Path, name: &str) -> Result<String> {
    let path = Path::new(name);
    let rel = if path.is_absolute() {
        match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => canonical(path)
                .strip_prefix(canonical(root))
                .map(Path::to_path_buf)
                .map_err(|_| {
                    Error::InvalidInput(format!("图片 {name} 不在目录 {} 中", root.display()))
                })?,
        }
    } else {
        path.to_path_buf()
    };
    to_posix(&rel).ok_or_else(|| Error::InvalidInput(format!("无效的图片名称: {name:?}")))
}

/// 根据扫描规则或显式列表确定需要处理的图片
pub fn resolve_names(root: &Path, globs: &[String], list: Option<&ImageList>) -> Result<Vec<String>> {
    let raw = match list {
        None => return discover(root, globs),
        Some(ImageList::File(path)) => parse_image_lists(path)?,
        Some(ImageList::Names(names)) => names.clone(),
    };

    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(raw.len());
    for name in raw {
        let name = normalize_name(root, &name)?;
        if !seen.insert(name.clone()) {
            warn!("图片列表中存在重复项: {name}");
            continue;
        }
        names.push(name);
    }

    if names.is_empty() {
        warn!("图片列表为空");
        return Ok(names);
    }
    for name in &names {
        if !root.join(name).is_file() {
            return Err(Error::MissingImage { name: name.clone(), root: root.to_path_buf() });
        }
    }
    Ok(names)
}

/// 待提取特征的图片集合
#[derive(Debug)]
pub struct ImageDataset {
    root: PathBuf,
    conf: PreprocessConf,
    names: Vec<String>,
}

impl ImageDataset {
    pub fn new(root: impl AsRef<Path>, conf: PreprocessConf, list: Option<&ImageList>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!("图片目录不存在: {}", root.display())));
        }
        let names = resolve_names(&root, &conf.globs, list)?;
        Ok(Self { root, conf, names })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 读取并预处理一张图片
    pub fn load(&self, name: &str) -> Result<ProcessedImage> {
        let raw = read_image(self.root.join(name), self.conf.grayscale)?;
        preprocess(name, raw, &self.conf)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempfile::TempDir;

    use super::*;

    fn touch(root: &Path, name: &str) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    fn globs() -> Vec<String> {
        PreprocessConf::default().globs
    }

    #[test]
    fn discover_is_sorted_and_recursive() {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a/c.jpg", "a/b/d.JPG", "notes.txt", "a.jpeg"] {
            touch(dir.path(), name);
        }
        let names = discover(dir.path(), &globs()).unwrap();
        assert_eq!(names, ["a/b/d.JPG", "a/c.jpg", "a.jpeg", "b.png"]);
        assert_eq!(discover(dir.path(), &globs()).unwrap(), names);
    }

    #[test]
    fn overlapping_patterns_dedup() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "x.jpg");
        let globs = vec!["*.jpg".to_string(), "x.*".to_string()];
        assert_eq!(discover(dir.path(), &globs).unwrap(), ["x.jpg"]);
    }

    #[test]
    fn empty_root() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "readme.md");
        assert!(matches!(discover(dir.path(), &globs()), Err(Error::EmptyDataset { .. })));
    }

    #[test]
    fn list_file_skips_comments_and_extra_columns() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "q/1.jpg");
        touch(dir.path(), "q/2.jpg");
        let list = dir.path().join("list.txt");
        fs::write(&list, "# query\nq/1.jpg SIMPLE_RADIAL 640 480 500\n\n  q/2.jpg\n").unwrap();
        let names = resolve_names(dir.path(), &globs(), Some(&ImageList::from_path(&list))).unwrap();
        assert_eq!(names, ["q/1.jpg", "q/2.jpg"]);
    }

    #[test]
    fn list_file_glob() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "1.jpg");
        touch(dir.path(), "2.jpg");
        fs::write(dir.path().join("list_b.txt"), "2.jpg\n").unwrap();
        fs::write(dir.path().join("list_a.txt"), "1.jpg\n").unwrap();
        let list = ImageList::from_path(dir.path().join("list_*.txt"));
        assert_eq!(resolve_names(dir.path(), &globs(), Some(&list)).unwrap(), ["1.jpg", "2.jpg"]);
    }

    #[test]
    fn missing_list_file_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let list = ImageList::from_path(dir.path().join("nope.txt"));
        assert!(matches!(
            resolve_names(dir.path(), &globs(), Some(&list)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn names_are_normalized_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/1.jpg");
        let abs = dir.path().join("a/1.jpg").to_string_lossy().to_string();
        let list = ImageList::from_names(["./a/1.jpg", abs.as_str(), "a/1.jpg"]);
        assert_eq!(resolve_names(dir.path(), &globs(), Some(&list)).unwrap(), ["a/1.jpg"]);
    }

    #[test]
    fn missing_name_fails_eagerly() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg");
        let list = ImageList::from_names(["a.jpg", "ghost.jpg"]);
        match resolve_names(dir.path(), &globs(), Some(&list)) {
            Err(Error::MissingImage { name, .. }) => assert_eq!(name, "ghost.jpg"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_list_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg");
        let list = dir.path().join("list.txt");
        fs::write(&list, "# nothing here\n\n").unwrap();
        let dataset = ImageDataset::new(
            dir.path(),
            PreprocessConf::default(),
            Some(&ImageList::from_path(&list)),
        )
        .unwrap();
        assert!(dataset.is_empty());

        let names = ImageList::from_names(Vec::<String>::new());
        assert!(resolve_names(dir.path(), &globs(), Some(&names)).unwrap().is_empty());
    }

    #[test]
    fn absolute_name_under_non_canonical_root() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/1.jpg");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let root = dir.path().join("sub/..");
        let abs = dir.path().join("a/1.jpg").to_string_lossy().to_string();
        let list = ImageList::from_names([abs.as_str()]);
        assert_eq!(resolve_names(&root, &globs(), Some(&list)).unwrap(), ["a/1.jpg"]);
    }

    #[test]
    fn absolute_name_under_relative_root() {
        let dir = tempfile::Builder::new().tempdir_in(".").unwrap();
        touch(dir.path(), "a/1.jpg");
        let abs = std::env::current_dir().unwrap().join(dir.path()).join("a/1.jpg");
        let list = ImageList::from_names([abs.to_string_lossy()]);
        assert!(dir.path().is_relative());
        assert_eq!(resolve_names(dir.path(), &globs(), Some(&list)).unwrap(), ["a/1.jpg"]);
    }

    #[cfg(unix)]
    #[test]
    fn absolute_name_through_symlinked_root() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "real/1.jpg");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(dir.path().join("real"), &link).unwrap();

        let abs = dir.path().join("real/1.jpg").to_string_lossy().to_string();
        let list = ImageList::from_names([abs.as_str()]);
        assert_eq!(resolve_names(&link, &globs(), Some(&list)).unwrap(), ["1.jpg"]);

        let outside = ImageList::from_names([dir.path().join("other.jpg").to_string_lossy()]);
        assert!(matches!(
            resolve_names(&link, &globs(), Some(&outside)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn escaping_root_is_invalid() {
        let dir = TempDir::new().unwrap();
        let list = ImageList::from_names(["../a.jpg"]);
        assert!(matches!(
            resolve_names(dir.path(), &globs(), Some(&list)),
            Err(Error::InvalidInput(_))
        ));
    }
}
