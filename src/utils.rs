use std::path::{Component, Path};

use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("invalid progress template")
        .progress_chars("#>-")
}

/// 将相对路径转换为以 `/` 分隔的字符串，忽略 `.` 组件
///
/// 遇到 `..`、根目录或盘符时返回 None
pub fn to_posix(path: &Path) -> Option<String> {
    let mut parts = vec![];
    for component in path.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_join() {
        assert_eq!(to_posix(Path::new("a/./b/c.jpg")).as_deref(), Some("a/b/c.jpg"));
        assert_eq!(to_posix(Path::new("c.jpg")).as_deref(), Some("c.jpg"));
        assert_eq!(to_posix(Path::new("../c.jpg")), None);
        assert_eq!(to_posix(Path::new("/abs/c.jpg")), None);
        assert_eq!(to_posix(Path::new(".")), None);
    }
}
