use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use ndarray::{Array2, Array3, Axis};

use crate::config::PreprocessConf;
use crate::error::{Error, Result};

/// 8 位图片的最大像素值
const MAX_PIXEL_VALUE: f32 = 255.;

/// 预处理后的图片，可以直接送入模型
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// 相对于图片根目录的名称
    pub name: String,
    /// C x H x W，取值范围 [0, 1]
    pub image: Array3<f32>,
    /// 缩放前的原始尺寸 (width, height)
    pub original_size: (u32, u32),
}

impl ProcessedImage {
    /// 预处理后的尺寸 (width, height)
    pub fn size(&self) -> (u32, u32) {
        let (_, h, w) = self.image.dim();
        (w as u32, h as u32)
    }

    pub fn channels(&self) -> usize {
        self.image.dim().0
    }

    /// 按通道取平均得到灰度图
    pub fn gray(&self) -> Array2<f32> {
        match self.channels() {
            1 => self.image.index_axis(Axis(0), 0).to_owned(),
            _ => self.image.mean_axis(Axis(0)).unwrap_or_else(|| Array2::zeros((0, 0))),
        }
    }
}

/// 读取图片，返回 H x W x C 的数组，取值范围 [0, 255]，彩色图为 RGB 顺序
///
/// 按 EXIF 中的方向信息旋转图片
pub fn read_image(path: impl AsRef<Path>, grayscale: bool) -> Result<Array3<f32>> {
    let path = path.as_ref();
    let decode_err = |source: ImageError| Error::ImageDecode { path: path.to_path_buf(), source };

    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .map_err(decode_err)?;
    let orientation = decoder.orientation().map_err(decode_err)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);

    let array = if grayscale {
        let buf = image.into_luma8();
        let (w, h) = buf.dimensions();
        Array3::from_shape_vec((h as usize, w as usize, 1), buf.into_raw())?
    } else {
        let buf = image.into_rgb8();
        let (w, h) = buf.dimensions();
        Array3::from_shape_vec((h as usize, w as usize, 3), buf.into_raw())?
    };
    Ok(array.mapv(f32::from))
}

/// 计算缩放后的尺寸 (width, height)，不需要缩放时返回 None
///
/// 仅当设置了 resize_max，并且强制缩放或最长边超过 resize_max 时才缩放
pub fn target_size(width: u32, height: u32, conf: &PreprocessConf) -> Option<(u32, u32)> {
    let resize_max = conf.resize_max?;
    if !conf.resize_force && width.max(height) <= resize_max {
        return None;
    }
    let scale = resize_max as f64 / width.max(height) as f64;
    let w = (width as f64 * scale).round_ties_even().max(1.) as u32;
    let h = (height as f64 * scale).round_ties_even().max(1.) as u32;
    Some((w, h))
}

/// 每个输出位置对应的两个源像素下标和后者的权重
///
/// 像素中心位于 (i + 0.5)，越界的采样位置截断到边缘像素
fn linear_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len - 1;
    (0..dst_len)
        .map(|i| {
            let pos = ((i as f64 + 0.5) * scale - 0.5).max(0.);
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = if i0 == last { 0. } else { (pos - i0 as f64) as f32 };
            (i0, i1, frac)
        })
        .collect()
}

/// 对 H x W x C 的图片做双线性插值缩放，每个输出像素只取相邻的 2 x 2 个源像素
pub(crate) fn resize_hwc(image: &Array3<f32>, width: u32, height: u32) -> Result<Array3<f32>> {
    let (h, w, c) = image.dim();
    let (width, height) = (width as usize, height as usize);
    if h == 0 || w == 0 || width == 0 || height == 0 {
        return Err(Error::InvalidInput(format!("无法将 {w}x{h} 的图片缩放到 {width}x{height}")));
    }

    let xs = linear_taps(w, width);
    let ys = linear_taps(h, height);
    let mut out = Array3::<f32>::zeros((height, width, c));
    for (y, &(y0, y1, fy)) in ys.iter().enumerate() {
        for (x, &(x0, x1, fx)) in xs.iter().enumerate() {
            for k in 0..c {
                let top = image[[y0, x0, k]] * (1. - fx) + image[[y0, x1, k]] * fx;
                let bottom = image[[y1, x0, k]] * (1. - fx) + image[[y1, x1, k]] * fx;
                out[[y, x, k]] = top * (1. - fy) + bottom * fy;
            }
        }
    }
    Ok(out)
}

/// 将 H x W x C 的原始图片转换为模型输入
pub fn preprocess(name: &str, raw: Array3<f32>, conf: &PreprocessConf) -> Result<ProcessedImage> {
    let (h, w, c) = raw.dim();
    if h == 0 || w == 0 {
        return Err(Error::InvalidInput(format!("图片 {name} 尺寸为空")));
    }
    let original_size = (w as u32, h as u32);

    // 归一化与插值均为线性操作，顺序不影响结果
    let mut image = raw / MAX_PIXEL_VALUE;
    if let Some((new_w, new_h)) = target_size(original_size.0, original_size.1, conf) {
        image = resize_hwc(&image, new_w, new_h)?;
    }

    let image = if c == 1 {
        image.index_axis_move(Axis(2), 0).insert_axis(Axis(0))
    } else {
        image.permuted_axes([2, 0, 1]).as_standard_layout().into_owned()
    };

    Ok(ProcessedImage { name: name.to_string(), image, original_size })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn conf(resize_max: Option<u32>, resize_force: bool) -> PreprocessConf {
        PreprocessConf { resize_max, resize_force, ..Default::default() }
    }

    #[rstest]
    #[case::landscape(100, 50, Some((80, 40)))]
    #[case::portrait(50, 100, Some((40, 80)))]
    #[case::small(60, 30, None)]
    #[case::exact(80, 20, None)]
    fn downscale_only(#[case] w: u32, #[case] h: u32, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(target_size(w, h, &conf(Some(80), false)), expected);
    }

    #[test]
    fn force_upscales() {
        assert_eq!(target_size(60, 30, &conf(Some(120), true)), Some((120, 60)));
        assert_eq!(target_size(60, 30, &conf(Some(120), false)), None);
        assert_eq!(target_size(60, 30, &conf(None, true)), None);
    }

    #[test]
    fn rounds_half_to_even() {
        // 5 * 0.5 = 2.5 => 2, 7 * 0.5 = 3.5 => 4
        assert_eq!(target_size(10, 5, &conf(Some(5), false)), Some((5, 2)));
        assert_eq!(target_size(14, 7, &conf(Some(7), false)), Some((7, 4)));
    }

    #[test]
    fn longest_side_matches_resize_max() {
        for (w, h) in [(1920, 1080), (333, 1001), (4000, 3999)] {
            let (nw, nh) = target_size(w, h, &conf(Some(640), false)).unwrap();
            assert_eq!(nw.max(nh), 640);
        }
    }

    #[test]
    fn grayscale_is_channel_first_and_normalized() {
        let raw = Array3::from_elem((50, 100, 1), 255.);
        let out = preprocess("a.jpg", raw, &conf(Some(80), false)).unwrap();
        assert_eq!(out.image.dim(), (1, 40, 80));
        assert_eq!(out.size(), (80, 40));
        assert_eq!(out.original_size, (100, 50));
        assert!(out.image.iter().all(|&v| (v - 1.).abs() < 1e-5));
    }

    #[test]
    fn color_is_transposed() {
        let mut raw = Array3::zeros((2, 3, 3));
        raw[[1, 2, 0]] = 255.;
        raw[[0, 1, 2]] = 51.;
        let out = preprocess("b.png", raw, &conf(None, false)).unwrap();
        assert_eq!(out.image.dim(), (3, 2, 3));
        assert_eq!(out.image[[0, 1, 2]], 1.);
        assert!((out.image[[2, 0, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(out.original_size, (3, 2));
    }

    #[test]
    fn linear_resize_takes_neighbours_only() {
        let raw = Array3::from_shape_vec((1, 4, 1), vec![0., 255., 0., 255.]).unwrap();
        let out = preprocess("d.png", raw, &conf(Some(2), false)).unwrap();
        assert_eq!(out.image.dim(), (1, 1, 2));
        assert!(out.image.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn linear_resize_upscale_clamps_edges() {
        let image = Array3::from_shape_vec((1, 2, 1), vec![0., 1.]).unwrap();
        let out = resize_hwc(&image, 4, 1).unwrap();
        let row = out.iter().copied().collect::<Vec<_>>();
        assert_eq!(row, [0., 0.25, 0.75, 1.]);
    }

    /// 在 JPEG 的 SOI 之后插入只含 Orientation 标签的 EXIF 段
    fn with_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08".to_vec();
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        tiff.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00; 4]);

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);
        let len = (payload.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[rstest]
    #[case::gray(true, 1)]
    #[case::color(false, 3)]
    fn exif_orientation_is_applied(#[case] grayscale: bool, #[case] channels: usize) {
        let mut jpeg = Vec::new();
        image::DynamicImage::new_rgb8(100, 50)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotated.jpg");
        std::fs::write(&path, with_orientation(&jpeg, 6)).unwrap();

        let raw = read_image(&path, grayscale).unwrap();
        assert_eq!(raw.dim(), (100, 50, channels));
        let out = preprocess("rotated.jpg", raw, &conf(None, false)).unwrap();
        assert_eq!(out.original_size, (50, 100));
    }

    #[test]
    fn gray_averages_channels() {
        let mut raw = Array3::zeros((1, 1, 3));
        raw[[0, 0, 0]] = 255.;
        let out = preprocess("c.png", raw, &conf(None, false)).unwrap();
        assert!((out.gray()[[0, 0]] - 1. / 3.).abs() < 1e-6);
    }
}
