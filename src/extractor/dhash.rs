use ndarray::{Array1, Axis};

use super::Extractor;
use crate::config::ModelConf;
use crate::error::{Error, Result};
use crate::feature::Prediction;
use crate::preprocess::{ProcessedImage, resize_hwc};

/// 差值哈希（dHash）全局描述子
pub struct DHashExtractor {
    hash_size: usize,
}

impl DHashExtractor {
    pub fn new(conf: &ModelConf) -> Result<Self> {
        let hash_size = conf.param_u64("hash_size").unwrap_or(8) as usize;
        if hash_size == 0 || hash_size * hash_size % 8 != 0 {
            return Err(Error::Config(format!("dhash hash_size 的平方需为 8 的倍数: {hash_size}")));
        }
        Ok(Self { hash_size })
    }
}

impl Extractor for DHashExtractor {
    fn extract(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        let n = self.hash_size;
        let gray = image.gray().insert_axis(Axis(2));
        let small = resize_hwc(&gray, n as u32 + 1, n as u32)?;

        let mut hash = Array1::<u8>::zeros(n * n / 8);
        let mut bit = 0;
        for row in small.outer_iter() {
            for j in 0..n {
                hash[bit / 8] <<= 1;
                if row[[j, 0]] < row[[j + 1, 0]] {
                    hash[bit / 8] |= 1;
                }
                bit += 1;
            }
        }

        let mut pred = Prediction::new();
        pred.insert("global_descriptor".into(), hash.into_dyn().into());
        Ok(pred)
    }
}
