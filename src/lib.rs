pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod feature;
mod metrics;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod store;
pub mod utils;

pub use config::{ExtractConf, ModelConf, Opts, PreprocessConf};
pub use error::{Error, Result};
pub use extractor::{Device, Extractor, ExtractorRegistry};
pub use feature::{FeatureArray, Prediction};
pub use pipeline::{ExtractionReport, PipelineBuilder};
pub use store::FeatureStore;
