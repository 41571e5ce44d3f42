mod exposure_meta;

pub use exposure_meta::{ExposureMeta, ExposureMetaQuery};
