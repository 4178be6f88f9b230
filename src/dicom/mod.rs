pub mod decoder;

pub use decoder::{convert_directory, decode_to_raster, rescale_to_gray, rescale_to_rgb, RasterFormat, RasterImage};
