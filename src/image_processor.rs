use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use serde::Deserialize;
use tracing::info;

use crate::error::{InferenceError, Result};

/// Turns decoded images into the pixel tensor a vision model expects.
///
/// `height` x `width` is the model input size. Without `pre_crop` the image is
/// stretched straight to it; otherwise it is resized as `pre_crop` says and
/// then centre-cropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProcessor {
    pub do_resize: bool,
    pub pre_crop: Option<CropResize>,
    pub height: u32,
    pub width: u32,
    pub filter: FilterType,
    pub do_rescale: bool,
    pub rescale_factor: f64,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

/// Resize applied ahead of a centre crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropResize {
    Exact { height: u32, width: u32 },
    /// Scale so the shorter side has this length, keeping the aspect ratio.
    ShortestEdge(u32),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    Square(u32),
    HeightWidth { height: u32, width: u32 },
    ShortestEdge { shortest_edge: u32 },
}

#[derive(Debug, Deserialize)]
struct PreprocessorConfig {
    #[serde(default = "default_true")]
    do_resize: bool,
    size: Option<SizeSpec>,
    #[serde(default = "default_resample")]
    resample: u32,
    #[serde(default = "default_true")]
    do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    rescale_factor: f64,
    #[serde(default)]
    do_center_crop: bool,
    crop_size: Option<SizeSpec>,
    #[serde(default = "default_true")]
    do_normalize: bool,
    image_mean: Option<Vec<f32>>,
    image_std: Option<Vec<f32>>,
}

fn default_true() -> bool {
    true
}

fn default_resample() -> u32 {
    2
}

fn default_rescale_factor() -> f64 {
    1.0 / 255.0
}

fn fixed_size(spec: SizeSpec, name: &str) -> Result<(u32, u32)> {
    let (height, width) = match spec {
        SizeSpec::Square(edge) => (edge, edge),
        SizeSpec::HeightWidth { height, width } => (height, width),
        SizeSpec::ShortestEdge { .. } => {
            return Err(InferenceError::ModelLoad(format!(
                "{} must be a fixed height and width",
                name
            )))
        }
    };
    if height == 0 || width == 0 {
        return Err(InferenceError::ModelLoad(format!("{} must be non-zero", name)));
    }
    Ok((height, width))
}

/// Output size when the shorter side is scaled to `edge`.
fn shortest_edge_size(width: u32, height: u32, edge: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| {
        (u64::from(edge) * u64::from(long) / u64::from(short.max(1))) as u32
    };
    if width <= height {
        (edge, scale(height, width))
    } else {
        (scale(width, height), edge)
    }
}

fn channel_triple(values: Option<Vec<f32>>, name: &str) -> Result<[f32; 3]> {
    match values.as_deref() {
        None => Ok([0.5, 0.5, 0.5]),
        Some([v]) => Ok([*v, *v, *v]),
        Some([r, g, b]) => Ok([*r, *g, *b]),
        Some(other) => Err(InferenceError::ModelLoad(format!(
            "{} must have 1 or 3 entries, got {}",
            name,
            other.len()
        ))),
    }
}

/// PIL resampling codes as used in preprocessor configs.
fn filter_from_resample(code: u32) -> FilterType {
    match code {
        0 => FilterType::Nearest,
        1 => FilterType::Lanczos3,
        3 => FilterType::CatmullRom,
        _ => FilterType::Triangle,
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self {
            do_resize: true,
            pre_crop: None,
            height: 224,
            width: 224,
            filter: FilterType::Triangle,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
        }
    }
}

impl ImageProcessor {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading image preprocessor from {:?}", path);
        Self::from_config(&std::fs::read_to_string(path)?)
    }

    pub fn from_config(config_json: &str) -> Result<Self> {
        let config: PreprocessorConfig = serde_json::from_str(config_json)?;

        let crop = match config.crop_size {
            Some(spec) if config.do_center_crop => Some(fixed_size(spec, "crop_size")?),
            _ => None,
        };

        let (pre_crop, (height, width)) = match (config.size, crop) {
            (Some(SizeSpec::ShortestEdge { shortest_edge }), Some((height, width))) => {
                if shortest_edge < height || shortest_edge < width {
                    return Err(InferenceError::ModelLoad(format!(
                        "crop_size {}x{} does not fit shortest_edge {}",
                        height, width, shortest_edge
                    )));
                }
                (Some(CropResize::ShortestEdge(shortest_edge)), (height, width))
            }
            (Some(SizeSpec::ShortestEdge { .. }), None) => {
                return Err(InferenceError::ModelLoad(
                    "shortest_edge resizing needs do_center_crop with a crop_size".into(),
                ))
            }
            (None, None) => (None, (224, 224)),
            (Some(spec), None) => (None, fixed_size(spec, "size")?),
            (spec, Some((height, width))) => {
                let (resize_height, resize_width) = match spec {
                    Some(spec) => fixed_size(spec, "size")?,
                    None => (224, 224),
                };
                if resize_height < height || resize_width < width {
                    return Err(InferenceError::ModelLoad(format!(
                        "crop_size {}x{} does not fit size {}x{}",
                        height, width, resize_height, resize_width
                    )));
                }
                let pre_crop = CropResize::Exact {
                    height: resize_height,
                    width: resize_width,
                };
                (Some(pre_crop), (height, width))
            }
        };

        let image_std = channel_triple(config.image_std, "image_std")?;
        if image_std.iter().any(|s| *s == 0.0) {
            return Err(InferenceError::ModelLoad("image_std must be non-zero".into()));
        }

        Ok(Self {
            do_resize: config.do_resize,
            pre_crop,
            height,
            width,
            filter: filter_from_resample(config.resample),
            do_rescale: config.do_rescale,
            rescale_factor: config.rescale_factor,
            do_normalize: config.do_normalize,
            image_mean: channel_triple(config.image_mean, "image_mean")?,
            image_std,
        })
    }

    /// Decode raw upload bytes into a 3-channel image.
    pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
        let image: DynamicImage = image::load_from_memory(bytes)?;
        Ok(image.to_rgb8())
    }

    /// Produce a `(1, 3, height, width)` f32 tensor on `device`.
    pub fn preprocess(&self, image: &RgbImage, device: &Device) -> Result<Tensor> {
        let image = self.fit(image);

        let (width, height) = image.dimensions();
        let data = image.into_raw();
        let mut pixels = Tensor::from_vec(data, (height as usize, width as usize, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;

        if self.do_rescale {
            pixels = pixels.affine(self.rescale_factor, 0.0)?;
        }

        if self.do_normalize {
            let mean = Tensor::new(&self.image_mean, &Device::Cpu)?.reshape((3, 1, 1))?;
            let std = Tensor::new(&self.image_std, &Device::Cpu)?.reshape((3, 1, 1))?;
            pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
        }

        Ok(pixels.unsqueeze(0)?.to_device(device)?)
    }

    /// Resize, then centre-crop to the model input size when `pre_crop` is set.
    fn fit(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let target = if !self.do_resize {
            (width, height)
        } else {
            match self.pre_crop {
                None => (self.width, self.height),
                Some(CropResize::Exact { height, width }) => (width, height),
                Some(CropResize::ShortestEdge(edge)) => shortest_edge_size(width, height, edge),
            }
        };

        let resized = if target == (width, height) {
            image.clone()
        } else {
            imageops::resize(image, target.0, target.1, self.filter)
        };

        if self.pre_crop.is_none() || target == (self.width, self.height) {
            return resized;
        }
        let x = target.0.saturating_sub(self.width) / 2;
        let y = target.1.saturating_sub(self.height) / 2;
        imageops::crop_imm(&resized, x, y, self.width, self.height).to_image()
    }
}
