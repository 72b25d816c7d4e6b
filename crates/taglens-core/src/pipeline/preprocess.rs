//! Frame preprocessing into model input tensors.
//!
//! A [`ModelProfile`] fixes resolution, channel order, tensor layout and
//! normalization for a model identity. Pixel values become
//! `(pixel / 255 - mean[c]) / std[c]`.

use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::config::PreprocessOverrides;
use crate::error::PipelineError;
use crate::types::{FrameUnit, Origin, PreparedTensor};

const CHANNELS: usize = 3;

/// Largest input resolution accepted from a profile.
const MAX_INPUT_SIZE: u32 = 4096;

/// Axis order of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [batch, channels, height, width]
    Nchw,
    /// [batch, height, width, channels]
    Nhwc,
}

/// Order of the colour channels in the tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// How a frame is brought to the square input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Stretch to the target size
    Exact,
    /// Keep aspect ratio and pad the remainder with `pad_color`
    Pad,
}

/// Input requirements of one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub input_size: u32,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub resize: ResizeMode,
    /// Fill for padding and for compositing transparent pixels
    pub pad_color: [u8; 3],
}

impl ModelProfile {
    /// WD tagger v3 family: 448px, NHWC, BGR, raw 0..255 values, gray padding.
    pub fn wd_tagger() -> Self {
        Self {
            input_size: 448,
            layout: TensorLayout::Nhwc,
            channel_order: ChannelOrder::Bgr,
            mean: [0.0; 3],
            std: [1.0 / 255.0; 3],
            resize: ResizeMode::Pad,
            pad_color: [128, 128, 128],
        }
    }

    /// SigLIP vision towers: NCHW, RGB, scaled to [-1, 1].
    pub fn siglip(input_size: u32) -> Self {
        Self {
            input_size,
            layout: TensorLayout::Nchw,
            channel_order: ChannelOrder::Rgb,
            mean: [0.5; 3],
            std: [0.5; 3],
            resize: ResizeMode::Exact,
            pad_color: [0, 0, 0],
        }
    }

    /// ImageNet-normalized 224px NCHW, used for unknown identities.
    pub fn generic() -> Self {
        Self {
            input_size: 224,
            layout: TensorLayout::Nchw,
            channel_order: ChannelOrder::Rgb,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            resize: ResizeMode::Exact,
            pad_color: [0, 0, 0],
        }
    }

    /// Pick the preset for a model identity.
    pub fn for_identity(identity: &str) -> Self {
        let id = identity.to_ascii_lowercase();
        if id.starts_with("wd-") || id.contains("wd14") || id.contains("-tagger") {
            Self::wd_tagger()
        } else if id.contains("siglip") {
            Self::siglip(if id.contains("384") { 384 } else { 224 })
        } else {
            Self::generic()
        }
    }

    /// Apply per-field overrides from config.
    pub fn with_overrides(mut self, overrides: &PreprocessOverrides) -> Self {
        if let Some(size) = overrides.input_size {
            self.input_size = size;
        }
        if let Some(layout) = overrides.layout {
            self.layout = layout;
        }
        if let Some(order) = overrides.channel_order {
            self.channel_order = order;
        }
        if let Some(mean) = overrides.mean {
            self.mean = mean;
        }
        if let Some(std) = overrides.std {
            self.std = std;
        }
        if let Some(resize) = overrides.resize {
            self.resize = resize;
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(format!(
                "input_size must be between 1 and {MAX_INPUT_SIZE}, got {}",
                self.input_size
            ));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!("std values must be > 0, got {:?}", self.std));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(format!("mean values must be finite, got {:?}", self.mean));
        }
        Ok(())
    }

    /// Shape of one prepared tensor, batch axis included.
    pub fn shape(&self) -> [usize; 4] {
        let s = self.input_size as usize;
        match self.layout {
            TensorLayout::Nchw => [1, CHANNELS, s, s],
            TensorLayout::Nhwc => [1, s, s, CHANNELS],
        }
    }
}

/// Pure transform from a decoded frame to a [`PreparedTensor`].
#[derive(Debug, Clone)]
pub struct Preprocessor {
    profile: ModelProfile,
}

impl Preprocessor {
    pub fn new(profile: ModelProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Prepare one frame. Deterministic for a given frame and profile.
    pub fn prepare(&self, frame: &FrameUnit) -> Result<PreparedTensor, PipelineError> {
        let rgb = self.to_rgb(&frame.image).map_err(|format| PipelineError::UnsupportedFormat {
            path: frame.media.path.clone(),
            format,
        })?;
        let square = self.resize(&rgb);

        Ok(PreparedTensor {
            origin: Origin {
                media: frame.media.clone(),
                frame_index: frame.frame_index,
            },
            tensor: self.to_tensor(&square),
        })
    }

    /// Coerce any supported pixel layout to 8-bit RGB, compositing alpha on
    /// the pad colour.
    fn to_rgb(&self, image: &DynamicImage) -> Result<RgbImage, String> {
        if image.width() == 0 || image.height() == 0 {
            return Err("empty image".to_string());
        }

        match image.color() {
            ColorType::L8 | ColorType::L16 | ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => {
                Ok(image.to_rgb8())
            }
            ColorType::La8
            | ColorType::La16
            | ColorType::Rgba8
            | ColorType::Rgba16
            | ColorType::Rgba32F => {
                let rgba = image.to_rgba8();
                let [pad_r, pad_g, pad_b] = self.profile.pad_color;
                let mut out = RgbImage::new(rgba.width(), rgba.height());
                for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
                    let [r, g, b, a] = src.0;
                    let alpha = a as u32;
                    let blend = |fg: u8, bg: u8| -> u8 {
                        ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8
                    };
                    *dst = Rgb([blend(r, pad_r), blend(g, pad_g), blend(b, pad_b)]);
                }
                Ok(out)
            }
            other => Err(format!("{:?}", other)),
        }
    }

    fn resize(&self, rgb: &RgbImage) -> RgbImage {
        let size = self.profile.input_size;
        let (width, height) = rgb.dimensions();
        if width == size && height == size {
            return rgb.clone();
        }

        match self.profile.resize {
            ResizeMode::Exact => imageops::resize(rgb, size, size, FilterType::Triangle),
            ResizeMode::Pad => {
                let ratio = (size as f32 / width as f32).min(size as f32 / height as f32);
                let new_width = ((width as f32 * ratio).round() as u32).clamp(1, size);
                let new_height = ((height as f32 * ratio).round() as u32).clamp(1, size);
                let resized = imageops::resize(rgb, new_width, new_height, FilterType::Triangle);

                let mut canvas = RgbImage::from_pixel(size, size, Rgb(self.profile.pad_color));
                let left = (size - new_width) / 2;
                let top = (size - new_height) / 2;
                imageops::overlay(&mut canvas, &resized, left as i64, top as i64);
                canvas
            }
        }
    }

    fn to_tensor(&self, square: &RgbImage) -> Array4<f32> {
        let p = &self.profile;
        let size = p.input_size as usize;
        let shape = p.shape();
        let mut tensor = Array4::<f32>::zeros((shape[0], shape[1], shape[2], shape[3]));

        let channel_map: [usize; 3] = match p.channel_order {
            ChannelOrder::Rgb => [0, 1, 2],
            ChannelOrder::Bgr => [2, 1, 0],
        };

        for (x, y, pixel) in square.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for (out_c, &src_c) in channel_map.iter().enumerate() {
                let value = (pixel.0[src_c] as f32 / 255.0 - p.mean[src_c]) / p.std[src_c];
                match p.layout {
                    TensorLayout::Nchw => tensor[[0, out_c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, out_c]] = value,
                }
            }
        }
        debug_assert_eq!(tensor.len(), size * size * CHANNELS);

        tensor
    }
}
