//! 服装图片资源
//! Garment asset: decoded RGBA raster whose size travels with the pixels

use crate::error::AssetError;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 加载限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarmentLimits {
    /// 原始文件最大字节数
    pub max_bytes: usize,
    /// 解码后最长边, 超过则等比缩小
    pub max_dimension: u32,
}

impl Default for GarmentLimits {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024 * 1024,
            max_dimension: 2048,
        }
    }
}

/// 解码后的服装图片.
///
/// 宽高直接取自像素缓冲区, 整个资源以 `Arc` 整体替换,
/// 所以渲染时不会出现新图片配旧尺寸的情况.
#[derive(Debug, Clone)]
pub struct GarmentAsset {
    image: RgbaImage,
}

impl GarmentAsset {
    pub fn from_rgba(image: RgbaImage) -> Result<Self, AssetError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AssetError::ZeroSize);
        }
        Ok(Self { image })
    }

    /// 从内存解码 (PNG/JPEG/WebP 等 image 支持的格式)
    pub fn from_bytes(bytes: &[u8], limits: &GarmentLimits) -> Result<Self, AssetError> {
        if bytes.is_empty() {
            return Err(AssetError::Empty);
        }
        if bytes.len() > limits.max_bytes {
            return Err(AssetError::TooLarge {
                size: bytes.len(),
                limit: limits.max_bytes,
            });
        }

        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let image = downscale_if_needed(decoded, limits.max_dimension);
        Self::from_rgba(image)
    }

    pub fn from_path(path: impl AsRef<Path>, limits: &GarmentLimits) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, limits)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 最长边超过 max_dimension 时等比缩小
fn downscale_if_needed(image: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if max_dimension == 0 || longest <= max_dimension {
        return image;
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);
    log::info!("🧥 服装图片缩小: {}x{} → {}x{}", w, h, new_w, new_h);
    imageops::resize(&image, new_w, new_h, FilterType::Lanczos3)
}
