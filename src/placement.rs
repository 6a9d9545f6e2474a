//! 服装放置引擎
//! Garment placement engine: landmarks + garment size + config → canvas rectangle
//!
//! 纯函数, 没有状态. 视频以镜像 (自拍视角) 显示, 所以所有 X 都要做镜像校正.

use crate::error::ConfigError;
use crate::landmarks::LandmarkSet;
use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// 缩放倍数的 UI 范围
pub const SCALE_RANGE: RangeInclusive<f32> = 0.5..=2.5;
/// 垂直偏移的 UI 范围 (像素)
pub const OFFSET_RANGE: RangeInclusive<f32> = -150.0..=150.0;

const UPPER_WIDTH_FACTOR: f64 = 1.3;
const BOTTOM_WIDTH_FACTOR: f64 = 1.2;
/// 全身服装固定占画布高度的比例 (忽略图片宽高比)
const FULL_HEIGHT_FRACTION: f64 = 0.7;
/// 髋部缺失时, 肩部中点以下的归一化回退距离
const HIP_FALLBACK_OFFSET: f64 = 0.3;

/// 服装类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentType {
    #[default]
    Upper,
    Bottom,
    Full,
}

static GARMENT_ALIASES: phf::Map<&'static str, GarmentType> = phf_map! {
    "upper" => GarmentType::Upper,
    "top" => GarmentType::Upper,
    "shirt" => GarmentType::Upper,
    "bottom" => GarmentType::Bottom,
    "pants" => GarmentType::Bottom,
    "skirt" => GarmentType::Bottom,
    "full" => GarmentType::Full,
    "dress" => GarmentType::Full,
    "fullbody" => GarmentType::Full,
};

impl GarmentType {
    pub const ALL: [GarmentType; 3] = [GarmentType::Upper, GarmentType::Bottom, GarmentType::Full];

    pub fn name(&self) -> &'static str {
        match self {
            GarmentType::Upper => "upper",
            GarmentType::Bottom => "bottom",
            GarmentType::Full => "full",
        }
    }
}

impl fmt::Display for GarmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GarmentType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        GARMENT_ALIASES
            .get(key.as_str())
            .copied()
            .ok_or_else(|| ConfigError::UnknownGarmentType(s.to_string()))
    }
}

/// 性别 (只影响全身服装的宽度系数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl Gender {
    /// 全身服装宽度 = 肩宽 × 系数
    pub fn sizing_coefficient(&self) -> f64 {
        match self {
            Gender::Female => 1.2,
            Gender::Male => 1.3,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Male => "male",
            Gender::Female => "female",
        })
    }
}

impl FromStr for Gender {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            _ => Err(ConfigError::UnknownGender(s.to_string())),
        }
    }
}

/// 放置配置 (每帧不可变的值)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    pub garment_type: GarmentType,
    pub gender: Gender,
    pub scale_multiplier: f32,
    /// 像素, 正值向下
    pub vertical_offset: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            garment_type: GarmentType::Upper,
            gender: Gender::Male,
            scale_multiplier: 1.0,
            vertical_offset: 0.0,
        }
    }
}

impl PlacementConfig {
    /// 限制在 UI 范围内
    pub fn clamped(mut self) -> Self {
        self.scale_multiplier = clamp_to(self.scale_multiplier, &SCALE_RANGE, 1.0);
        self.vertical_offset = clamp_to(self.vertical_offset, &OFFSET_RANGE, 0.0);
        self
    }

    pub fn with_garment_type(self, garment_type: GarmentType) -> Self {
        Self {
            garment_type,
            ..self
        }
    }

    pub fn with_scale(self, scale_multiplier: f32) -> Self {
        Self {
            scale_multiplier,
            ..self
        }
        .clamped()
    }

    pub fn with_offset(self, vertical_offset: f32) -> Self {
        Self {
            vertical_offset,
            ..self
        }
        .clamped()
    }
}

fn clamp_to(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        fallback
    }
}

/// 可调的呈现参数: 服装顶部相对肩线上移的高度比例
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementParams {
    /// 上装: 0.20〜0.25
    pub upper_anchor: f64,
    /// 全身: 0.10〜0.15
    pub full_anchor: f64,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            upper_anchor: 0.25,
            full_anchor: 0.12,
        }
    }
}

/// 画布尺寸 (像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// 放置矩形 (画布像素坐标, 左上角 + 尺寸)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Placement {
    /// 四舍五入到像素网格: (x, y, w, h). 尺寸为 0 时返回 None.
    pub fn to_pixel_rect(&self) -> Option<(i64, i64, u32, u32)> {
        let w = self.width.round();
        let h = self.height.round();
        if !(w >= 1.0 && h >= 1.0) || !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        Some((self.x.round() as i64, self.y.round() as i64, w as u32, h as u32))
    }
}

/// 计算服装在画布上的放置矩形.
///
/// 关键点缺失, 长度不足或任一肩膀缺失时返回 None (本帧不画).
/// 不裁剪到画布范围内, 超出部分在绘制时被裁掉.
pub fn compute_placement(
    landmarks: Option<&LandmarkSet>,
    garment_size: (u32, u32),
    config: &PlacementConfig,
    params: &PlacementParams,
    canvas: CanvasSize,
) -> Option<Placement> {
    let landmarks = landmarks.filter(|set| set.is_placeable())?;
    let (left_shoulder, right_shoulder) = landmarks.shoulders()?;

    let (garment_w, garment_h) = garment_size;
    if garment_w == 0 || garment_h == 0 {
        return None;
    }

    let canvas_w = canvas.width as f64;
    let canvas_h = canvas.height as f64;
    let scale = config.scale_multiplier as f64;
    let offset = config.vertical_offset as f64;

    // 1. 肩部中点 (归一化)
    let mid_x = (left_shoulder.x as f64 + right_shoulder.x as f64) / 2.0;
    let mid_y = (left_shoulder.y as f64 + right_shoulder.y as f64) / 2.0;

    // 2. 肩宽 (像素)
    let shoulder_width_px = (left_shoulder.x as f64 - right_shoulder.x as f64).abs() * canvas_w;

    // 3. 宽高比
    let aspect = garment_w as f64 / garment_h as f64;

    // 4. 按类别计算尺寸和垂直位置
    let (width, height, y) = match config.garment_type {
        GarmentType::Upper => {
            let width = shoulder_width_px * UPPER_WIDTH_FACTOR * scale;
            let height = width / aspect;
            let y = mid_y * canvas_h - params.upper_anchor * height + offset;
            (width, height, y)
        }
        GarmentType::Bottom => {
            let width = shoulder_width_px * BOTTOM_WIDTH_FACTOR * scale;
            let height = width / aspect;
            let hip_y = match landmarks.hips() {
                Some((left_hip, right_hip)) => (left_hip.y as f64 + right_hip.y as f64) / 2.0,
                None => mid_y + HIP_FALLBACK_OFFSET,
            };
            (width, height, hip_y * canvas_h + offset)
        }
        GarmentType::Full => {
            let width = shoulder_width_px * config.gender.sizing_coefficient() * scale;
            let height = FULL_HEIGHT_FRACTION * canvas_h;
            let y = mid_y * canvas_h - params.full_anchor * height + offset;
            (width, height, y)
        }
    };

    // 5. 镜像校正: 以镜像后的肩部中点为中心
    let mirrored_x = mid_x * canvas_w;
    let x = canvas_w - mirrored_x - width / 2.0;

    Some(Placement {
        x,
        y,
        width: width.max(0.0),
        height: height.max(0.0),
    })
}
