//! 运行配置 - JSON 文件 + 命令行参数

use crate::garment::GarmentLimits;
use crate::input::CaptureRequest;
use crate::placement::{GarmentType, Gender, PlacementConfig, PlacementParams};
use crate::session::SessionSettings;
use ab_glyph::FontArc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// 上装锚点可调范围
pub const UPPER_ANCHOR_RANGE: RangeInclusive<f64> = 0.20..=0.25;
/// 全身锚点可调范围
pub const FULL_ANCHOR_RANGE: RangeInclusive<f64> = 0.10..=0.15;

/// 命令行参数
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "实时虚拟试衣 - 摄像头 + 姿态跟踪 + 服装叠加", long_about = None)]
pub struct Args {
    /// 配置文件路径 (默认在用户配置目录)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 摄像头索引
    #[arg(long)]
    pub camera: Option<usize>,

    /// 摄像头设备名 (Windows DirectShow)
    #[arg(long)]
    pub device: Option<String>,

    /// 用静态图片代替摄像头
    #[arg(long)]
    pub still: Option<PathBuf>,

    /// 服装图片
    #[arg(short, long)]
    pub garment: Option<PathBuf>,

    /// 服装类别: upper / bottom / full
    #[arg(short = 't', long)]
    pub garment_type: Option<GarmentType>,

    /// 性别: male / female
    #[arg(long)]
    pub gender: Option<Gender>,

    /// 缩放倍数 (0.5 - 2.5)
    #[arg(short, long)]
    pub scale: Option<f32>,

    /// 垂直偏移像素 (-150 - 150)
    #[arg(short, long, allow_hyphen_values = true)]
    pub offset: Option<f32>,

    /// 关键点回放文件 (JSON)
    #[arg(short, long)]
    pub landmarks: Option<PathBuf>,

    /// 显示关键点和放置框
    #[arg(long)]
    pub debug: bool,
}

/// 配置文件内容
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    // === 摄像头 ===
    pub camera_index: usize,
    pub camera_device: Option<String>,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    // === 渲染 ===
    pub render_fps: u32,
    pub upper_anchor: f64,
    pub full_anchor: f64,
    pub debug_overlay: bool,
    pub font_path: Option<PathBuf>,

    // === 服装 ===
    pub max_garment_dimension: u32,
    pub max_garment_bytes: usize,
    pub placement: PlacementConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let capture = CaptureRequest::default();
        let params = PlacementParams::default();
        let limits = GarmentLimits::default();
        Self {
            camera_index: capture.device_index,
            camera_device: None,
            camera_width: capture.width,
            camera_height: capture.height,
            camera_fps: capture.fps,

            render_fps: 60,
            upper_anchor: params.upper_anchor,
            full_anchor: params.full_anchor,
            debug_overlay: false,
            font_path: None,

            max_garment_dimension: limits.max_dimension,
            max_garment_bytes: limits.max_bytes,
            placement: PlacementConfig::default(),
        }
    }
}

impl OverlayConfig {
    /// 默认配置文件位置: <config_dir>/tryon-rs/config.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tryon-rs")
            .join("config.json")
    }

    /// 从JSON文件加载配置; 文件不存在时写入默认配置, 解析失败时使用默认值
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 配置文件不存在, 创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    log::warn!("⚠️ {:#}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建配置目录失败: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        log::info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(index) = args.camera {
            self.camera_index = index;
        }
        if let Some(device) = &args.device {
            self.camera_device = Some(device.clone());
        }
        if let Some(garment_type) = args.garment_type {
            self.placement.garment_type = garment_type;
        }
        if let Some(gender) = args.gender {
            self.placement.gender = gender;
        }
        if let Some(scale) = args.scale {
            self.placement = self.placement.with_scale(scale);
        }
        if let Some(offset) = args.offset {
            self.placement = self.placement.with_offset(offset);
        }
        if args.debug {
            self.debug_overlay = true;
        }
    }

    /// 锚点限制在可调范围内
    pub fn placement_params(&self) -> PlacementParams {
        PlacementParams {
            upper_anchor: clamp_anchor("upper_anchor", self.upper_anchor, &UPPER_ANCHOR_RANGE),
            full_anchor: clamp_anchor("full_anchor", self.full_anchor, &FULL_ANCHOR_RANGE),
        }
    }

    pub fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            device_index: self.camera_index,
            width: self.camera_width,
            height: self.camera_height,
            fps: self.camera_fps,
        }
    }

    pub fn garment_limits(&self) -> GarmentLimits {
        GarmentLimits {
            max_bytes: self.max_garment_bytes,
            max_dimension: self.max_garment_dimension,
        }
    }

    /// 字体加载失败只影响状态文字, 不影响会话
    pub fn load_font(&self) -> Option<FontArc> {
        let path = self.font_path.as_ref()?;
        let font = fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => {
                log::info!("✅ 字体加载成功: {}", path.display());
                Some(font)
            }
            Err(e) => {
                log::warn!("⚠️ 字体加载失败 {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn to_settings(&self) -> SessionSettings {
        SessionSettings {
            capture: self.capture_request(),
            render_fps: self.render_fps.max(1),
            params: self.placement_params(),
            debug_overlay: self.debug_overlay,
            font: self.load_font(),
            limits: self.garment_limits(),
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        log::info!("🎛️ 当前配置:");
        log::info!(
            "  摄像头: #{} {}x{} @ {}fps",
            self.camera_index,
            self.camera_width,
            self.camera_height,
            self.camera_fps
        );
        log::info!("  渲染帧率: {}fps", self.render_fps);
        log::info!(
            "  锚点: 上装 {:.2} | 全身 {:.2}",
            self.upper_anchor,
            self.full_anchor
        );
        log::info!(
            "  服装: {} / {} | 缩放 {:.1} | 偏移 {:.0}px",
            self.placement.garment_type,
            self.placement.gender,
            self.placement.scale_multiplier,
            self.placement.vertical_offset
        );
        log::info!(
            "  服装限制: {}px / {} KB",
            self.max_garment_dimension,
            self.max_garment_bytes / 1024
        );
    }
}

fn clamp_anchor(name: &str, value: f64, range: &RangeInclusive<f64>) -> f64 {
    if range.contains(&value) {
        return value;
    }
    let clamped = if value.is_nan() {
        *range.start()
    } else {
        value.clamp(*range.start(), *range.end())
    };
    log::warn!("⚠️ {} = {} 超出范围 {:?}, 使用 {}", name, value, range, clamped);
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("tryon-rs-test-{}-{}", std::process::id(), nanos))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let config = OverlayConfig::default();
        assert_eq!((config.camera_width, config.camera_height), (640, 480));
        assert_eq!(config.render_fps, 60);
        assert_eq!(config.upper_anchor, 0.25);
        assert_eq!(config.full_anchor, 0.12);
        assert_eq!(config.max_garment_dimension, 2048);
        assert_eq!(config.max_garment_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = temp_path("config.json");
        let config = OverlayConfig::load(&path);
        assert_eq!(config, OverlayConfig::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.render_fps = 30;
        changed.placement.garment_type = GarmentType::Full;
        changed.save(&path).unwrap();
        assert_eq!(OverlayConfig::load(&path), changed);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_and_broken_files() {
        let partial: OverlayConfig =
            serde_json::from_str(r#"{"camera_fps": 15, "placement": {"garment_type": "bottom", "gender": "female", "scale_multiplier": 1.5, "vertical_offset": 10.0}}"#)
                .unwrap();
        assert_eq!(partial.camera_fps, 15);
        assert_eq!(partial.camera_width, 640);
        assert_eq!(partial.placement.garment_type, GarmentType::Bottom);
        assert_eq!(partial.placement.gender, Gender::Female);

        let path = temp_path("broken.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(OverlayConfig::load(&path), OverlayConfig::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_anchor_clamped_to_tunable_range() {
        let config = OverlayConfig {
            upper_anchor: 0.5,
            full_anchor: 0.01,
            ..OverlayConfig::default()
        };
        let params = config.placement_params();
        assert_eq!(params.upper_anchor, 0.25);
        assert_eq!(params.full_anchor, 0.10);
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "tryon", "-t", "dress", "--gender", "female", "--scale", "4", "--offset", "-30", "--camera", "2",
            "--debug",
        ])
        .unwrap();
        let mut config = OverlayConfig::default();
        config.apply_args(&args);

        assert_eq!(config.placement.garment_type, GarmentType::Full);
        assert_eq!(config.placement.gender, Gender::Female);
        assert_eq!(config.placement.scale_multiplier, 2.5);
        assert_eq!(config.placement.vertical_offset, -30.0);
        assert_eq!(config.camera_index, 2);
        assert!(config.debug_overlay);
        assert!(config.to_settings().debug_overlay);
    }

    #[test]
    fn test_unknown_garment_type_rejected() {
        assert!(Args::try_parse_from(["tryon", "-t", "hat"]).is_err());
    }
}
