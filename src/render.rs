//! 渲染合成
//! Per-tick compositor (mirrored video + garment + diagnostics) and the render loop thread

use crate::garment::GarmentAsset;
use crate::input::VideoFrame;
use crate::landmarks::{LandmarkSet, PoseLandmark};
use crate::placement::{compute_placement, CanvasSize, Placement, PlacementConfig, PlacementParams};
use crate::session::{SessionState, Shared};
use crate::status::{derive_status, StatusInputs};
use ab_glyph::{FontArc, PxScale};
use crossbeam_channel::{select, Receiver};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 缩放后的服装超过这个尺寸就不画了 (极端宽高比)
const MAX_DRAW_DIMENSION: u32 = 8192;

const LANDMARK_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 200, 0, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LANDMARK_RADIUS: i32 = 4;
const TEXT_SCALE: f32 = 20.0;

/// 调试叠加层显示的关键点
const DEBUG_LANDMARKS: [PoseLandmark; 4] = [
    PoseLandmark::LeftShoulder,
    PoseLandmark::RightShoulder,
    PoseLandmark::LeftHip,
    PoseLandmark::RightHip,
];

/// 单次 tick 的输入快照
#[derive(Clone, Copy)]
pub struct TickInputs<'a> {
    pub state: &'a SessionState,
    pub frame: Option<&'a VideoFrame>,
    pub landmarks: Option<&'a LandmarkSet>,
    pub garment: Option<&'a Arc<GarmentAsset>>,
    pub config: &'a PlacementConfig,
}

pub struct TickOutput {
    pub surface: RgbaImage,
    pub status: String,
    pub placement: Option<Placement>,
}

/// 缩放后的服装缓存 (同一资源同一尺寸不重复缩放)
struct ScaledGarment {
    source: Arc<GarmentAsset>,
    size: (u32, u32),
    image: RgbaImage,
}

pub struct Compositor {
    width: u32,
    height: u32,
    params: PlacementParams,
    debug_overlay: bool,
    font: Option<FontArc>,
    scaled: Option<ScaledGarment>,
}

impl Compositor {
    /// `width`/`height` 是还没有画面时的画布尺寸; 有画面后画布跟随视频分辨率
    pub fn new(width: u32, height: u32, params: PlacementParams) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            params,
            debug_overlay: false,
            font: None,
            scaled: None,
        }
    }

    pub fn with_debug_overlay(mut self, enabled: bool) -> Self {
        self.debug_overlay = enabled;
        self
    }

    pub fn with_font(mut self, font: Option<FontArc>) -> Self {
        self.font = font;
        self
    }

    pub fn render(&mut self, inputs: &TickInputs<'_>) -> TickOutput {
        // 1. 清空 + 镜像视频
        let mirrored = inputs.frame.and_then(mirrored_frame);
        let has_frame = mirrored.is_some();
        let mut surface = mirrored.unwrap_or_else(|| RgbaImage::new(self.width, self.height));
        let canvas = CanvasSize::new(surface.width(), surface.height());

        // 2. 服装 (资源和尺寸来自同一个 Arc)
        let placement = inputs.garment.and_then(|garment| {
            compute_placement(
                inputs.landmarks,
                garment.dimensions(),
                inputs.config,
                &self.params,
                canvas,
            )
        });
        if let (Some(garment), Some(placement)) = (inputs.garment, placement.as_ref()) {
            self.draw_garment(&mut surface, garment, placement);
        }

        // 3. 调试叠加层
        if self.debug_overlay {
            if let Some(landmarks) = inputs.landmarks {
                draw_landmarks(&mut surface, landmarks);
            }
            if let Some((x, y, w, h)) = placement.as_ref().and_then(Placement::to_pixel_rect) {
                if let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) {
                    draw_hollow_rect_mut(&mut surface, Rect::at(x, y).of_size(w, h), OUTLINE_COLOR);
                }
            }
        }

        // 4. 状态
        let status = derive_status(&StatusInputs {
            state: inputs.state,
            has_frame,
            has_landmarks: inputs.landmarks.is_some(),
            has_garment: inputs.garment.is_some(),
            garment_type: inputs.config.garment_type,
            placement: placement.as_ref(),
        });
        if let Some(font) = &self.font {
            draw_text_mut(&mut surface, TEXT_COLOR, 10, 10, PxScale::from(TEXT_SCALE), font, &status);
        }

        TickOutput {
            surface,
            status,
            placement,
        }
    }

    fn draw_garment(&mut self, surface: &mut RgbaImage, garment: &Arc<GarmentAsset>, placement: &Placement) {
        let Some((x, y, w, h)) = placement.to_pixel_rect() else {
            return;
        };
        if w > MAX_DRAW_DIMENSION || h > MAX_DRAW_DIMENSION {
            log::debug!("服装尺寸过大, 跳过绘制: {}x{}", w, h);
            return;
        }

        let cached = self
            .scaled
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(&c.source, garment) && c.size == (w, h));
        if !cached {
            let image = if garment.dimensions() == (w, h) {
                garment.image().clone()
            } else {
                imageops::resize(garment.image(), w, h, FilterType::Triangle)
            };
            self.scaled = Some(ScaledGarment {
                source: Arc::clone(garment),
                size: (w, h),
                image,
            });
        }

        // overlay 按 alpha 混合并裁剪到画布内
        if let Some(scaled) = &self.scaled {
            imageops::overlay(surface, &scaled.image, x, y);
        }
    }
}

/// 水平翻转 (自拍视角)
fn mirrored_frame(frame: &VideoFrame) -> Option<RgbaImage> {
    let view = frame.as_image()?;
    Some(imageops::flip_horizontal(&view))
}

fn draw_landmarks(surface: &mut RgbaImage, landmarks: &LandmarkSet) {
    let (w, h) = (surface.width() as f32, surface.height() as f32);
    for landmark in DEBUG_LANDMARKS {
        if let Some(point) = landmarks.get(landmark) {
            let cx = ((1.0 - point.x) * w).round() as i32;
            let cy = (point.y * h).round() as i32;
            draw_filled_circle_mut(surface, (cx, cy), LANDMARK_RADIUS, LANDMARK_COLOR);
        }
    }
}

/// 渲染循环: 按固定间隔合成一帧, 发布画面和状态.
///
/// 会话离开 Acquiring/Tracking 后再画最后一帧 (显示错误状态) 即停止调度.
pub(crate) fn run_render_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut compositor: Compositor,
    interval: Duration,
    stop_rx: Receiver<()>,
) {
    let ticker = crossbeam_channel::tick(interval);
    let mut count = 0u64;
    let mut total = 0u64;
    let mut last = Instant::now();
    log::debug!("🎨 渲染循环启动: 间隔 {:?}", interval);

    loop {
        shared.pending_ticks.store(1, Ordering::Release);
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {}
        }
        if !shared.is_current(generation) {
            break;
        }

        let state = shared.state();
        let frame = shared.stream.load().and_then(|stream| stream.latest_frame());
        let landmarks = shared.landmarks.load();
        let garment = shared.garment.load();
        let config = shared.config.load().map(|c| *c).unwrap_or_default();

        let output = compositor.render(&TickInputs {
            state: &state,
            frame: frame.as_ref(),
            landmarks: landmarks.as_deref(),
            garment: garment.as_ref(),
            config: &config,
        });
        shared.surface.store(output.surface);
        if shared.set_status(output.status.clone()) {
            log::info!("💬 {}", output.status);
        }

        count += 1;
        total += 1;
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            log::debug!("🎬 渲染统计: {:.1}fps | 总帧{}", count as f64 / elapsed, total);
            count = 0;
            last = Instant::now();
        }

        if !state.is_active() {
            break;
        }
    }

    shared.pending_ticks.store(0, Ordering::Release);
    log::debug!("🎨 渲染循环结束 ({} 帧)", total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;
    use crate::placement::GarmentType;

    fn frame_with_left_red(w: u32, h: u32) -> VideoFrame {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 255]));
        for y in 0..h {
            img.put_pixel(0, y, Rgba([255, 0, 0, 255]));
        }
        VideoFrame::new(Arc::new(img.into_raw()), w, h, 1)
    }

    fn person() -> LandmarkSet {
        let mut points = vec![None; PoseLandmark::COUNT];
        points[PoseLandmark::LeftShoulder.index()] = Some(Landmark::new(0.6, 0.4));
        points[PoseLandmark::RightShoulder.index()] = Some(Landmark::new(0.4, 0.4));
        LandmarkSet::new(points)
    }

    fn garment(w: u32, h: u32, color: Rgba<u8>) -> Arc<GarmentAsset> {
        Arc::new(GarmentAsset::from_rgba(RgbaImage::from_pixel(w, h, color)).unwrap())
    }

    #[test]
    fn test_video_is_mirrored() {
        let mut compositor = Compositor::new(640, 480, PlacementParams::default());
        let frame = frame_with_left_red(8, 4);
        let config = PlacementConfig::default();
        let output = compositor.render(&TickInputs {
            state: &SessionState::Tracking,
            frame: Some(&frame),
            landmarks: None,
            garment: None,
            config: &config,
        });
        assert_eq!(output.surface.dimensions(), (8, 4));
        assert_eq!(output.surface.get_pixel(7, 2), &Rgba([255, 0, 0, 255]));
        assert_eq!(output.surface.get_pixel(0, 2), &Rgba([0, 0, 255, 255]));
        assert_eq!(output.status, crate::status::NO_PERSON);
    }

    #[test]
    fn test_no_frame_clears_to_default_canvas() {
        let mut compositor = Compositor::new(32, 24, PlacementParams::default());
        let config = PlacementConfig::default();
        let output = compositor.render(&TickInputs {
            state: &SessionState::Acquiring,
            frame: None,
            landmarks: None,
            garment: None,
            config: &config,
        });
        assert_eq!(output.surface.dimensions(), (32, 24));
        assert_eq!(output.surface.get_pixel(5, 5), &Rgba([0, 0, 0, 0]));
        assert_eq!(output.status, crate::status::WAITING_FOR_CAMERA);
    }

    #[test]
    fn test_garment_drawn_at_placement() {
        let mut compositor = Compositor::new(640, 480, PlacementParams::default());
        let frame = VideoFrame::new(Arc::new(vec![0; 640 * 480 * 4]), 640, 480, 1);
        let landmarks = person();
        let shirt = garment(100, 100, Rgba([0, 255, 0, 255]));
        let config = PlacementConfig::default();

        let output = compositor.render(&TickInputs {
            state: &SessionState::Tracking,
            frame: Some(&frame),
            landmarks: Some(&landmarks),
            garment: Some(&shirt),
            config: &config,
        });

        // x = 236.8, y = 192 - 0.25 * 166.4 = 150.4, w = h = 166.4
        let placement = output.placement.unwrap();
        assert!((placement.x - 236.8).abs() < 1e-3);
        assert!((placement.y - 150.4).abs() < 1e-3);
        assert_eq!(output.status, "upper garment placed (166x166 px)");
        assert_eq!(output.surface.get_pixel(300, 150), &Rgba([0, 255, 0, 255]));
        assert_eq!(output.surface.get_pixel(100, 150), &Rgba([0, 0, 0, 0]));
        assert_eq!(output.surface.get_pixel(300, 300), &Rgba([0, 255, 0, 255]));
        // 服装底边约在第 317 行
        assert_eq!(output.surface.get_pixel(300, 330), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_asset_swap_uses_matching_dimensions() {
        let mut compositor = Compositor::new(640, 480, PlacementParams::default());
        let frame = VideoFrame::new(Arc::new(vec![0; 640 * 480 * 4]), 640, 480, 1);
        let landmarks = person();
        let config = PlacementConfig::default();
        let wide = garment(200, 100, Rgba([255, 0, 0, 255]));
        let tall = garment(100, 200, Rgba([0, 0, 255, 255]));

        let mut render = |asset: &Arc<GarmentAsset>| {
            compositor.render(&TickInputs {
                state: &SessionState::Tracking,
                frame: Some(&frame),
                landmarks: Some(&landmarks),
                garment: Some(asset),
                config: &config,
            })
        };

        let first = render(&wide).placement.unwrap();
        assert!((first.width / first.height - 2.0).abs() < 1e-9);

        let second = render(&tall);
        let placement = second.placement.unwrap();
        assert!((placement.width / placement.height - 0.5).abs() < 1e-9);
        // 新资源的像素, 而不是缓存里旧资源的像素
        let (x, y, w, h) = placement.to_pixel_rect().unwrap();
        let center = second
            .surface
            .get_pixel((x + w as i64 / 2) as u32, (y + h as i64 / 2) as u32);
        assert_eq!(center, &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_full_garment_ignores_aspect() {
        let mut compositor = Compositor::new(640, 480, PlacementParams::default());
        let landmarks = person();
        let dress = garment(10, 90, Rgba([9, 9, 9, 255]));
        let config = PlacementConfig {
            garment_type: GarmentType::Full,
            ..PlacementConfig::default()
        };
        let output = compositor.render(&TickInputs {
            state: &SessionState::Tracking,
            frame: None,
            landmarks: Some(&landmarks),
            garment: Some(&dress),
            config: &config,
        });
        assert!((output.placement.unwrap().height - 336.0).abs() < 1e-3);
    }

    #[test]
    fn test_debug_overlay_marks_shoulders() {
        let mut compositor =
            Compositor::new(640, 480, PlacementParams::default()).with_debug_overlay(true);
        let frame = VideoFrame::new(Arc::new(vec![0; 640 * 480 * 4]), 640, 480, 1);
        let landmarks = person();
        let config = PlacementConfig::default();
        let output = compositor.render(&TickInputs {
            state: &SessionState::Tracking,
            frame: Some(&frame),
            landmarks: Some(&landmarks),
            garment: None,
            config: &config,
        });
        // 左肩 x=0.6 镜像后在 256
        assert_eq!(output.surface.get_pixel(256, 192), &LANDMARK_COLOR);
        assert_eq!(output.status, crate::status::NO_GARMENT);
    }
}
