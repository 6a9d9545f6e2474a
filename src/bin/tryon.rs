/// 实时虚拟试衣 (Virtual Try-On)
///
/// 系统架构:
/// 1. 采集线程: 打开摄像头, 创建姿态跟踪会话
/// 2. 喂帧线程: 最新帧 → 姿态跟踪 → 关键点槽
/// 3. 渲染线程: 镜像视频 + 服装合成 → 输出槽
/// 4. 主线程:   macroquad 窗口显示合成结果, 键盘调整参数
use anyhow::Context;
use clap::Parser;
use macroquad::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tryon_rs::{
    Args, CameraDevice, GarmentType, NoPersonTracker, OverlayConfig, PoseTrackerFactory,
    ReplayTrackerFactory, Session, StillCamera,
};

const SCALE_STEP: f32 = 0.1;
const OFFSET_STEP: f32 = 5.0;
// macroquad 默认字体没有中文字形
const HELP: &str = "1/2/3 type  G gender  +/- scale  Up/Down offset  R restart  C clear  L reload  Esc quit";

fn window_conf() -> Conf {
    Conf {
        window_title: "实时虚拟试衣".to_owned(),
        window_width: 640,
        window_height: 480,
        high_dpi: false,
        ..Default::default()
    }
}

fn open_camera(args: &Args, config: &OverlayConfig) -> Arc<dyn CameraDevice> {
    if let Some(still) = &args.still {
        log::info!("🖼️ 使用静态图片代替摄像头: {}", still.display());
        return Arc::new(StillCamera::from_path(still));
    }

    #[cfg(feature = "camera")]
    {
        for (index, name) in tryon_rs::input::get_camera_devices() {
            log::info!("  📷 [{}] {}", index, name);
        }
        return Arc::new(tryon_rs::FfmpegCamera::new(config.camera_device.clone()));
    }

    #[cfg(not(feature = "camera"))]
    {
        let _ = config;
        log::warn!("⚠️ 未启用 camera feature, 使用纯色画面 (加 --still 指定图片)");
        Arc::new(StillCamera::solid(::image::Rgba([40, 40, 40, 255])))
    }
}

fn pose_source(args: &Args) -> Arc<dyn PoseTrackerFactory> {
    match &args.landmarks {
        Some(path) => {
            log::info!("🦴 关键点回放: {}", path.display());
            Arc::new(ReplayTrackerFactory::new(path))
        }
        None => {
            log::warn!("⚠️ 没有姿态来源 (--landmarks), 不会检测到人");
            Arc::new(NoPersonTracker)
        }
    }
}

/// macroquad 纹理尺寸是 u16; 超出时跳过这一帧
fn texture_size(surface: &::image::RgbaImage) -> Option<(u16, u16)> {
    match (u16::try_from(surface.width()), u16::try_from(surface.height())) {
        (Ok(w), Ok(h)) => Some((w, h)),
        _ => {
            log::warn!("⚠️ 画面尺寸超出纹理上限: {}x{}", surface.width(), surface.height());
            None
        }
    }
}

/// 键盘控制; 返回 false 表示退出
fn handle_keys(session: &Session, garment: Option<&Path>) -> anyhow::Result<bool> {
    if is_key_pressed(KeyCode::Escape) {
        return Ok(false);
    }

    let selected = if is_key_pressed(KeyCode::Key1) {
        Some(GarmentType::Upper)
    } else if is_key_pressed(KeyCode::Key2) {
        Some(GarmentType::Bottom)
    } else if is_key_pressed(KeyCode::Key3) {
        Some(GarmentType::Full)
    } else {
        None
    };
    if let Some(garment_type) = selected {
        session.update_config(|c| c.with_garment_type(garment_type));
        log::info!("👕 服装类别: {}", garment_type);
    }

    if is_key_pressed(KeyCode::G) {
        let config = session.update_config(|mut c| {
            c.gender = c.gender.toggled();
            c
        });
        log::info!("🚻 性别: {}", config.gender);
    }

    let scale_delta = if is_key_pressed(KeyCode::Equal) || is_key_pressed(KeyCode::KpAdd) {
        SCALE_STEP
    } else if is_key_pressed(KeyCode::Minus) || is_key_pressed(KeyCode::KpSubtract) {
        -SCALE_STEP
    } else {
        0.0
    };
    if scale_delta != 0.0 {
        let config = session.update_config(|c| c.with_scale(c.scale_multiplier + scale_delta));
        log::info!("🔍 缩放: {:.1}", config.scale_multiplier);
    }

    let offset_delta = if is_key_pressed(KeyCode::Up) {
        -OFFSET_STEP
    } else if is_key_pressed(KeyCode::Down) {
        OFFSET_STEP
    } else {
        0.0
    };
    if offset_delta != 0.0 {
        let config = session.update_config(|c| c.with_offset(c.vertical_offset + offset_delta));
        log::info!("↕️ 垂直偏移: {:.0}px", config.vertical_offset);
    }

    if is_key_pressed(KeyCode::R) {
        log::info!("🔄 重新启动会话");
        session.start()?;
    }
    if is_key_pressed(KeyCode::C) {
        session.set_garment(None);
    }
    if is_key_pressed(KeyCode::L) {
        if let Some(path) = garment {
            // 失败已记录日志, 继续无服装渲染
            let _ = session.load_garment(path);
        }
    }

    Ok(true)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config_path = args.config.clone().unwrap_or_else(OverlayConfig::default_path);
    let mut config = OverlayConfig::load(&config_path);
    config.apply_args(&args);
    config.log_summary();

    let session = Session::new(open_camera(&args, &config), pose_source(&args), config.to_settings());
    session.set_config(config.placement);
    if let Some(garment) = &args.garment {
        let _ = session.load_garment(garment);
    }
    session.start().context("启动会话失败")?;

    let mut texture: Option<Texture2D> = None;
    let mut last_version = 0u64;

    log::info!("✅ 系统就绪");
    loop {
        if !handle_keys(&session, args.garment.as_deref())? {
            break;
        }

        // 只在有新画面时更新纹理
        let (version, surface) = session.latest_surface();
        if version != last_version {
            last_version = version;
            if let Some((surface, (w, h))) = surface.and_then(|s| texture_size(&s).map(|size| (s, size))) {
                let needs_rebuild = texture
                    .as_ref()
                    .map_or(true, |tex| tex.width() != w as f32 || tex.height() != h as f32);
                if needs_rebuild {
                    let tex = Texture2D::from_rgba8(w, h, surface.as_raw());
                    tex.set_filter(FilterMode::Linear);
                    texture = Some(tex);
                } else if let Some(tex) = &texture {
                    tex.update(&Image {
                        bytes: surface.as_raw().clone(),
                        width: w,
                        height: h,
                    });
                }
            }
        }

        clear_background(BLACK);
        if let Some(tex) = &texture {
            draw_texture_ex(
                tex,
                0.0,
                0.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(screen_width(), screen_height())),
                    ..Default::default()
                },
            );
        }

        let config = session.config();
        draw_text(&session.status(), 10.0, 24.0, 24.0, YELLOW);
        draw_text(
            &format!(
                "{} | {} | x{:.1} | {:+.0}px",
                config.garment_type, config.gender, config.scale_multiplier, config.vertical_offset
            ),
            10.0,
            48.0,
            20.0,
            WHITE,
        );
        draw_text(HELP, 10.0, screen_height() - 10.0, 18.0, GRAY);

        next_frame().await;
    }

    session.stop();
    log::info!("👋 退出");
    Ok(())
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        log::error!("❌ {:#}", e);
        std::process::exit(1);
    }
}
