//! 静态图片输入 - 以固定帧率重复输出同一张图片
//!
//! 没有摄像头 (或未启用 `camera` feature) 时用于演示, 行为和真实流一致:
//! 独立线程, 帧序号递增, stop 之后轨道数归零.

use super::{CameraDevice, CaptureRequest, VideoFrame, VideoStream};
use crate::error::SessionError;
use crate::slot::SharedSlot;
use anyhow::anyhow;
use crossbeam_channel::{select, Sender};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum StillSource {
    File(PathBuf),
    Solid(Rgba<u8>),
}

/// 静态图片"摄像头"
pub struct StillCamera {
    source: StillSource,
}

impl StillCamera {
    /// 打开时读取图片文件; 文件不存在视为设备不存在
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            source: StillSource::File(path.as_ref().to_path_buf()),
        }
    }

    /// 纯色画面
    pub fn solid(color: Rgba<u8>) -> Self {
        Self {
            source: StillSource::Solid(color),
        }
    }

    fn load(&self, width: u32, height: u32) -> Result<RgbaImage, SessionError> {
        match &self.source {
            StillSource::Solid(color) => Ok(RgbaImage::from_pixel(width, height, *color)),
            StillSource::File(path) => {
                let img = image::open(path)
                    .map_err(|e| SessionError::DeviceNotFound(format!("{}: {}", path.display(), e)))?
                    .to_rgba8();
                if img.dimensions() == (width, height) {
                    Ok(img)
                } else {
                    Ok(imageops::resize(&img, width, height, FilterType::Triangle))
                }
            }
        }
    }
}

impl CameraDevice for StillCamera {
    fn open(&self, request: &CaptureRequest) -> Result<Arc<dyn VideoStream>, SessionError> {
        if request.width == 0 || request.height == 0 {
            return Err(SessionError::DeviceNotFound(format!(
                "unsupported resolution {}x{}",
                request.width, request.height
            )));
        }

        let image = self.load(request.width, request.height)?;
        let pixels = Arc::new(image.into_raw());
        let frames = Arc::new(SharedSlot::new());
        let live = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let interval = Duration::from_secs_f64(1.0 / request.fps.max(1) as f64);
        let (width, height) = (request.width, request.height);
        let frames_ref = Arc::clone(&frames);
        let live_ref = Arc::clone(&live);

        // 首帧同步写入, open 返回后即可读到
        frames.store(VideoFrame::new(Arc::clone(&pixels), width, height, 1));

        let handle = thread::Builder::new()
            .name("still-camera".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                let mut frame_id = 1u64;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            frame_id += 1;
                            frames_ref.store(VideoFrame::new(Arc::clone(&pixels), width, height, frame_id));
                        }
                    }
                }
                live_ref.store(false, Ordering::Release);
                log::debug!("📷 静态图片输出线程结束 ({} 帧)", frame_id);
            })
            .map_err(|e| SessionError::DeviceNotFound(format!("failed to spawn capture thread: {}", e)))?;

        log::info!("📷 静态图片输入已打开: {}x{} @ {}fps", width, height, request.fps);

        Ok(Arc::new(StillStream {
            frames,
            live,
            resolution: (width, height),
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        }))
    }
}

struct StillStream {
    frames: Arc<SharedSlot<VideoFrame>>,
    live: Arc<AtomicBool>,
    resolution: (u32, u32),
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl VideoStream for StillStream {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frames.load().map(|frame| (*frame).clone())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.is_live())
    }

    fn stop(&self) -> anyhow::Result<()> {
        // 断开通道即通知线程退出
        drop(
            self.stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("still camera thread panicked"))?;
        }
        self.live.store(false, Ordering::Release);
        Ok(())
    }
}
