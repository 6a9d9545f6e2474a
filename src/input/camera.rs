//! 摄像头输入模块 - 基于 ez-ffmpeg 的本地摄像头
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)
//! 解码输出统一转换为 RGBA, 写入共享槽供跟踪线程和渲染线程读取.

use super::{CameraDevice, CaptureRequest, VideoFrame, VideoStream};
use crate::error::SessionError;
use crate::slot::SharedSlot;
use anyhow::anyhow;
use crossbeam_channel::{select, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 等待首帧的时间; 超时视为设备被占用
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
/// stop 等待解码线程退出的时间
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// FFmpeg 本地摄像头
pub struct FfmpegCamera {
    device_name: Option<String>,
}

impl FfmpegCamera {
    /// `device_name` 在 Windows 上是 DirectShow 设备名, 其它平台按索引打开
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// 格式化摄像头URL - 根据平台选择
    fn format_camera_url(index: usize, name: Option<&str>) -> String {
        #[cfg(target_os = "windows")]
        {
            let _ = index;
            format!("video={}", name.unwrap_or("Integrated Camera"))
        }
        #[cfg(target_os = "linux")]
        {
            let _ = name;
            format!("/dev/video{}", index)
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            let _ = name;
            format!("{}", index)
        }
    }

    fn input_format() -> &'static str {
        #[cfg(target_os = "windows")]
        {
            "dshow" // DirectShow
        }
        #[cfg(target_os = "macos")]
        {
            "avfoundation" // AVFoundation
        }
        #[cfg(target_os = "linux")]
        {
            "v4l2" // Video4Linux2
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            "video4linux2" // 默认
        }
    }
}

impl CameraDevice for FfmpegCamera {
    fn open(&self, request: &CaptureRequest) -> Result<Arc<dyn VideoStream>, SessionError> {
        let url = Self::format_camera_url(request.device_index, self.device_name.as_deref());
        let format = Self::input_format();
        log::info!("📷 打开摄像头: {} ({}), 请求 {}x{} @ {}fps", url, format, request.width, request.height, request.fps);

        let frames = Arc::new(SharedSlot::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let (first_tx, first_rx) = crossbeam_channel::bounded::<()>(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<Option<String>>(1);

        let filter = RgbaFrameFilter {
            frames: Arc::clone(&frames),
            stopping: Arc::clone(&stopping),
            first_frame: Some(first_tx),
            frame_id: 0,
            dropped_frames: 0,
            count: 0,
            last: Instant::now(),
        };

        // 构建帧处理管线
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("rgba", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let framerate = request.fps.to_string();
        let video_size = format!("{}x{}", request.width, request.height);
        let input = Input::new(url.as_str())
            .set_format(format)
            .set_input_opts([("framerate", framerate.as_str()), ("video_size", video_size.as_str())].into());

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_descs(["format=rgba"].into())
            .output(out)
            .build()
            .map_err(|e| classify_open_error(&e.to_string()))?;

        let sch = ctx
            .start()
            .map_err(|e| classify_open_error(&e.to_string()))?;

        let handle = thread::Builder::new()
            .name("camera-decode".into())
            .spawn(move || {
                let result = sch.wait();
                let cause = result.err().map(|e| e.to_string());
                log::info!("📹 摄像头解码循环结束");
                let _ = exit_tx.send(cause);
            })
            .map_err(|e| SessionError::DeviceNotFound(format!("failed to spawn decode thread: {}", e)))?;

        let stream = FfmpegStream {
            frames,
            stopping,
            exit_rx,
            handle: Mutex::new(Some(handle)),
            resolution: (request.width, request.height),
        };

        // 等待首帧: 设备被占用时 FFmpeg 往往能启动但一直没有数据
        let exit_rx = stream.exit_rx.clone();
        select! {
            recv(first_rx) -> _ => {
                let resolution = stream
                    .latest_frame()
                    .map(|f| (f.width, f.height))
                    .unwrap_or(stream.resolution);
                log::info!("✅ 摄像头连接成功: {}x{}", resolution.0, resolution.1);
                Ok(Arc::new(FfmpegStream { resolution, ..stream }))
            }
            recv(exit_rx) -> cause => {
                let message = cause.ok().flatten().unwrap_or_else(|| "stream closed before first frame".into());
                let _ = stream.stop();
                Err(classify_open_error(&message))
            }
            default(FIRST_FRAME_TIMEOUT) => {
                log::warn!("⚠️ {} 秒内没有收到摄像头画面", FIRST_FRAME_TIMEOUT.as_secs());
                if let Err(e) = stream.stop() {
                    log::warn!("⚠️ 摄像头停止失败: {}", e);
                }
                Err(SessionError::DeviceBusy)
            }
        }
    }
}

/// 把 FFmpeg 的打开错误归类为权限/设备不存在/设备忙
pub(crate) fn classify_open_error(message: &str) -> SessionError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission denied") || lower.contains("not permitted") || lower.contains("not authorized") {
        SessionError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        SessionError::DeviceBusy
    } else {
        SessionError::DeviceNotFound(message.to_string())
    }
}

struct FfmpegStream {
    frames: Arc<SharedSlot<VideoFrame>>,
    stopping: Arc<AtomicBool>,
    exit_rx: Receiver<Option<String>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    resolution: (u32, u32),
}

impl VideoStream for FfmpegStream {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frames.load().map(|frame| (*frame).clone())
    }

    fn is_live(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.is_live())
    }

    fn stop(&self) -> anyhow::Result<()> {
        // 滤镜在下一帧返回错误, FFmpeg 随之结束解码
        self.stopping.store(true, Ordering::Release);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        if !handle.is_finished() {
            select! {
                recv(self.exit_rx) -> _ => {}
                default(STOP_TIMEOUT) => {
                    return Err(anyhow!("camera decode thread did not exit within {:?}", STOP_TIMEOUT));
                }
            }
        }
        handle
            .join()
            .map_err(|_| anyhow!("camera decode thread panicked"))
    }
}

/// FFmpeg解码过滤器: 摄像头 → RGBA帧
struct RgbaFrameFilter {
    frames: Arc<SharedSlot<VideoFrame>>,
    stopping: Arc<AtomicBool>,
    first_frame: Option<Sender<()>>,
    frame_id: u64,
    dropped_frames: u64,
    count: u64,
    last: Instant,
}

impl FrameFilter for RgbaFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::debug!("✅ 摄像头解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stopping.load(Ordering::Acquire) {
            return Err("camera stopped".to_string());
        }

        unsafe {
            // 基本检查：空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                return Ok(None);
            }

            let av = &*frame.as_ptr();
            let w = av.width as u32;
            let h = av.height as u32;
            let stride = av.linesize[0] as usize;
            let plane = av.data[0];

            // 检查分辨率和步长合法性
            if w == 0 || h == 0 || plane.is_null() || stride < w as usize * 4 {
                self.dropped_frames += 1;
                if self.dropped_frames <= 10 {
                    log::warn!("⚠️ 丢弃帧: {}x{} stride={}", w, h, stride);
                }
                return Ok(None);
            }

            let row_bytes = w as usize * 4;
            let mut rgba = Vec::with_capacity(row_bytes * h as usize);
            for y in 0..h as usize {
                let row = std::slice::from_raw_parts(plane.add(y * stride), row_bytes);
                rgba.extend_from_slice(row);
            }

            self.frame_id += 1;
            self.frames
                .store(VideoFrame::new(Arc::new(rgba), w, h, self.frame_id));
        }

        if let Some(tx) = self.first_frame.take() {
            let _ = tx.send(());
        }

        // 每秒打印一次采集统计
        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            log::debug!(
                "📺 采集统计: {:.1}fps | 总帧{} | 丢弃{}",
                self.count as f64 / elapsed,
                self.frame_id,
                self.dropped_frames
            );
            self.count = 0;
            self.last = Instant::now();
        }

        Ok(Some(frame))
    }
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            log::warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
