/// 视频输入系统 (Video Input System)
///
/// 摄像头是外部能力, 这里只定义接口和两个实现:
/// - FfmpegCamera: 本地摄像头 (DirectShow/AVFoundation/V4L2, 需要 `camera` feature)
/// - StillCamera:  静态图片循环输出, 用于演示和测试
#[cfg(feature = "camera")]
pub mod camera;
pub mod still;

#[cfg(feature = "camera")]
pub use camera::{get_camera_devices, FfmpegCamera};
pub use still::StillCamera;

use crate::error::SessionError;
use image::{ImageBuffer, Rgba};
use std::sync::Arc;

/// 参考分辨率
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// 已解码帧 (采集线程 → 跟踪线程 + 渲染线程)
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub rgba_data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
    pub frame_id: u64, // 帧序号, 每个新帧递增
}

impl VideoFrame {
    pub fn new(rgba_data: Arc<Vec<u8>>, width: u32, height: u32, frame_id: u64) -> Self {
        Self {
            rgba_data,
            width,
            height,
            frame_id,
        }
    }

    /// 零拷贝视图; 缓冲区长度与尺寸不符时返回 None
    pub fn as_image(&self) -> Option<ImageBuffer<Rgba<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.rgba_data.as_slice())
    }
}

/// 摄像头请求参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: 30,
        }
    }
}

/// 已打开的视频流
pub trait VideoStream: Send + Sync {
    /// 协商后的分辨率
    fn resolution(&self) -> (u32, u32);

    /// 最新一帧 (首帧到达前为 None)
    fn latest_frame(&self) -> Option<VideoFrame>;

    /// 流是否仍在产生帧
    fn is_live(&self) -> bool;

    /// 仍在运行的采集轨道数
    fn active_tracks(&self) -> usize;

    /// 停止所有轨道, 可重复调用
    fn stop(&self) -> anyhow::Result<()>;
}

/// 摄像头设备: 打开即请求权限/设备
pub trait CameraDevice: Send + Sync {
    fn open(&self, request: &CaptureRequest) -> Result<Arc<dyn VideoStream>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_view_checks_length() {
        let frame = VideoFrame::new(Arc::new(vec![0; 4 * 4 * 4]), 4, 4, 1);
        assert!(frame.as_image().is_some());
        let bad = VideoFrame::new(Arc::new(vec![0; 10]), 4, 4, 2);
        assert!(bad.as_image().is_none());
    }
}
