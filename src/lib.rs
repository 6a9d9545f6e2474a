//! 实时虚拟试衣引擎
//! Pose-driven garment overlay: camera + pose tracking + per-frame compositing
pub mod config; // 配置文件与命令行参数
pub mod error; // 错误类型
pub mod garment; // 服装图片
pub mod input; // 视频输入系统
pub mod landmarks; // 人体关键点
pub mod placement; // 服装放置引擎
pub mod render; // 渲染合成
pub mod session; // 采集/跟踪会话
pub mod slot; // 单值共享槽
pub mod status; // 状态文本
pub mod tracking; // 姿态跟踪

pub use crate::config::{Args, OverlayConfig};
pub use crate::error::{AssetError, ConfigError, SessionError};
pub use crate::garment::{GarmentAsset, GarmentLimits};
pub use crate::input::{CameraDevice, CaptureRequest, StillCamera, VideoFrame, VideoStream};
pub use crate::landmarks::{Landmark, LandmarkSet, PoseLandmark};
pub use crate::placement::{
    compute_placement, CanvasSize, GarmentType, Gender, Placement, PlacementConfig, PlacementParams,
};
pub use crate::render::{Compositor, TickInputs, TickOutput};
pub use crate::session::{Session, SessionSettings, SessionState};
pub use crate::slot::SharedSlot;
pub use crate::tracking::{
    NoPersonTracker, PoseTracker, PoseTrackerFactory, ReplayTracker, ReplayTrackerFactory,
};

#[cfg(feature = "camera")]
pub use crate::input::FfmpegCamera;
