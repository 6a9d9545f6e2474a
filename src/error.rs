//! 错误类型
//! Error types shared by the session, input and config layers

use std::path::PathBuf;
use thiserror::Error;

/// 会话级致命错误 (Session-fatal faults)
///
/// 任何一个都会让当前会话进入 `Error` 状态, 不会自动重试.
/// 文本会原样显示为状态字符串.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera not found: {0}")]
    DeviceNotFound(String),

    #[error("camera is busy (in use by another application)")]
    DeviceBusy,

    #[error("pose tracking failed to initialize: {0}")]
    TrackingInit(String),

    #[error("camera stream ended unexpectedly")]
    DeviceDisconnected,
}

/// 服装图片加载错误
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("garment image is empty")]
    Empty,

    #[error("garment image too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("garment image has zero width or height")]
    ZeroSize,

    #[error("failed to decode garment image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to read garment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 配置值解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown garment type: {0} (expected upper, bottom or full)")]
    UnknownGarmentType(String),

    #[error("unknown gender: {0} (expected male or female)")]
    UnknownGender(String),
}
