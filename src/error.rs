//! 错误类型
//!
//! 各组件边界上的错误分类：捕获、服务器、编码以及会话

use thiserror::Error;

/// 屏幕捕获错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// 授权 token 无效或已过期
    #[error("Capture permission denied")]
    PermissionDenied,

    /// 虚拟显示器创建失败
    #[error("Virtual display setup failed: {0}")]
    DisplaySetupFailed(String),
}

/// HTTP 服务器错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// 端口已被占用
    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// 其他绑定错误
    #[error("Failed to bind listener: {0}")]
    BindFailed(String),
}

/// 帧编码错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// 单帧编码失败，不影响后续帧
    #[error("Frame encoding failed: {0}")]
    TransientFailure(String),
}

/// 会话错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// 已有活动会话
    #[error("A capture session is already active")]
    AlreadyActive,
}
