//! screenmirror - 局域网屏幕镜像库
//!
//! 捕获虚拟显示器画面，保存最新一帧，并通过 HTTP 以 JPEG 提供给浏览器轮询

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame_store;
pub mod network;
pub mod security;
pub mod server;
pub mod session;

pub use capture::{CapturePipeline, Frame};
pub use error::{CaptureError, EncodeError, ServerError, SessionError};
pub use frame_store::FrameStore;
pub use server::StreamingServer;
pub use session::{SessionController, SessionState};
