//! 会话控制
//!
//! 负责一次镜像会话的启动与停止：把捕获管线接到帧存储，启动/停止 HTTP 服务器，
//! 并保证资源按固定顺序释放。
//!
//! 启动是原子的：任何一步失败都会回滚到 `Idle`。同一进程内最多一个活动会话。
//! 停止顺序：虚拟显示器 → 缓冲区池 → 捕获句柄 → HTTP 服务器 → 清空帧存储。

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::capture::pipeline::capture_active_in_process;
use crate::capture::{CaptureBackend, CapturePipeline, DisplayInfo, PipelineStats};
use crate::config::Config;
use crate::encoder::{Encoder, JpegEncoder};
use crate::error::SessionError;
use crate::frame_store::FrameStore;
use crate::network;
use crate::server::StreamingServer;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "空闲"),
            SessionState::Capturing => write!(f, "捕获中"),
        }
    }
}

/// 活动会话信息
#[derive(Debug, Clone)]
struct ActiveSession {
    id: Uuid,
    display: DisplayInfo,
    addr: SocketAddr,
    url: String,
}

/// 会话控制器
pub struct SessionController {
    config: Config,
    store: FrameStore,
    // 字段顺序即 drop 顺序：捕获管线先于服务器释放
    // 停止时会等待平台线程退出，需放到阻塞线程池上执行
    pipeline: Arc<Mutex<CapturePipeline>>,
    server: StreamingServer,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// 创建会话控制器
    ///
    /// # 参数
    /// * `config` - 应用配置
    /// * `backend` - 平台捕获原语
    pub fn new(config: Config, backend: Box<dyn CaptureBackend>) -> Self {
        let encoder: Arc<dyn Encoder> = Arc::new(JpegEncoder::new(config.encoder.jpeg_quality));
        Self::with_encoder(config, backend, encoder)
    }

    /// 使用指定编码器创建会话控制器
    pub fn with_encoder(
        config: Config,
        backend: Box<dyn CaptureBackend>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let store = FrameStore::new();
        let pipeline = CapturePipeline::new(backend, store.clone(), config.capture.buffer_depth);
        let server = StreamingServer::new(config.server.clone(), store.clone(), encoder);

        Self {
            config,
            store,
            pipeline: Arc::new(Mutex::new(pipeline)),
            server,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Capturing
        } else {
            SessionState::Idle
        }
    }

    /// 浏览器访问地址，仅在捕获中可用
    pub fn server_url(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.url.as_str())
    }

    /// HTTP 服务器实际监听地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|s| s.addr)
    }

    /// 当前虚拟显示器
    pub fn display(&self) -> Option<DisplayInfo> {
        self.active.as_ref().map(|s| s.display)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|s| s.id)
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn pipeline_stats(&self) -> Arc<PipelineStats> {
        self.pipeline.lock().stats()
    }

    pub fn is_server_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn is_capturing(&self) -> bool {
        self.pipeline.lock().is_running()
    }

    /// 启动镜像会话，返回浏览器访问地址
    ///
    /// 捕获失败时服务器不会启动；服务器启动失败时先停止捕获再返回错误。
    /// 本进程已有活动会话时返回 [`SessionError::AlreadyActive`]
    pub async fn start(&mut self, token: &str) -> Result<String, SessionError> {
        if self.active.is_some() || capture_active_in_process() {
            return Err(SessionError::AlreadyActive);
        }

        let display = {
            let mut pipeline = self.pipeline.lock();
            let metrics = pipeline.display_metrics();
            let width = self.config.capture.width.unwrap_or(metrics.width);
            let height = self.config.capture.height.unwrap_or(metrics.height);
            let density = self.config.capture.density.unwrap_or(metrics.density);
            pipeline.start(token, width, height, density)?
        };

        let addr = match self.server.start().await {
            Ok(addr) => addr,
            Err(e) => {
                error!("HTTP 服务器启动失败: {}, 回滚捕获", e);
                self.stop_pipeline().await;
                self.store.clear();
                return Err(e.into());
            }
        };

        let url = network::server_url(reachable_ip(addr.ip()), addr.port());
        let id = Uuid::new_v4();
        info!("镜像会话 {} 已启动: {}", id, url);

        self.active = Some(ActiveSession {
            id,
            display,
            addr,
            url: url.clone(),
        });
        Ok(url)
    }

    /// 停止镜像会话
    ///
    /// 可重复调用，未启动时调用无副作用
    pub async fn stop(&mut self) {
        self.stop_pipeline().await;
        self.server.stop().await;
        self.store.clear();

        if let Some(session) = self.active.take() {
            info!("镜像会话 {} 已停止", session.id);
        }
    }

    async fn stop_pipeline(&self) {
        let pipeline = self.pipeline.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pipeline.lock().stop()).await {
            error!("停止捕获管线异常: {}", e);
        }
    }
}

/// 浏览器可访问的地址
///
/// 监听所有网卡时解析局域网地址；监听回环时使用 localhost
fn reachable_ip(bound: IpAddr) -> Option<IpAddr> {
    if bound.is_unspecified() {
        network::get_local_ip()
    } else if bound.is_loopback() {
        None
    } else {
        Some(bound)
    }
}
