//! 流媒体 HTTP 服务器
//!
//! - `GET /`      查看器页面
//! - `GET /frame` 当前帧的 base64 JPEG；无帧时 204
//! - 其他路径     404
//!
//! 编码在每次请求时进行，并放到阻塞线程池上执行，不占用帧存储的锁。

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::encoder::Encoder;
use crate::error::ServerError;
use crate::frame_store::FrameStore;

pub mod page;

#[derive(Clone)]
struct AppState {
    store: FrameStore,
    encoder: Arc<dyn Encoder>,
    page: Bytes,
}

/// 构建路由
pub fn router(store: FrameStore, encoder: Arc<dyn Encoder>, poll_interval_ms: u64) -> Router {
    let state = AppState {
        store,
        encoder,
        page: Bytes::from(page::viewer_html(poll_interval_ms)),
    };

    Router::new()
        .route("/", get(index))
        .route("/frame", get(frame))
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    debug!("请求: {} {}", request.method(), request.uri().path());
    next.run(request).await
}

async fn index(State(state): State<AppState>) -> Html<Bytes> {
    Html(state.page.clone())
}

async fn frame(State(state): State<AppState>) -> Response {
    let Some(frame) = state.store.get() else {
        return no_frame();
    };
    debug!("编码帧: 距捕获 {:?}", frame.captured_at().elapsed());

    let encoder = state.encoder.clone();
    match tokio::task::spawn_blocking(move || encoder.encode_base64(&frame)).await {
        Ok(Ok(body)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            warn!("帧编码失败: {}", e);
            no_frame()
        }
        Err(e) => {
            warn!("编码任务异常: {}", e);
            no_frame()
        }
    }
}

fn no_frame() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "Not Found",
    )
        .into_response()
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// 流媒体 HTTP 服务器
pub struct StreamingServer {
    config: ServerConfig,
    store: FrameStore,
    encoder: Arc<dyn Encoder>,
    running: Option<RunningServer>,
}

impl StreamingServer {
    /// 创建服务器 (尚未监听)
    pub fn new(config: ServerConfig, store: FrameStore, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            config,
            store,
            encoder,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// 绑定端口并开始接受连接
    ///
    /// 返回实际监听地址；已在运行时直接返回当前地址
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let host: IpAddr = self.config.host.parse().map_err(|e| {
            ServerError::BindFailed(format!("无效的监听地址 {}: {}", self.config.host, e))
        })?;
        let addr = SocketAddr::new(host, self.config.port);

        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => ServerError::PortInUse(self.config.port),
            _ => ServerError::BindFailed(e.to_string()),
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindFailed(e.to_string()))?;

        let app = router(
            self.store.clone(),
            self.encoder.clone(),
            self.config.poll_interval_ms,
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = graceful.await {
                error!("HTTP 服务器异常退出: {}", e);
            }
        });

        info!("HTTP 服务器启动: http://{}", local_addr);
        self.running = Some(RunningServer {
            addr: local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// 关闭监听并结束接受循环
    ///
    /// 等待进行中的请求完成，超过宽限期则强制终止。未启动时调用无副作用
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let mut task = running.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!("HTTP 服务器未在 {:?} 内关闭，强制终止", grace);
            task.abort();
            let _ = task.await;
        }

        info!("HTTP 服务器已停止: {}", running.addr);
    }
}

impl Drop for StreamingServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
        }
    }
}
