//! 原始缓冲区池
//!
//! 平台向 [`Surface`] 写入像素，缓冲区数量有上限 (默认 2)。
//! 缓冲区在 [`RawBuffer`] 被 drop 时归还；一直不归还会让后续捕获停顿。

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use super::PixelFormat;

/// 缓冲区到达回调，在平台线程上执行
pub type BufferCallback = Arc<dyn Fn(RawBuffer) + Send + Sync>;

struct PoolState {
    free: Vec<Vec<u8>>,
    allocated: usize,
    closed: bool,
}

struct PoolShared {
    width: u32,
    height: u32,
    format: PixelFormat,
    depth: usize,
    state: Mutex<PoolState>,
    callback: Mutex<Option<BufferCallback>>,
}

impl PoolShared {
    fn give_back(&self, data: Vec<u8>) {
        let mut state = self.state.lock();
        if state.closed {
            state.allocated -= 1;
        } else {
            state.free.push(data);
        }
    }
}

/// 固定深度的缓冲区池，由捕获管线持有
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        depth: usize,
        callback: BufferCallback,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                width,
                height,
                format,
                depth: depth.max(1),
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    allocated: 0,
                    closed: false,
                }),
                callback: Mutex::new(Some(callback)),
            }),
        }
    }

    /// 交给平台的写入端
    pub fn surface(&self) -> Surface {
        Surface {
            shared: self.shared.clone(),
        }
    }

    /// 关闭缓冲区池：停止回调并释放空闲缓冲区
    ///
    /// 重复调用无副作用
    pub fn close(&self) {
        self.shared.callback.lock().take();

        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let released = state.free.len();
        state.allocated -= released;
        state.free.clear();

        tracing::debug!(
            "缓冲区池已关闭: 释放 {} 个, 仍在使用 {} 个",
            released,
            state.allocated
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// 已出借、尚未归还的缓冲区数量
    pub fn in_flight(&self) -> usize {
        let state = self.shared.state.lock();
        state.allocated - state.free.len()
    }
}

/// 平台写入端
#[derive(Clone)]
pub struct Surface {
    shared: Arc<PoolShared>,
}

impl Surface {
    pub fn width(&self) -> u32 {
        self.shared.width
    }

    pub fn height(&self) -> u32 {
        self.shared.height
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    pub fn depth(&self) -> usize {
        self.shared.depth
    }

    /// 取出一个可写缓冲区，大小为 `stride * height`
    ///
    /// 池已耗尽或已关闭时返回 `None`，调用方应丢弃这一帧
    pub fn dequeue(&self, stride: usize) -> Option<RawBuffer> {
        let mut data = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return None;
            }
            match state.free.pop() {
                Some(buf) => buf,
                None if state.allocated < self.shared.depth => {
                    state.allocated += 1;
                    Vec::new()
                }
                None => return None,
            }
        };

        data.resize(stride * self.shared.height as usize, 0);

        Some(RawBuffer {
            data,
            stride,
            width: self.shared.width,
            height: self.shared.height,
            format: self.shared.format,
            timestamp: Instant::now(),
            pool: self.shared.clone(),
        })
    }

    /// 提交已填充的缓冲区，在当前线程上调用回调
    pub fn queue(&self, mut buffer: RawBuffer) {
        buffer.timestamp = Instant::now();
        let callback = self.shared.callback.lock().clone();
        match callback {
            Some(callback) => callback(buffer),
            None => drop(buffer),
        }
    }
}

/// 平台投递的原始像素缓冲区
///
/// drop 时归还缓冲区池
pub struct RawBuffer {
    data: Vec<u8>,
    stride: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: Instant,
    pool: Arc<PoolShared>,
}

impl RawBuffer {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 每行字节数 (含填充)
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.data));
    }
}

impl std::fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish()
    }
}
