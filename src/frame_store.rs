//! 最新帧存储
//!
//! 单槽、后写覆盖。锁只在交换 `Arc` 时持有，编码和 I/O 都在锁外进行。

use parking_lot::Mutex;
use std::sync::Arc;

use crate::capture::Frame;

/// 线程安全的单帧槽
#[derive(Clone, Default)]
pub struct FrameStore {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl FrameStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换当前帧，旧帧在锁外释放
    pub fn put(&self, frame: Frame) {
        let previous = self.slot.lock().replace(Arc::new(frame));
        drop(previous);
    }

    /// 获取当前帧
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// 清空存储
    pub fn clear(&self) {
        let previous = self.slot.lock().take();
        drop(previous);
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore")
            .field("empty", &self.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_store() {
        let store = FrameStore::new();
        assert!(store.get().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_latest_wins() {
        let store = FrameStore::new();
        for shade in 1..=10u8 {
            store.put(Frame::solid(2, 2, [shade, 0, 0, 255]).unwrap());
        }
        let frame = store.get().unwrap();
        assert_eq!(frame.pixel(0, 0), [10, 0, 0, 255]);
    }

    #[test]
    fn test_two_rapid_puts_return_second() {
        let store = FrameStore::new();
        store.put(Frame::solid(4, 4, [255, 0, 0, 255]).unwrap());
        store.put(Frame::solid(8, 8, [0, 0, 255, 255]).unwrap());

        let frame = store.get().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 8));
        assert_eq!(frame.pixel(7, 7), [0, 0, 255, 255]);
    }

    #[test]
    fn test_clear_empties_store() {
        let store = FrameStore::new();
        store.put(Frame::solid(1, 1, [0, 0, 0, 255]).unwrap());
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_reader_keeps_frame_after_overwrite() {
        let store = FrameStore::new();
        store.put(Frame::solid(1, 1, [1, 1, 1, 255]).unwrap());
        let held = store.get().unwrap();

        store.put(Frame::solid(1, 1, [2, 2, 2, 255]).unwrap());
        assert_eq!(held.pixel(0, 0), [1, 1, 1, 255]);
        assert_eq!(store.get().unwrap().pixel(0, 0), [2, 2, 2, 255]);
    }

    #[test]
    fn test_concurrent_put_get_never_tears() {
        let store = FrameStore::new();
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    let shade = (i % 251) as u8;
                    store.put(Frame::solid(16, 16, [shade, shade, shade, 255]).unwrap());
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if let Some(frame) = store.get() {
                            let first = frame.pixel(0, 0);
                            assert!(frame.data().chunks(4).all(|px| px == first));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
