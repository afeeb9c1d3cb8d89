//! 后台线程句柄：运行标志 + 有界 join
//!
//! 三个长驻任务（采集、定时抓拍、推理监控）都跑在这里，
//! 停止是协作式的，循环体每轮检查一次标志。

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// 循环体看到的运行标志
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// 分片睡眠，标志被清除时提前返回；返回值为睡醒后是否仍在运行
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
        self.is_running()
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

// 线程退出（包括 panic 展开）时通知 stop()
struct ExitNotice(Sender<()>);

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

pub struct Worker {
    name: String,
    flag: RunFlag,
    handle: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(RunFlag) + Send + 'static,
    {
        let flag = RunFlag::new();
        let (tx, exited) = mpsc::channel();
        let loop_flag = flag.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _notice = ExitNotice(tx);
            body(loop_flag);
        })?;

        Ok(Self {
            name: name.to_string(),
            flag,
            handle: Some(handle),
            exited,
        })
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_running() && self.handle.is_some()
    }

    /// 清除运行标志并最多等待 `timeout`；超时则放弃该线程，返回 false
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.flag.clear();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("⚠️ Worker '{}' panicked before exit", self.name);
                }
                info!("Worker '{}' stopped", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "⚠️ Worker '{}' did not stop within {:?}; detaching",
                    self.name, timeout
                );
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.flag.clear();
    }
}
