//! 平台访问层
//!
//! 所有探针只通过 [`Platform`] 读取系统：执行命令、读取伪文件、等待采样窗口。
//! 生产环境使用 [`SystemPlatform`]，测试使用返回预置输出的 [`CannedPlatform`]。

use crate::command::{DEFAULT_COMMAND_TIMEOUT, run_command};
use crate::probe::{ProbeError, Result};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// 探针使用的平台访问接口
pub trait Platform: Send + Sync {
    /// 执行一条按空格切分的命令，返回去掉尾部空白的输出
    fn run(&self, command: &str) -> impl Future<Output = Result<String>> + Send;

    /// 读取一个文本文件（通常位于 /proc 或 /sys）
    fn read(&self, path: &str) -> impl Future<Output = Result<String>> + Send;

    /// 等待一个采样窗口
    fn sleep(&self, window: Duration) -> impl Future<Output = ()> + Send;
}

/// 真实系统访问：子进程 + 文件系统 + tokio 定时器
#[derive(Debug, Clone)]
pub struct SystemPlatform {
    command_timeout: Duration,
}

impl SystemPlatform {
    #[inline]
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for SystemPlatform {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl Platform for SystemPlatform {
    async fn run(&self, command: &str) -> Result<String> {
        run_command(command, self.command_timeout).await
    }

    async fn read(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProbeError::Io(format!("{path}: {e}")))
    }

    async fn sleep(&self, window: Duration) {
        tokio::time::sleep(window).await;
    }
}

/// 预置输出的测试替身
///
/// 每个命令或路径对应一个输出队列，每次访问弹出队首；只剩最后一个时会一直重复返回它。
/// 未登记的命令或路径返回错误，模拟命令缺失或传感器不存在。
#[derive(Debug, Default)]
pub struct CannedPlatform {
    commands: Mutex<HashMap<String, VecDeque<String>>>,
    files: Mutex<HashMap<String, VecDeque<String>>>,
}

impl CannedPlatform {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条命令的输出（可多次调用形成队列）
    pub fn with_command(self, command: &str, output: &str) -> Self {
        push(&self.commands, command, output);
        self
    }

    /// 登记一个文件的内容（可多次调用形成队列）
    pub fn with_file(self, path: &str, content: &str) -> Self {
        push(&self.files, path, content);
        self
    }
}

fn push(table: &Mutex<HashMap<String, VecDeque<String>>>, key: &str, value: &str) {
    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
    table
        .entry(key.to_string())
        .or_default()
        .push_back(value.to_string());
}

fn next(table: &Mutex<HashMap<String, VecDeque<String>>>, key: &str) -> Option<String> {
    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
    let queue = table.get_mut(key)?;
    // 最后一个输出保留在队列里
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl Platform for CannedPlatform {
    async fn run(&self, command: &str) -> Result<String> {
        // 与真实执行一致，去掉尾部空白
        next(&self.commands, command)
            .map(|output| output.trim_end().to_string())
            .ok_or_else(|| ProbeError::Command(format!("命令不存在: {command}")))
    }

    async fn read(&self, path: &str) -> Result<String> {
        next(&self.files, path).ok_or_else(|| ProbeError::Io(format!("{path}: 文件不存在")))
    }

    async fn sleep(&self, _window: Duration) {}
}
