use crate::probe::{ProbeError, Result};
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// 默认的子进程超时时间
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// 按空格切分命令行
///
/// 不解释任何 shell 元字符，也无法表达带空格的参数。连续空格产生的空片段会被丢弃。
#[inline]
pub fn tokenize(command: &str) -> Vec<&str> {
    command.split(' ').filter(|part| !part.is_empty()).collect()
}

/// 执行外部命令并返回去掉尾部空白的标准输出
///
/// 以下情况视为失败：命令为空、可执行文件不存在、超时、
/// 非零退出且没有任何输出、输出不是合法 UTF-8。
pub async fn run_command(command: &str, timeout: Duration) -> Result<String> {
    let argv = tokenize(command);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ProbeError::Command(format!("空命令: {command:?}")))?;

    debug!("执行命令: {command}");

    let mut child = Command::new(program);
    child.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, child.output())
        .await
        .map_err(|_| ProbeError::Timeout(command.to_string()))?
        .map_err(|e| ProbeError::Command(format!("{program}: {e}")))?;

    let stdout = String::from_utf8(output.stdout)
        .map_err(|e| ProbeError::Parse(format!("{program} 输出不是 UTF-8: {e}")))?;
    let trimmed = stdout.trim_end();

    if !output.status.success() && trimmed.is_empty() {
        return Err(ProbeError::Command(format!(
            "{program} 退出状态 {}",
            output.status
        )));
    }

    Ok(trimmed.to_string())
}
