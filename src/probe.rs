//! 指标探针
//!
//! 每个探针独立读取一个指标，失败只影响自己：错误在探针边界被转换为
//! “不可用”记录，不会传给其他探针，也不会中断整次采样。

use crate::platform::Platform;
use crate::threshold::ThresholdTable;
use log::debug;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// 不可用指标显示的占位文本
pub const UNAVAILABLE_TEXT: &str = "-";

/// 网络速率换算用的 1 MB
const BYTES_PER_MB: f64 = 1_048_576.0;

pub const CPU_STAT_PATH: &str = "/proc/stat";
pub const MEMINFO_PATH: &str = "/proc/meminfo";
pub const LOADAVG_PATH: &str = "/proc/loadavg";
pub const NETDEV_PATH: &str = "/proc/net/dev";

pub const THROTTLED_COMMAND: &str = "vcgencmd get_throttled";
pub const CORE_VOLTAGE_COMMAND: &str = "vcgencmd measure_volts core";
pub const SESSIONS_COMMAND: &str = "who";
pub const CONNECTIONS_COMMAND: &str = "netstat -n";

const FTP_PORT_SUFFIX: &str = ":21";

/// 探针读取或解析失败
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("命令执行失败: {0}")]
    Command(String),
    #[error("命令超时: {0}")]
    Timeout(String),
    #[error("IO 错误: {0}")]
    Io(String),
    #[error("解析错误: {0}")]
    Parse(String),
    #[error("网络接口不存在: {0}")]
    MissingInterface(String),
    #[error("计数器回绕: {0}")]
    CounterWrapped(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// 固定的十二个指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Ram,
    Load,
    Temperature,
    Network,
    Hdd,
    Exthdd,
    Overheating,
    Undervoltage,
    Corevoltage,
    Sshconnections,
    Ftpconnections,
}

impl MetricKind {
    /// 按采样顺序排列的全部指标
    pub const ALL: [MetricKind; 12] = [
        MetricKind::Cpu,
        MetricKind::Ram,
        MetricKind::Load,
        MetricKind::Temperature,
        MetricKind::Network,
        MetricKind::Hdd,
        MetricKind::Exthdd,
        MetricKind::Overheating,
        MetricKind::Undervoltage,
        MetricKind::Corevoltage,
        MetricKind::Sshconnections,
        MetricKind::Ftpconnections,
    ];

    /// 指标名，同时也是阈值表和输出 JSON 中的键
    pub const fn name(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Ram => "ram",
            MetricKind::Load => "load",
            MetricKind::Temperature => "temperature",
            MetricKind::Network => "network",
            MetricKind::Hdd => "hdd",
            MetricKind::Exthdd => "exthdd",
            MetricKind::Overheating => "overheating",
            MetricKind::Undervoltage => "undervoltage",
            MetricKind::Corevoltage => "corevoltage",
            MetricKind::Sshconnections => "sshconnections",
            MetricKind::Ftpconnections => "ftpconnections",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 探针成功时的原始读数
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub text: String,
}

impl Reading {
    #[inline]
    pub fn new(value: f64, text: impl Into<String>) -> Self {
        Self {
            value,
            text: text.into(),
        }
    }
}

/// 单个指标的采样结果
///
/// `value` 为 `None` 表示不可用（与合法的 0 区分），此时文本为占位符、
/// 颜色为中性色、上限为 0。字段只能通过两个构造函数设置。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(serialize_with = "serialize_value")]
    value: Option<f64>,
    text: String,
    color: String,
    #[serde(rename = "max")]
    ceiling: f64,
}

impl MetricRecord {
    /// 用阈值表为读数着色
    pub fn available(metric: MetricKind, reading: Reading, table: &ThresholdTable) -> Self {
        let classification = table.classify(reading.value, metric.name());
        Self {
            value: Some(reading.value),
            text: reading.text,
            color: classification.color,
            ceiling: classification.ceiling,
        }
    }

    /// 不可用记录
    pub fn unavailable(neutral_color: &str) -> Self {
        Self {
            value: None,
            text: UNAVAILABLE_TEXT.to_string(),
            color: neutral_color.to_string(),
            ceiling: 0.0,
        }
    }

    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn color(&self) -> &str {
        &self.color
    }

    #[inline]
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }
}

/// 整数读数输出为 JSON 整数，其余输出为浮点数，不可用输出 null
fn serialize_value<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => serializer.serialize_i64(*v as i64),
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_none(),
    }
}

/// 把探针结果收口为记录，失败时记录日志并返回不可用记录
pub fn finish(
    metric: MetricKind,
    result: Result<Reading>,
    table: &ThresholdTable,
    neutral_color: &str,
) -> MetricRecord {
    match result {
        Ok(reading) => MetricRecord::available(metric, reading, table),
        Err(e) => {
            debug!("指标 {metric} 不可用: {e}");
            MetricRecord::unavailable(neutral_color)
        }
    }
}

#[inline]
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn parse_number<T: std::str::FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| ProbeError::Parse(format!("{what}: {token:?}")))
}

/// /proc/stat 汇总行中的 CPU 时间
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// 解析 /proc/stat 的 `cpu` 汇总行
///
/// 空闲时间包含 iowait，总时间为 user 到 steal 八个字段之和（guest 已计入 user）。
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ProbeError::Parse("/proc/stat 缺少 cpu 行".to_string()))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|field| parse_number::<u64>(field, "cpu 时间"))
        .collect::<Result<Vec<_>>>()?;

    if fields.len() < 4 {
        return Err(ProbeError::Parse(format!("cpu 行字段不足: {line:?}")));
    }

    let iowait = fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        idle: fields[3] + iowait,
        total: fields.iter().sum(),
    })
}

/// 两次采样之间的 CPU 使用率（百分比，保留一位小数）
pub fn cpu_busy_percent(start: CpuTimes, end: CpuTimes) -> f64 {
    let total = end.total.saturating_sub(start.total);
    if total == 0 {
        return 0.0;
    }
    let idle = end.idle.saturating_sub(start.idle).min(total);
    round1(100.0 * (1.0 - idle as f64 / total as f64))
}

/// 在 `dt` 窗口内平均的 CPU 使用率
pub async fn probe_cpu<P: Platform>(platform: &P, dt: Duration) -> Result<Reading> {
    let start = parse_cpu_times(&platform.read(CPU_STAT_PATH).await?)?;
    platform.sleep(dt).await;
    let end = parse_cpu_times(&platform.read(CPU_STAT_PATH).await?)?;

    let value = cpu_busy_percent(start, end);
    Ok(Reading::new(value, format!("{value:.1}%")))
}

/// 由 /proc/meminfo 计算内存使用率
pub fn parse_memory_percent(content: &str) -> Result<f64> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("MemTotal:"), Some(v)) => total = Some(parse_number::<u64>(v, "MemTotal")?),
            (Some("MemAvailable:"), Some(v)) => {
                available = Some(parse_number::<u64>(v, "MemAvailable")?)
            }
            _ => {}
        }
    }

    let total = total
        .filter(|t| *t > 0)
        .ok_or_else(|| ProbeError::Parse("/proc/meminfo 缺少 MemTotal".to_string()))?;
    let available = available
        .ok_or_else(|| ProbeError::Parse("/proc/meminfo 缺少 MemAvailable".to_string()))?;

    let used = total.saturating_sub(available);
    Ok(round1(used as f64 / total as f64 * 100.0))
}

pub async fn probe_ram<P: Platform>(platform: &P) -> Result<Reading> {
    let value = parse_memory_percent(&platform.read(MEMINFO_PATH).await?)?;
    Ok(Reading::new(value, format!("{value:.1}%")))
}

/// 15 分钟平均负载，文本保留原始字段
pub fn parse_load_average(content: &str) -> Result<Reading> {
    let field = content
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| ProbeError::Parse(format!("/proc/loadavg 格式错误: {content:?}")))?;
    Ok(Reading::new(parse_number(field, "15 分钟负载")?, field))
}

pub async fn probe_load<P: Platform>(platform: &P) -> Result<Reading> {
    parse_load_average(&platform.read(LOADAVG_PATH).await?)
}

/// 热区读数为毫摄氏度
pub fn parse_temperature(content: &str) -> Result<Reading> {
    let millidegrees: f64 = parse_number(content, "温度")?;
    let value = millidegrees / 1000.0;
    Ok(Reading::new(value, format!("{:.1}°C", round1(value))))
}

pub async fn probe_temperature<P: Platform>(platform: &P, sensor: &str) -> Result<Reading> {
    parse_temperature(&platform.read(sensor).await?)
}

/// 网络接口的累计字节计数
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NetCounters {
    pub received: u64,
    pub sent: u64,
}

/// 从 /proc/net/dev 中取出指定接口的收发字节数
pub fn parse_net_counters(content: &str, interface: &str) -> Result<NetCounters> {
    for line in content.lines().skip(2) {
        let Some((name, stats)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != interface {
            continue;
        }

        let values: Vec<&str> = stats.split_whitespace().collect();
        if values.len() < 9 {
            return Err(ProbeError::Parse(format!("{interface} 统计字段不足")));
        }
        return Ok(NetCounters {
            received: parse_number(values[0], "接收字节")?,
            sent: parse_number(values[8], "发送字节")?,
        });
    }

    Err(ProbeError::MissingInterface(interface.to_string()))
}

/// 两次计数之间的吞吐量（MB/s）
pub fn network_rate(start: NetCounters, end: NetCounters, dt: Duration) -> Result<f64> {
    let sent = end
        .sent
        .checked_sub(start.sent)
        .ok_or_else(|| ProbeError::CounterWrapped("发送字节".to_string()))?;
    let received = end
        .received
        .checked_sub(start.received)
        .ok_or_else(|| ProbeError::CounterWrapped("接收字节".to_string()))?;

    let seconds = dt.as_secs_f64();
    if seconds <= 0.0 {
        return Err(ProbeError::Parse("采样窗口为 0".to_string()));
    }

    Ok((sent + received) as f64 / seconds / BYTES_PER_MB)
}

/// 读计数、等待 `dt`、再读计数，按差值计算吞吐量
pub async fn probe_network<P: Platform>(
    platform: &P,
    interface: &str,
    dt: Duration,
) -> Result<Reading> {
    let start = parse_net_counters(&platform.read(NETDEV_PATH).await?, interface)?;
    platform.sleep(dt).await;
    let end = parse_net_counters(&platform.read(NETDEV_PATH).await?, interface)?;

    let value = network_rate(start, end, dt)?;
    Ok(Reading::new(value, format!("{:.1} MB/s", round1(value))))
}

/// 解析 `df <path> --output=pcent` 的输出，例如 `"Use%\n 42%"`
pub fn parse_disk_percent(output: &str) -> Result<Reading> {
    let text = output
        .split_whitespace()
        .last()
        .filter(|token| token.ends_with('%') && *token != "Use%")
        .ok_or_else(|| ProbeError::Parse(format!("df 输出格式错误: {output:?}")))?;

    let value: u32 = parse_number(text.trim_end_matches('%'), "磁盘占用")?;
    Ok(Reading::new(value as f64, text))
}

#[inline]
pub fn disk_command(path: &str) -> String {
    format!("df {path} --output=pcent")
}

pub async fn probe_disk<P: Platform>(platform: &P, path: &str) -> Result<Reading> {
    parse_disk_percent(&platform.run(&disk_command(path)).await?)
}

/// 解析 `vcgencmd get_throttled` 的输出，例如 `throttled=0x50005`
pub fn parse_throttled(output: &str) -> Result<u32> {
    let (_, hex) = output
        .trim()
        .split_once('=')
        .ok_or_else(|| ProbeError::Parse(format!("节流状态格式错误: {output:?}")))?;
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    u32::from_str_radix(digits, 16)
        .map_err(|_| ProbeError::Parse(format!("节流状态不是十六进制: {hex:?}")))
}

/// 过热与降频都由这一次读取解码，保证两者看到同一时刻的状态
pub async fn read_throttle_status<P: Platform>(platform: &P) -> Result<u32> {
    parse_throttled(&platform.run(THROTTLED_COMMAND).await?)
}

const CURRENTLY_UNDERVOLTAGE: u32 = 1 << 0;
const CURRENTLY_THROTTLED: u32 = 1 << 2;
const SOFT_TEMPERATURE_LIMIT: u32 = 1 << 3;
const UNDERVOLTAGE_OCCURRED: u32 = 1 << 16;
const THROTTLING_OCCURRED: u32 = 1 << 18;

/// 过热等级：正在降频 > 软温度上限 > 曾经降频 > 无
pub fn decode_overheating(status: u32) -> Reading {
    let (level, label) = if status & CURRENTLY_THROTTLED != 0 {
        (3, "Currently throttled")
    } else if status & SOFT_TEMPERATURE_LIMIT != 0 {
        (2, "Soft temperature limit")
    } else if status & THROTTLING_OCCURRED != 0 {
        (1, "Throttling occurred")
    } else {
        (0, "None")
    };
    Reading::new(level as f64, label)
}

/// 欠压等级：正在欠压 > 曾经欠压 > 无
pub fn decode_undervoltage(status: u32) -> Reading {
    let (level, label) = if status & CURRENTLY_UNDERVOLTAGE != 0 {
        (2, "Currently undervoltage")
    } else if status & UNDERVOLTAGE_OCCURRED != 0 {
        (1, "Undervoltage occurred")
    } else {
        (0, "None")
    };
    Reading::new(level as f64, label)
}

/// 解析 `vcgencmd measure_volts core` 的输出，例如 `volt=0.8563V`
pub fn parse_core_voltage(output: &str) -> Result<Reading> {
    let (_, volts) = output
        .trim()
        .split_once('=')
        .ok_or_else(|| ProbeError::Parse(format!("电压格式错误: {output:?}")))?;
    let text = volts.trim_end_matches(['V', 'v']);
    Ok(Reading::new(parse_number(text, "核心电压")?, text))
}

pub async fn probe_core_voltage<P: Platform>(platform: &P) -> Result<Reading> {
    parse_core_voltage(&platform.run(CORE_VOLTAGE_COMMAND).await?)
}

/// `who` 每行一个登录会话
pub fn count_sessions(output: &str) -> Reading {
    let count = output.lines().filter(|line| !line.trim().is_empty()).count();
    Reading::new(count as f64, count.to_string())
}

pub async fn probe_sessions<P: Platform>(platform: &P) -> Result<Reading> {
    Ok(count_sessions(&platform.run(SESSIONS_COMMAND).await?))
}

#[inline]
fn is_ftp_endpoint(address: &str) -> bool {
    address.ends_with(FTP_PORT_SUFFIX)
}

/// 统计 `netstat -n` 中本地或远端端口为 21 的 TCP 连接，按 (本地, 远端) 去重
pub fn count_ftp_connections(output: &str) -> Reading {
    let connections: HashSet<(&str, &str)> = output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [proto, _, _, local, foreign, ..] if proto.starts_with("tcp") => {
                    Some((*local, *foreign))
                }
                _ => None,
            }
        })
        .filter(|(local, foreign)| is_ftp_endpoint(local) || is_ftp_endpoint(foreign))
        .collect();

    let count = connections.len();
    Reading::new(count as f64, count.to_string())
}

pub async fn probe_ftp_connections<P: Platform>(platform: &P) -> Result<Reading> {
    Ok(count_ftp_connections(&platform.run(CONNECTIONS_COMMAND).await?))
}
