//! 快照汇总
//!
//! 每次调用运行全部探针并返回一份包含固定十二个键的快照。
//! CPU 与网络两个窗口采样并发执行，其余探针顺序执行。

use crate::platform::Platform;
use crate::probe::{
    self, MetricKind, MetricRecord, Reading, Result, decode_overheating, decode_undervoltage,
};
use crate::threshold::{DEFAULT_COLOR, ThresholdTable};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 未指定或无法解析时的采样窗口
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// 采样窗口上限，更大的请求值会被截断
pub const MAX_WINDOW: Duration = Duration::from_secs(60);

pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_TEMPERATURE_SENSOR: &str = "/sys/class/thermal/thermal_zone0/temp";

/// 把毫秒字符串转换为采样窗口
///
/// 缺失、无法解析、非正数或非有限值时返回 [`DEFAULT_WINDOW`]，超过 [`MAX_WINDOW`] 时截断。
pub fn sampling_window(millis: Option<&str>) -> Duration {
    millis
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| ms.min(MAX_WINDOW.as_secs_f64() * 1000.0))
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
        .filter(|window| !window.is_zero())
        .unwrap_or(DEFAULT_WINDOW)
}

/// 指标名到记录的映射，总是包含全部十二个指标
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    records: BTreeMap<MetricKind, MetricRecord>,
}

impl Snapshot {
    #[inline]
    pub fn get(&self, metric: MetricKind) -> &MetricRecord {
        // 构造时已保证每个指标都有记录
        &self.records[&metric]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, &MetricRecord)> {
        self.records.iter().map(|(metric, record)| (*metric, record))
    }

    /// 不可用的指标数
    pub fn unavailable_count(&self) -> usize {
        self.records.values().filter(|r| !r.is_available()).count()
    }
}

/// 与请求无关的采样参数
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// 统计吞吐量的网络接口
    pub network_interface: String,
    /// CPU 温度传感器文件（毫摄氏度）
    pub temperature_sensor: String,
    /// 不可用指标使用的中性色
    pub neutral_color: String,
}

impl Default for SamplerOptions {
    #[inline]
    fn default() -> Self {
        Self {
            network_interface: DEFAULT_INTERFACE.to_string(),
            temperature_sensor: DEFAULT_TEMPERATURE_SENSOR.to_string(),
            neutral_color: DEFAULT_COLOR.to_string(),
        }
    }
}

/// 快照采样器
pub struct Sampler<P> {
    platform: Arc<P>,
    options: SamplerOptions,
}

impl<P: Platform> Sampler<P> {
    #[inline]
    pub fn new(platform: Arc<P>, options: SamplerOptions) -> Self {
        Self { platform, options }
    }

    /// 采集一份快照
    ///
    /// 不会失败：任何探针错误都已转换为该指标的不可用记录。
    pub async fn collect(
        &self,
        table: &ThresholdTable,
        dt: Duration,
        ext_hdd_path: &str,
    ) -> Snapshot {
        let started = Instant::now();
        let platform = self.platform.as_ref();
        let options = &self.options;

        let (cpu, network) = tokio::join!(
            probe::probe_cpu(platform, dt),
            probe::probe_network(platform, &options.network_interface, dt),
        );
        let ram = probe::probe_ram(platform).await;
        let load = probe::probe_load(platform).await;
        let temperature = probe::probe_temperature(platform, &options.temperature_sensor).await;
        let hdd = probe::probe_disk(platform, "/").await;
        let exthdd = probe::probe_disk(platform, ext_hdd_path).await;
        let status = probe::read_throttle_status(platform).await;
        let overheating = status.clone().map(decode_overheating);
        let undervoltage = status.map(decode_undervoltage);
        let corevoltage = probe::probe_core_voltage(platform).await;
        let sessions = probe::probe_sessions(platform).await;
        let ftp = probe::probe_ftp_connections(platform).await;

        let results: [(MetricKind, Result<Reading>); 12] = [
            (MetricKind::Cpu, cpu),
            (MetricKind::Ram, ram),
            (MetricKind::Load, load),
            (MetricKind::Temperature, temperature),
            (MetricKind::Network, network),
            (MetricKind::Hdd, hdd),
            (MetricKind::Exthdd, exthdd),
            (MetricKind::Overheating, overheating),
            (MetricKind::Undervoltage, undervoltage),
            (MetricKind::Corevoltage, corevoltage),
            (MetricKind::Sshconnections, sessions),
            (MetricKind::Ftpconnections, ftp),
        ];

        let records = results
            .into_iter()
            .map(|(metric, result)| {
                (
                    metric,
                    probe::finish(metric, result, table, &options.neutral_color),
                )
            })
            .collect();

        let snapshot = Snapshot { records };
        debug!(
            "快照采集完成: 窗口 {:?}，{} 项不可用，耗时 {:?}",
            dt,
            snapshot.unavailable_count(),
            started.elapsed()
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CannedPlatform;
    use crate::probe::{
        CONNECTIONS_COMMAND, CORE_VOLTAGE_COMMAND, CPU_STAT_PATH, LOADAVG_PATH, MEMINFO_PATH,
        NETDEV_PATH, SESSIONS_COMMAND, THROTTLED_COMMAND, disk_command,
    };
    use crate::threshold::Band;

    const NETDEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 1000    20    0    0    0     0          0         0  2000    30    0    0    0     0       0          0";

    fn full_platform() -> CannedPlatform {
        CannedPlatform::new()
            .with_file(CPU_STAT_PATH, "cpu  100 0 100 800 0 0 0 0 0 0")
            .with_file(CPU_STAT_PATH, "cpu  200 0 200 1100 0 0 0 0 0 0")
            .with_file(MEMINFO_PATH, "MemTotal: 1000 kB\nMemAvailable: 400 kB\n")
            .with_file(LOADAVG_PATH, "0.10 0.20 0.30 1/100 42")
            .with_file(DEFAULT_TEMPERATURE_SENSOR, "51234")
            .with_file(NETDEV_PATH, NETDEV)
            .with_command(&disk_command("/"), "Use%\n 42%")
            .with_command(&disk_command("/mnt/ext_hdd/"), "Use%\n 81%")
            .with_command(THROTTLED_COMMAND, "throttled=0x50005")
            .with_command(CORE_VOLTAGE_COMMAND, "volt=0.8563V")
            .with_command(SESSIONS_COMMAND, "pi pts/0 2024-01-01 10:00")
            .with_command(CONNECTIONS_COMMAND, "tcp 0 0 10.0.0.1:21 10.0.0.2:5000 ESTABLISHED")
    }

    fn table() -> ThresholdTable {
        ThresholdTable::new(Band::new(1.0, "grey"))
            .with_metric(
                "cpu",
                vec![
                    Band::new(50.0, "green"),
                    Band::new(80.0, "yellow"),
                    Band::new(100.0, "red"),
                ],
            )
            .with_metric("hdd", vec![Band::new(50.0, "green"), Band::new(100.0, "red")])
            .with_metric("exthdd", vec![Band::new(50.0, "green"), Band::new(100.0, "red")])
    }

    fn sampler(platform: CannedPlatform) -> Sampler<CannedPlatform> {
        Sampler::new(Arc::new(platform), SamplerOptions::default())
    }

    #[test]
    fn test_sampling_window() {
        assert_eq!(sampling_window(None), DEFAULT_WINDOW);
        assert_eq!(sampling_window(Some("2500")), Duration::from_millis(2500));
        assert_eq!(sampling_window(Some(" 500 ")), Duration::from_millis(500));
        assert_eq!(sampling_window(Some("abc")), DEFAULT_WINDOW);
        assert_eq!(sampling_window(Some("-100")), DEFAULT_WINDOW);
        assert_eq!(sampling_window(Some("0")), DEFAULT_WINDOW);
        assert_eq!(sampling_window(Some("NaN")), DEFAULT_WINDOW);
        assert_eq!(sampling_window(Some("1e400")), DEFAULT_WINDOW);
    }

    #[test]
    fn test_sampling_window_is_capped() {
        assert_eq!(sampling_window(Some("1e15")), MAX_WINDOW);
        assert_eq!(sampling_window(Some("120000")), MAX_WINDOW);
        assert_eq!(sampling_window(Some("60000")), MAX_WINDOW);
        assert_eq!(sampling_window(Some("59999")), Duration::from_millis(59999));
    }

    #[tokio::test]
    async fn test_collect_all_available() {
        let snapshot = sampler(full_platform())
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;

        assert_eq!(snapshot.len(), 12);
        assert_eq!(snapshot.unavailable_count(), 0);

        let cpu = snapshot.get(MetricKind::Cpu);
        assert_eq!(cpu.value(), Some(40.0));
        assert_eq!(cpu.text(), "40.0%");
        assert_eq!(cpu.color(), "green");
        assert_eq!(cpu.ceiling(), 100.0);

        assert_eq!(snapshot.get(MetricKind::Ram).value(), Some(60.0));
        assert_eq!(snapshot.get(MetricKind::Load).text(), "0.30");
        assert_eq!(snapshot.get(MetricKind::Temperature).text(), "51.2°C");
        assert_eq!(snapshot.get(MetricKind::Network).value(), Some(0.0));
        assert_eq!(snapshot.get(MetricKind::Hdd).color(), "green");
        assert_eq!(snapshot.get(MetricKind::Exthdd).color(), "red");
        assert_eq!(snapshot.get(MetricKind::Overheating).text(), "Currently throttled");
        assert_eq!(snapshot.get(MetricKind::Undervoltage).text(), "Currently undervoltage");
        assert_eq!(snapshot.get(MetricKind::Corevoltage).text(), "0.8563");
        assert_eq!(snapshot.get(MetricKind::Sshconnections).value(), Some(1.0));
        assert_eq!(snapshot.get(MetricKind::Ftpconnections).value(), Some(1.0));

        // 不在阈值表中的指标使用默认区间
        assert_eq!(snapshot.get(MetricKind::Load).color(), "grey");
        assert_eq!(snapshot.get(MetricKind::Load).ceiling(), 1.0);
    }

    #[tokio::test]
    async fn test_collect_all_failing_still_has_every_key() {
        let snapshot = sampler(CannedPlatform::new())
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;

        assert_eq!(snapshot.len(), 12);
        assert_eq!(snapshot.unavailable_count(), 12);
        for (_, record) in snapshot.iter() {
            assert_eq!(record, &MetricRecord::unavailable(DEFAULT_COLOR));
        }
    }

    #[tokio::test]
    async fn test_collect_isolates_failures() {
        // 只缺少温度传感器和 vcgencmd
        let platform = CannedPlatform::new()
            .with_file(MEMINFO_PATH, "MemTotal: 1000 kB\nMemAvailable: 400 kB\n")
            .with_file(LOADAVG_PATH, "0.10 0.20 0.30 1/100 42");
        let snapshot = sampler(platform)
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;

        assert!(snapshot.get(MetricKind::Ram).is_available());
        assert!(snapshot.get(MetricKind::Load).is_available());
        assert!(!snapshot.get(MetricKind::Temperature).is_available());
        assert!(!snapshot.get(MetricKind::Overheating).is_available());
        assert!(!snapshot.get(MetricKind::Undervoltage).is_available());
        assert_eq!(snapshot.get(MetricKind::Temperature).text(), "-");
        assert_eq!(snapshot.get(MetricKind::Temperature).ceiling(), 0.0);
    }

    #[tokio::test]
    async fn test_collect_serializes_fixed_keys() {
        let snapshot = sampler(full_platform())
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;
        let json = serde_json::to_value(&snapshot).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 12);
        for metric in MetricKind::ALL {
            let entry = &object[metric.name()];
            for field in ["value", "text", "color", "max"] {
                assert!(entry.get(field).is_some(), "{metric} 缺少 {field}");
            }
        }
        assert_eq!(object["hdd"]["value"], 42);
        assert_eq!(object["hdd"]["text"], "42%");
    }

    #[tokio::test]
    async fn test_collect_is_repeatable() {
        let sampler = sampler(full_platform());
        let first = sampler
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;
        let second = sampler
            .collect(&table(), Duration::from_secs(1), "/mnt/ext_hdd/")
            .await;

        for metric in MetricKind::ALL {
            if matches!(metric, MetricKind::Cpu | MetricKind::Network) {
                continue;
            }
            assert_eq!(first.get(metric), second.get(metric));
        }
    }

    #[test]
    fn test_collect_blocking() {
        let snapshot = tokio_test::block_on(
            sampler(CannedPlatform::new()).collect(&table(), DEFAULT_WINDOW, "/"),
        );
        assert_eq!(snapshot.len(), MetricKind::ALL.len());
    }
}
