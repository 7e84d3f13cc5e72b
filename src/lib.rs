//! 主机指标采样与分级显示库
//!
//! 周期性读取 CPU、内存、温度、网络吞吐、磁盘占用、节流状态和会话数等指标，
//! 按可配置的阈值表为每个读数着色，生成可直接序列化为 JSON 的快照。

pub mod command;
pub mod config;
pub mod identity;
pub mod platform;
pub mod probe;
pub mod sampler;
pub mod server;
pub mod threshold;

// 重新导出主要的公共类型
pub use config::Settings;
pub use identity::{HostIdentity, identify};
pub use platform::{CannedPlatform, Platform, SystemPlatform};
pub use probe::{MetricKind, MetricRecord, ProbeError};
pub use sampler::{Sampler, SamplerOptions, Snapshot, sampling_window};
pub use server::StatusServer;
pub use threshold::{Band, BandEntry, Classification, DefaultMarker, ThresholdTable};
