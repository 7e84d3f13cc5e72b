//! 主机身份查询

use crate::platform::Platform;
use log::debug;
use serde::Serialize;

pub const ADDRESS_COMMAND: &str = "hostname -I";
pub const HOSTNAME_COMMAND: &str = "hostname";

/// 主机身份信息，任一字段获取失败时为空字符串
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub ip: String,
    pub hostname: String,
}

/// 查询本机地址与主机名，两次查询互不影响
pub async fn identify<P: Platform>(platform: &P) -> HostIdentity {
    let ip = match platform.run(ADDRESS_COMMAND).await {
        Ok(output) => output.split_whitespace().next().unwrap_or_default().to_string(),
        Err(e) => {
            debug!("获取 IP 地址失败: {e}");
            String::new()
        }
    };

    let hostname = match platform.run(HOSTNAME_COMMAND).await {
        Ok(output) => output.trim().to_string(),
        Err(e) => {
            debug!("获取主机名失败: {e}");
            String::new()
        }
    };

    HostIdentity { ip, hostname }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CannedPlatform;

    #[tokio::test]
    async fn test_identify_first_address() {
        let platform = CannedPlatform::new()
            .with_command(ADDRESS_COMMAND, "192.168.1.10 172.17.0.1 fd00::1 ")
            .with_command(HOSTNAME_COMMAND, "raspberrypi");

        let identity = identify(&platform).await;
        assert_eq!(identity.ip, "192.168.1.10");
        assert_eq!(identity.hostname, "raspberrypi");
    }

    #[tokio::test]
    async fn test_identify_fields_fail_independently() {
        let platform = CannedPlatform::new().with_command(HOSTNAME_COMMAND, "raspberrypi");
        let identity = identify(&platform).await;
        assert_eq!(identity.ip, "");
        assert_eq!(identity.hostname, "raspberrypi");

        let identity = identify(&CannedPlatform::new()).await;
        assert_eq!(identity, HostIdentity::default());
    }

    #[test]
    fn test_identity_json_keys() {
        let identity = HostIdentity {
            ip: "10.0.0.1".to_string(),
            hostname: "pi".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&identity).unwrap(),
            serde_json::json!({"ip": "10.0.0.1", "hostname": "pi"})
        );
    }
}
