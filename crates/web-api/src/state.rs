use std::{sync::Arc, time::Duration};

use application::{ChatService, LiveEventHub, PresenceTracker};
use config::GatewayConfig;

/// 单个连接的行为参数
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// 每次写客户端的超时
    pub send_timeout: Duration,
    pub leave_on_disconnect: bool,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            send_timeout: config.send_timeout(),
            leave_on_disconnect: config.leave_on_disconnect,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub presence: Arc<PresenceTracker>,
    pub hub: LiveEventHub,
    pub gateway: GatewaySettings,
    pub instance_id: Arc<str>,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        presence: Arc<PresenceTracker>,
        hub: LiveEventHub,
        gateway: GatewaySettings,
        instance_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            chat_service,
            presence,
            hub,
            gateway,
            instance_id: instance_id.into(),
        }
    }
}
