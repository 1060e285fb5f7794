use std::sync::Arc;

use anyhow::Result;

use genbatch_core::config::TransportConfig;
use genbatch_core::transport::Transport;

use crate::transport::{HttpTransport, ReplayTransport};

pub fn build_transport(cfg: &TransportConfig) -> Result<Arc<dyn Transport>> {
    match cfg {
        TransportConfig::Http(http_cfg) => Ok(Arc::new(HttpTransport::new(http_cfg)?)),
        TransportConfig::Replay(replay_cfg) => Ok(Arc::new(ReplayTransport::new(replay_cfg))),
    }
}
