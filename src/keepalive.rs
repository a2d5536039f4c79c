use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::sleep;
use txcore::health::ConnectionMetrics;
use txcore::protocol::pong;
use txcore::types::events::Event;

use crate::client::Client;
use crate::connection::lock;

impl Client {
    /// Answers a server ping and feeds the health window.
    pub(crate) fn handle_ping(&self, id: &Value, params: &Value) {
        let metrics = self.connection.record_ping();
        debug!(
            target: "Client/Keepalive",
            "Ping received, quality {:?} ({} missed)",
            metrics.quality, metrics.missed_pings
        );

        match pong(id, params) {
            Ok(frame) => {
                if let Err(e) = self.connection.send_text(frame) {
                    warn!(target: "Client/Keepalive", "Could not answer ping: {e}");
                }
            }
            Err(e) => warn!(target: "Client/Keepalive", "Could not encode pong: {e}"),
        }
        self.publish_quality(metrics);
    }

    /// Emits `ConnectionQualityChanged` when the tier moves.
    fn publish_quality(&self, metrics: ConnectionMetrics) {
        {
            let mut last = lock(&self.last_quality);
            if *last == Some(metrics.quality) {
                return;
            }
            *last = Some(metrics.quality);
        }
        self.core_events
            .dispatch(&Event::ConnectionQualityChanged(metrics));
    }

    /// Re-scores the link once per nominal interval so overdue pings show up
    /// even when the server has gone quiet.
    pub(crate) async fn health_monitor_loop(self: Arc<Self>) {
        loop {
            sleep(self.config.ping_interval).await;
            if !self.is_connected() {
                debug!(target: "Client/Keepalive", "Not connected, exiting health monitor.");
                return;
            }
            self.publish_quality(self.connection.metrics());
        }
    }
}
