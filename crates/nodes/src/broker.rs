// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Broker node constructors: console and MQTT event emitters.
//!
//! Broker nodes emit structured events to an external message system. The
//! MQTT broker owns exactly one client with auto-reconnect; its publish path
//! is serialised by a per-node mutex so message order per topic is preserved.
//! Eager connect failures are not fatal: the node is returned and the client
//! reconnects in the background, publishing as a no-op until then.

use crate::base::NodeBase;
use crate::factory::FactoryContext;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use visionkit_core::error::Result;
use visionkit_core::is_placeholder;
use visionkit_core::node::{NodeCategory, NodeHandle, PipelineNode};

/// Sink for structured events produced by analytics nodes.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]);
}

pub(crate) struct ConsoleBrokerNode {
    base: NodeBase,
    pretty: bool,
}

impl PipelineNode for ConsoleBrokerNode {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn node_type(&self) -> &str {
        self.base.node_type()
    }

    fn category(&self) -> NodeCategory {
        self.base.category()
    }

    fn start(&self) -> Result<()> {
        self.base.set_running();
        Ok(())
    }

    fn stop(&self) {
        self.base.set_stopped();
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }
}

impl EventPublisher for ConsoleBrokerNode {
    fn publish(&self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        if self.pretty {
            let rendered = serde_json::from_str::<serde_json::Value>(&text)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or_else(|_| text.into_owned());
            tracing::info!(target: "visionkit::events", topic, "{rendered}");
        } else {
            tracing::info!(target: "visionkit::events", topic, "{text}");
        }
    }
}

pub(crate) struct MqttBrokerNode {
    base: NodeBase,
    topic: String,
    /// Publishing goes through this mutex to keep per-topic ordering.
    client: Mutex<AsyncClient>,
}

impl PipelineNode for MqttBrokerNode {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn node_type(&self) -> &str {
        self.base.node_type()
    }

    fn category(&self) -> NodeCategory {
        self.base.category()
    }

    fn start(&self) -> Result<()> {
        self.base.set_running();
        Ok(())
    }

    fn stop(&self) {
        self.base.set_stopped();
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }
}

impl EventPublisher for MqttBrokerNode {
    fn publish(&self, topic: &str, payload: &[u8]) {
        let topic = if topic.is_empty() { self.topic.as_str() } else { topic };
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        // While disconnected the queue fills up; dropped events are logged
        // and the background reconnect picks ordering back up.
        if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            tracing::debug!(node = %self.base.name(), topic, error = %e, "Dropped MQTT event");
        }
    }
}

pub(crate) fn create_console_broker(
    node_name: &str,
    _params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    tracing::info!(node = %node_name, "Creating console broker");
    Ok(Some(std::sync::Arc::new(ConsoleBrokerNode {
        base: NodeBase::new(node_name, "console_broker", NodeCategory::Broker)?,
        pretty: false,
    })))
}

pub(crate) fn create_enhanced_console_broker(
    node_name: &str,
    params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    let pretty = params.get("pretty").is_some_and(|v| v == "true");
    tracing::info!(node = %node_name, pretty, "Creating enhanced console broker");
    Ok(Some(std::sync::Arc::new(ConsoleBrokerNode {
        base: NodeBase::new(node_name, "enhanced_console_broker", NodeCategory::Broker)?,
        pretty,
    })))
}

fn broker_param(
    params: &BTreeMap<String, String>,
    request_key: &str,
    param_key: &str,
    ctx: &FactoryContext<'_>,
) -> Option<String> {
    ctx.request
        .param(request_key)
        .or_else(|| params.get(param_key).map(String::as_str))
        .filter(|v| !v.is_empty() && !is_placeholder(v))
        .map(ToString::to_string)
}

pub(crate) fn create_mqtt_broker(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    // Empty broker URL: the node drops out of the graph.
    let Some(broker) = broker_param(params, "MQTT_BROKER_URL", "mqtt_broker_url", ctx) else {
        tracing::info!(node = %node_name, "MQTT broker elided: no broker URL configured");
        return Ok(None);
    };

    let port = broker_param(params, "MQTT_PORT", "mqtt_port", ctx)
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(1883);
    let topic = broker_param(params, "MQTT_TOPIC", "mqtt_topic", ctx)
        .unwrap_or_else(|| "events".to_string());
    let username = broker_param(params, "MQTT_USERNAME", "mqtt_username", ctx);
    let password = broker_param(params, "MQTT_PASSWORD", "mqtt_password", ctx);

    // Strip a scheme prefix if one was supplied.
    let host = broker
        .strip_prefix("tcp://")
        .or_else(|| broker.strip_prefix("mqtt://"))
        .unwrap_or(broker.as_str());
    let (host, port) = match host.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse::<u16>().unwrap_or(port)),
        None => (host.to_string(), port),
    };

    let short_id: String = ctx.instance_id.chars().filter(|c| *c != '-').take(8).collect();
    let client_id = format!("visionkit_{short_id}_{node_name}");

    let mut options = MqttOptions::new(client_id, &host, port);
    options.set_keep_alive(Duration::from_secs(60));
    if let (Some(user), Some(pass)) = (username, password) {
        options.set_credentials(user, pass);
    }

    let (client, mut event_loop) = AsyncClient::new(options, 64);

    // Drive the connection in the background. Poll errors mean disconnect;
    // the loop backs off and reconnects, so an unreachable broker at create
    // time is not fatal.
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let host_for_log = host.clone();
            handle.spawn(async move {
                loop {
                    match event_loop.poll().await {
                        Ok(event) => {
                            tracing::trace!(?event, "MQTT event");
                        },
                        Err(e) => {
                            tracing::debug!(host = %host_for_log, error = %e, "MQTT connection error, retrying");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        },
                    }
                }
            });
        },
        Err(_) => {
            tracing::warn!(
                node = %node_name,
                "No async runtime available; MQTT client created without a connection loop"
            );
        },
    }

    tracing::info!(node = %node_name, host = %host, port, topic = %topic, "Creating MQTT broker");
    Ok(Some(std::sync::Arc::new(MqttBrokerNode {
        base: NodeBase::new(node_name, "mqtt_broker", NodeCategory::Broker)?,
        topic: topic.to_string(),
        client: Mutex::new(client),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use visionkit_core::{ConfigStore, CreateInstanceRequest};

    fn fixture<'a>(
        request: &'a CreateInstanceRequest,
        config: &'a ConfigStore,
        keys: &'a HashSet<String>,
    ) -> FactoryContext<'a> {
        FactoryContext {
            request,
            instance_id: "abcdef12-3456-7890-aaaa-bbbbbbbbbbbb",
            existing_rtmp_keys: keys,
            config,
        }
    }

    #[test]
    fn test_mqtt_elided_without_url() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let node = create_mqtt_broker("broker_x", &BTreeMap::new(), &fixture(&request, &config, &keys))
            .expect("no error");
        assert!(node.is_none());
    }

    #[tokio::test]
    async fn test_mqtt_created_even_when_broker_unreachable() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request
            .additional_params
            .insert("MQTT_BROKER_URL".to_string(), "tcp://127.0.0.1:1".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let node = create_mqtt_broker("broker_x", &BTreeMap::new(), &fixture(&request, &config, &keys))
            .expect("no error")
            .expect("node despite unreachable broker");
        assert_eq!(node.node_type(), "mqtt_broker");
    }

    #[test]
    fn test_console_broker_publishes() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let node =
            create_console_broker("broker_x", &BTreeMap::new(), &fixture(&request, &config, &keys))
                .expect("no error")
                .expect("node");
        assert_eq!(node.category(), NodeCategory::Broker);
    }
}
