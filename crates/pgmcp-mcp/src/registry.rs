//! Registration surface handed to the transport.
//!
//! The transport implements [`EndpointRegistrar`]. [`EndpointRegistry`] is the
//! in-memory implementation used by the CLI and by tests.

use pgmcp_core::{NotificationRule, PayloadFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::binding::{EndpointBinding, EndpointKind};

/// What the transport needs to expose one resource or tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub dangerous: bool,
}

impl EndpointDescriptor {
    pub fn from_binding(binding: &EndpointBinding) -> Self {
        Self {
            id: binding.id.clone(),
            description: binding.description.clone(),
            uri: binding.uri(),
            input_schema: binding.input_schema(),
            output_schema: binding.output_schema(),
            dangerous: binding.dangerous,
        }
    }
}

/// A notification channel exposed as an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub channel: String,
    pub description: String,
    pub format: PayloadFormat,
}

impl From<&NotificationRule> for StreamDescriptor {
    fn from(rule: &NotificationRule) -> Self {
        Self {
            channel: rule.channel.clone(),
            description: rule
                .description
                .clone()
                .unwrap_or_else(|| format!("Notifications on channel {}", rule.channel)),
            format: rule.format,
        }
    }
}

/// Registration surface of a transport.
///
/// Registering an id that already exists replaces it, so re-registration after
/// a re-bind is idempotent.
pub trait EndpointRegistrar {
    fn register_resource(&mut self, descriptor: EndpointDescriptor);

    fn register_tool(&mut self, descriptor: EndpointDescriptor);

    fn register_stream(&mut self, descriptor: StreamDescriptor);

    /// Forget everything registered so far. Called before a re-registration.
    fn clear(&mut self) {}
}

/// In-memory registrar.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    resources: BTreeMap<String, EndpointDescriptor>,
    tools: BTreeMap<String, EndpointDescriptor>,
    streams: BTreeMap<String, StreamDescriptor>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self, id: &str) -> Option<&EndpointDescriptor> {
        self.resources.get(id)
    }

    pub fn tool(&self, id: &str) -> Option<&EndpointDescriptor> {
        self.tools.get(id)
    }

    pub fn stream(&self, channel: &str) -> Option<&StreamDescriptor> {
        self.streams.get(channel)
    }

    /// Descriptor for `id`, resource or tool.
    pub fn get(&self, id: &str) -> Option<(EndpointKind, &EndpointDescriptor)> {
        self.resources
            .get(id)
            .map(|d| (EndpointKind::Resource, d))
            .or_else(|| self.tools.get(id).map(|d| (EndpointKind::Tool, d)))
    }

    pub fn resources(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.resources.values()
    }

    pub fn tools(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.tools.values()
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len() + self.tools.len() + self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EndpointRegistrar for EndpointRegistry {
    fn register_resource(&mut self, descriptor: EndpointDescriptor) {
        self.resources.insert(descriptor.id.clone(), descriptor);
    }

    fn register_tool(&mut self, descriptor: EndpointDescriptor) {
        self.tools.insert(descriptor.id.clone(), descriptor);
    }

    fn register_stream(&mut self, descriptor: StreamDescriptor) {
        self.streams.insert(descriptor.channel.clone(), descriptor);
    }

    fn clear(&mut self) {
        self.resources.clear();
        self.tools.clear();
        self.streams.clear();
    }
}
