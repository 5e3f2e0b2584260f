//! Message envelope exchanged between peers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ServiceType, ServicesType};

/// First message on every session, declaring who the peer is and what it offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub id: Uuid,
    pub description: String,
    /// Services the peer consumes
    #[serde(default)]
    pub client_services: Vec<ServicesType>,
    /// Services the peer provides
    #[serde(default)]
    pub server_services: Vec<ServicesType>,
}

/// Message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Banner(Banner),
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    /// Application payload, opaque to the hub
    Custom {
        kind: String,
        #[serde(default)]
        body: serde_json::Value,
    },
}

impl Payload {
    /// Name of the payload variant
    pub fn kind(&self) -> &str {
        match self {
            Payload::Banner(_) => "banner",
            Payload::Ping { .. } => "ping",
            Payload::Pong { .. } => "pong",
            Payload::Custom { kind, .. } => kind,
        }
    }
}

/// Message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRoot {
    pub service: ServiceType,
    /// Correlation id; `None` for fire-and-forget messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    pub data: Payload,
}

impl MessageRoot {
    pub fn new(service: ServiceType, data: Payload) -> Self {
        Self {
            service,
            conversation_id: None,
            data,
        }
    }

    pub fn banner(banner: Banner) -> Self {
        Self::new(ServiceType::Core, Payload::Banner(banner))
    }

    pub fn ping(timestamp: u64) -> Self {
        Self::new(ServiceType::Core, Payload::Ping { timestamp })
    }

    pub fn pong(timestamp: u64) -> Self {
        Self::new(ServiceType::Core, Payload::Pong { timestamp })
    }

    /// Application message for a service
    pub fn custom(service: ServiceType, kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(
            service,
            Payload::Custom {
                kind: kind.into(),
                body,
            },
        )
    }

    /// Tag the message with a correlation id
    pub fn with_conversation(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn kind(&self) -> &str {
        self.data.kind()
    }
}
