//! Service capability identifiers and their wire representation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::{HubError, HubResult};

/// Underlying wire type for service identifiers
pub type ServicesType = u32;

const CORE_ID: ServicesType = 1;
const TRACKING_ID: ServicesType = 2;

/// First id available to application-defined services
pub const FIRST_CUSTOM_SERVICE: ServicesType = 256;

/// A capability a peer offers or consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ServiceType {
    /// Link keepalive and latency measurement
    Core,
    /// Request/response correlation
    Tracking,
    /// Application-defined service
    Custom(ServicesType),
}

impl ServiceType {
    /// Create an application-defined service
    pub fn custom(id: ServicesType) -> HubResult<Self> {
        ServiceType::try_from(id).and_then(|service| match service {
            ServiceType::Custom(_) => Ok(service),
            _ => Err(HubError::UnknownService(id)),
        })
    }

    /// Whether this service is built into the hub
    pub fn is_builtin(&self) -> bool {
        !matches!(self, ServiceType::Custom(_))
    }
}

impl From<ServiceType> for ServicesType {
    fn from(service: ServiceType) -> Self {
        match service {
            ServiceType::Core => CORE_ID,
            ServiceType::Tracking => TRACKING_ID,
            ServiceType::Custom(id) => id,
        }
    }
}

impl TryFrom<ServicesType> for ServiceType {
    type Error = HubError;

    fn try_from(id: ServicesType) -> Result<Self, Self::Error> {
        match id {
            CORE_ID => Ok(ServiceType::Core),
            TRACKING_ID => Ok(ServiceType::Tracking),
            id if id >= FIRST_CUSTOM_SERVICE => Ok(ServiceType::Custom(id)),
            id => Err(HubError::UnknownService(id)),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Core => write!(f, "core"),
            ServiceType::Tracking => write!(f, "tracking"),
            ServiceType::Custom(id) => write!(f, "custom:{}", id),
        }
    }
}

impl FromStr for ServiceType {
    type Err = HubError;

    /// Accepts `core`, `tracking`, `custom:<id>` or a bare numeric id
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "core" => return Ok(ServiceType::Core),
            "tracking" => return Ok(ServiceType::Tracking),
            _ => {}
        }

        let raw = s.strip_prefix("custom:").unwrap_or(s);
        let id: ServicesType = raw
            .parse()
            .map_err(|_| HubError::ConfigError(format!("Invalid service name: {}", s)))?;

        if s.starts_with("custom:") {
            ServiceType::custom(id)
        } else {
            ServiceType::try_from(id)
        }
    }
}

/// Convert services into their wire ids
pub fn services_to_underlying(services: &[ServiceType]) -> Vec<ServicesType> {
    services.iter().map(|&s| s.into()).collect()
}

/// Convert wire ids into services, skipping ids this build does not know
pub fn underlying_to_services(services: &[ServicesType]) -> Vec<ServiceType> {
    services
        .iter()
        .filter_map(|&id| match ServiceType::try_from(id) {
            Ok(service) => Some(service),
            Err(_) => {
                debug!("Skipping unknown service id {}", id);
                None
            }
        })
        .collect()
}

/// Parse service names from configuration
pub fn parse_services<S: AsRef<str>>(names: &[S]) -> HubResult<Vec<ServiceType>> {
    names.iter().map(|name| name.as_ref().parse()).collect()
}
