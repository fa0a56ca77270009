//! Resource projections and create requests.
//!
//! These are views of backend-owned state fetched on demand; nothing here
//! is authoritative. Status values are plain strings because each backend
//! reports its own vocabulary; the common ones are in [`status`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status strings shared by the mock and the legacy API.
pub mod status {
    pub const BUILDING: &str = "building";
    pub const CREATING: &str = "creating";
    pub const ACTIVE: &str = "active";
    pub const RUNNING: &str = "running";
    pub const AVAILABLE: &str = "available";
    pub const IN_USE: &str = "in-use";
    pub const STOPPED: &str = "stopped";
    pub const ERROR: &str = "error";

    /// Statuses after which no further progress is expected.
    pub fn is_failure(status: &str) -> bool {
        matches!(status, ERROR | "failed")
    }
}

/// Common accessors used by status polling.
pub trait Resource {
    const KIND: &'static str;
    fn id(&self) -> &str;
    fn status(&self) -> &str;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;
            fn id(&self) -> &str {
                &self.id
            }
            fn status(&self) -> &str {
                &self.status
            }
        }
    };
}

// ── Instances ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub flavor: String,
    pub image: String,
    /// Private address, assigned once the instance is active.
    pub ip_address: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub flavor: String,
    pub image: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub user_data: Option<String>,
}

// ── Floating IPs ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
    pub status: String,
    pub pool: String,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFloatingIpRequest {
    pub pool: String,
}

// ── Security groups ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub protocol: String,
    pub port_min: u16,
    pub port_max: u16,
    pub cidr: String,
}

impl SecurityRule {
    /// Allow one TCP port from anywhere.
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port_min: port,
            port_max: port,
            cidr: "0.0.0.0/0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSecurityGroupRequest {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

// ── DNS ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub zone: String,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: u32,
    pub status: String,
}

impl DnsRecord {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.name, self.zone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDnsRecordRequest {
    pub zone: String,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: u32,
}

// ── Containers ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ── Volumes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: u32,
    pub status: String,
    pub attached_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub size_gb: u32,
}

impl_resource!(Instance, "instance");
impl_resource!(FloatingIp, "floating ip");
impl_resource!(SecurityGroup, "security group");
impl_resource!(DnsRecord, "dns record");
impl_resource!(Container, "container");
impl_resource!(Volume, "volume");
