//! Read-only resource usage from the cluster metrics API.
//!
//! Nothing is cached: every call queries the metrics API. CPU is reported
//! in cores and memory in MB (2^20 bytes).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ClusterApi, PodMetrics, Usage};
use crate::error::{ClusterError, ClusterResult};
use crate::orchestrator::{ClusterOrchestrator, LABEL_SERVICE};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn invalid_quantity(quantity: &str) -> ClusterError {
    ClusterError::Invalid(format!("unparseable quantity '{quantity}'"))
}

fn split_suffix(quantity: &str) -> (&str, &str) {
    let quantity = quantity.trim();
    let idx = quantity
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(quantity.len());
    quantity.split_at(idx)
}

/// CPU quantity to cores: `"250m"` → 0.25, `"2"` → 2.0, `"1500000n"` → 0.0015.
pub fn parse_cpu_cores(quantity: &str) -> ClusterResult<f64> {
    let (number, suffix) = split_suffix(quantity);
    let value: f64 = number.parse().map_err(|_| invalid_quantity(quantity))?;
    let scale = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "u" => 1e-6,
        "n" => 1e-9,
        "k" => 1e3,
        _ => return Err(invalid_quantity(quantity)),
    };
    Ok(value * scale)
}

/// Memory quantity to bytes: binary (`Ki`, `Mi`, `Gi`, `Ti`) and decimal
/// (`k`, `M`, `G`, `T`) suffixes.
pub fn parse_memory_bytes(quantity: &str) -> ClusterResult<f64> {
    let (number, suffix) = split_suffix(quantity);
    let value: f64 = number.parse().map_err(|_| invalid_quantity(quantity))?;
    let scale = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "m" => 1e-3,
        _ => return Err(invalid_quantity(quantity)),
    };
    Ok(value * scale)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub name: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_id: String,
    pub pod_count: usize,
    pub pods: Vec<PodUsage>,
    pub total_cpu_cores: f64,
    pub total_memory_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub name: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
}

fn usage_totals(usage: &Usage) -> ClusterResult<(f64, f64)> {
    let cpu = if usage.cpu.is_empty() {
        0.0
    } else {
        parse_cpu_cores(&usage.cpu)?
    };
    let memory = if usage.memory.is_empty() {
        0.0
    } else {
        parse_memory_bytes(&usage.memory)? / BYTES_PER_MB
    };
    Ok((cpu, memory))
}

fn pod_usage(pod: &PodMetrics) -> ClusterResult<PodUsage> {
    let mut usage = PodUsage {
        name: pod.name.clone(),
        ..Default::default()
    };
    for container in &pod.containers {
        let (cpu, memory) = usage_totals(&container.usage)?;
        usage.cpu_cores += cpu;
        usage.memory_mb += memory;
    }
    Ok(usage)
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    pub async fn is_metrics_server_available(&self) -> bool {
        self.api.metrics_available().await
    }

    /// Usage of every pod in the project namespace.
    pub async fn get_pod_metrics(&self, project_id: &str) -> ClusterResult<Vec<PodUsage>> {
        let namespace = self.namespace_name(project_id);
        self.api
            .pod_metrics(&namespace, None)
            .await?
            .iter()
            .map(pod_usage)
            .collect()
    }

    /// Summed usage of the pods backing one service. No matching pods
    /// yields an empty, zero-total result.
    pub async fn get_service_metrics(
        &self,
        project_id: &str,
        service_id: &str,
    ) -> ClusterResult<ServiceMetrics> {
        let namespace = self.namespace_name(project_id);
        let selector = format!("{LABEL_SERVICE}={service_id}");
        let pods = self
            .api
            .pod_metrics(&namespace, Some(&selector))
            .await?
            .iter()
            .map(pod_usage)
            .collect::<ClusterResult<Vec<_>>>()?;

        let metrics = ServiceMetrics {
            service_id: service_id.to_string(),
            pod_count: pods.len(),
            total_cpu_cores: pods.iter().map(|p| p.cpu_cores).sum(),
            total_memory_mb: pods.iter().map(|p| p.memory_mb).sum(),
            pods,
        };
        debug!(%namespace, service = %service_id, pods = metrics.pod_count, "service metrics read");
        Ok(metrics)
    }

    pub async fn get_node_metrics(&self) -> ClusterResult<Vec<NodeUsage>> {
        self.api
            .node_metrics()
            .await?
            .iter()
            .map(|node| {
                let (cpu_cores, memory_mb) = usage_totals(&node.usage)?;
                Ok(NodeUsage {
                    name: node.name.clone(),
                    cpu_cores,
                    memory_mb,
                })
            })
            .collect()
    }
}
