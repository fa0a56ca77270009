//! Object names derived from owning entity identifiers.

use tugboat_core::NamingStrategy;

/// Names every cluster object the orchestrator creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceNames {
    strategy: NamingStrategy,
}

impl ResourceNames {
    pub fn new(strategy: NamingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> NamingStrategy {
        self.strategy
    }

    fn named(&self, prefix: &str, id: &str) -> String {
        format!("{prefix}-{}", self.strategy.fragment(id))
    }

    /// Deployment and Service of a workload.
    pub fn workload(&self, service_id: &str) -> String {
        self.named("svc", service_id)
    }

    pub fn ingress(&self, service_id: &str) -> String {
        self.named("ing", service_id)
    }

    /// TLS secret shared by every host of a workload's ingress.
    pub fn tls_secret(&self, service_id: &str) -> String {
        format!("{}-tls", self.ingress(service_id))
    }

    /// Secret holding a workload's environment variables.
    pub fn env_secret(&self, service_id: &str) -> String {
        self.named("env", service_id)
    }

    /// StatefulSet and Service of a managed database.
    pub fn database(&self, database_id: &str) -> String {
        self.named("db", database_id)
    }

    pub fn database_credentials(&self, database_id: &str) -> String {
        format!("{}-credentials", self.database(database_id))
    }

    pub fn database_data(&self, database_id: &str) -> String {
        format!("{}-data", self.database(database_id))
    }

    pub fn volume(&self, volume_id: &str) -> String {
        self.named("vol", volume_id)
    }
}
