//! Managed databases: credential Secret, data PVC, single-replica
//! StatefulSet and ClusterIP Service per database.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use rand::Rng;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::orchestrator::{ClusterOrchestrator, LABEL_DATABASE, labels, require};

const PASSWORD_LEN: usize = 24;
const DEFAULT_DATABASE_NAME: &str = "app";

/// Secret keys an engine reads its credentials from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialKeys {
    /// `None` for engines without named users.
    pub username: Option<&'static str>,
    pub password: &'static str,
    pub database: Option<&'static str>,
    /// Superuser password the image refuses to start without.
    pub root_password: Option<&'static str>,
}

/// Static per-engine facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub image: &'static str,
    pub default_version: &'static str,
    pub data_path: &'static str,
    pub port: u16,
    /// Exec probe used for both liveness and readiness.
    pub probe_command: &'static [&'static str],
    /// Container args, when the image needs them.
    pub args: &'static [&'static str],
    pub credentials: CredentialKeys,
    pub url_scheme: &'static str,
}

const POSTGRESQL: EngineDescriptor = EngineDescriptor {
    image: "postgres",
    default_version: "16",
    data_path: "/var/lib/postgresql/data",
    port: 5432,
    probe_command: &["sh", "-c", "pg_isready -U \"$POSTGRES_USER\" -d \"$POSTGRES_DB\""],
    args: &[],
    credentials: CredentialKeys {
        username: Some("POSTGRES_USER"),
        password: "POSTGRES_PASSWORD",
        database: Some("POSTGRES_DB"),
        root_password: None,
    },
    url_scheme: "postgresql",
};

const MYSQL: EngineDescriptor = EngineDescriptor {
    image: "mysql",
    default_version: "8.0",
    data_path: "/var/lib/mysql",
    port: 3306,
    probe_command: &["sh", "-c", "mysqladmin ping -h 127.0.0.1 --silent"],
    args: &[],
    credentials: CredentialKeys {
        username: Some("MYSQL_USER"),
        password: "MYSQL_PASSWORD",
        database: Some("MYSQL_DATABASE"),
        root_password: Some("MYSQL_ROOT_PASSWORD"),
    },
    url_scheme: "mysql",
};

const MONGODB: EngineDescriptor = EngineDescriptor {
    image: "mongo",
    default_version: "7.0",
    data_path: "/data/db",
    port: 27017,
    probe_command: &["mongosh", "--quiet", "--eval", "db.adminCommand('ping')"],
    args: &[],
    credentials: CredentialKeys {
        username: Some("MONGO_INITDB_ROOT_USERNAME"),
        password: "MONGO_INITDB_ROOT_PASSWORD",
        database: Some("MONGO_INITDB_DATABASE"),
        root_password: None,
    },
    url_scheme: "mongodb",
};

const REDIS: EngineDescriptor = EngineDescriptor {
    image: "redis",
    default_version: "7",
    data_path: "/data",
    port: 6379,
    probe_command: &["sh", "-c", "redis-cli -a \"$REDIS_PASSWORD\" ping"],
    args: &["--requirepass", "$(REDIS_PASSWORD)", "--appendonly", "yes"],
    credentials: CredentialKeys {
        username: None,
        password: "REDIS_PASSWORD",
        database: None,
        root_password: None,
    },
    url_scheme: "redis",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Postgresql,
    Mysql,
    Mongodb,
    Redis,
}

impl DatabaseEngine {
    pub fn descriptor(&self) -> &'static EngineDescriptor {
        match self {
            DatabaseEngine::Postgresql => &POSTGRESQL,
            DatabaseEngine::Mysql => &MYSQL,
            DatabaseEngine::Mongodb => &MONGODB,
            DatabaseEngine::Redis => &REDIS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgresql => "postgresql",
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Mongodb => "mongodb",
            DatabaseEngine::Redis => "redis",
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseEngine::Postgresql),
            "mysql" => Ok(DatabaseEngine::Mysql),
            "mongodb" | "mongo" => Ok(DatabaseEngine::Mongodb),
            "redis" => Ok(DatabaseEngine::Redis),
            other => Err(ClusterError::Invalid(format!("unknown database engine '{other}'"))),
        }
    }
}

/// Declared intent for one managed database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub project_id: String,
    pub database_id: String,
    pub engine: DatabaseEngine,
    /// Image tag; the engine default when unset.
    pub version: Option<String>,
    pub size_mb: u32,
    /// Logical database name; `app` when unset.
    pub database_name: Option<String>,
    pub storage_class: Option<String>,
}

impl DatabaseSpec {
    pub fn new(
        project_id: impl Into<String>,
        database_id: impl Into<String>,
        engine: DatabaseEngine,
        size_mb: u32,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: database_id.into(),
            engine,
            version: None,
            size_mb,
            database_name: None,
            storage_class: None,
        }
    }

    fn validate(&self) -> ClusterResult<()> {
        require("project_id", &self.project_id)?;
        require("database_id", &self.database_id)?;
        if self.size_mb == 0 {
            return Err(ClusterError::Invalid("size_mb must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub engine: DatabaseEngine,
    pub username: String,
    pub password: String,
    pub database: String,
    /// In-cluster DNS name of the database Service.
    pub host: String,
    pub port: u16,
    pub connection_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub exists: bool,
    pub ready: bool,
    pub replicas: i32,
    pub ready_replicas: i32,
}

fn random_username() -> String {
    let suffix = Alphanumeric
        .sample_string(&mut rand::thread_rng(), 8)
        .to_ascii_lowercase();
    format!("tb_{suffix}")
}

fn random_password() -> String {
    let mut rng = rand::thread_rng();
    // First character is a letter so no engine parses it as a number.
    let first = rng.gen_range(b'a'..=b'z') as char;
    format!("{first}{}", Alphanumeric.sample_string(&mut rng, PASSWORD_LEN - 1))
}

fn connection_url(engine: DatabaseEngine, user: &str, password: &str, host: &str, db: &str) -> String {
    let d = engine.descriptor();
    match engine {
        DatabaseEngine::Redis => format!("{}://:{password}@{host}:{}/0", d.url_scheme, d.port),
        DatabaseEngine::Mongodb => format!(
            "{}://{user}:{password}@{host}:{}/{db}?authSource=admin",
            d.url_scheme, d.port
        ),
        DatabaseEngine::Postgresql | DatabaseEngine::Mysql => {
            format!("{}://{user}:{password}@{host}:{}/{db}", d.url_scheme, d.port)
        }
    }
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    /// In-cluster DNS name of a database Service.
    pub fn database_host(&self, project_id: &str, database_id: &str) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.names.database(database_id),
            self.namespace_name(project_id)
        )
    }

    /// Credentials stored in an existing credential Secret, if any.
    async fn stored_credentials(
        &self,
        namespace: &str,
        spec: &DatabaseSpec,
    ) -> ClusterResult<Option<(String, String, String)>> {
        let name = self.names.database_credentials(&spec.database_id);
        let Some(secret) = self.get_opt::<Secret>(namespace, &name).await? else {
            return Ok(None);
        };
        let keys = spec.engine.descriptor().credentials;
        let Some(password) = secret_value(&secret, keys.password) else {
            return Ok(None);
        };
        let username = keys
            .username
            .and_then(|k| secret_value(&secret, k))
            .unwrap_or_else(|| "default".to_string());
        let database = keys
            .database
            .and_then(|k| secret_value(&secret, k))
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
        Ok(Some((username, password, database)))
    }

    /// Provision a database. Re-running for an existing database reuses the
    /// stored credentials and creates only what is missing.
    pub async fn create_database(&self, spec: &DatabaseSpec) -> ClusterResult<DatabaseCredentials> {
        spec.validate()?;
        let namespace = self.namespace_name(&spec.project_id);
        let engine = spec.engine;
        let desc = engine.descriptor();
        let name = self.names.database(&spec.database_id);
        let secret_name = self.names.database_credentials(&spec.database_id);
        let pvc_name = self.names.database_data(&spec.database_id);
        let labels = labels(&spec.project_id, LABEL_DATABASE, &spec.database_id);

        let (username, password, database) = match self.stored_credentials(&namespace, spec).await? {
            Some(existing) => existing,
            None => {
                let username = if desc.credentials.username.is_some() {
                    random_username()
                } else {
                    "default".to_string()
                };
                let database = spec
                    .database_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
                (username, random_password(), database)
            }
        };

        let mut data = BTreeMap::new();
        data.insert(
            desc.credentials.password.to_string(),
            ByteString(password.clone().into_bytes()),
        );
        if let Some(key) = desc.credentials.username {
            data.insert(key.to_string(), ByteString(username.clone().into_bytes()));
        }
        if let Some(key) = desc.credentials.database {
            data.insert(key.to_string(), ByteString(database.clone().into_bytes()));
        }
        // Never returned to callers; an existing Secret keeps its own value.
        if let Some(key) = desc.credentials.root_password {
            data.insert(key.to_string(), ByteString(random_password().into_bytes()));
        }
        let secret: Secret = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": secret_name, "namespace": namespace, "labels": labels },
            "type": "Opaque",
            "data": data,
        }))?;
        self.create_if_absent(&namespace, &secret).await?;

        let storage_class = spec
            .storage_class
            .clone()
            .unwrap_or_else(|| self.settings.storage_class.clone());
        let pvc: PersistentVolumeClaim = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": { "name": pvc_name, "namespace": namespace, "labels": labels },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "storageClassName": storage_class,
                "resources": { "requests": { "storage": format!("{}Mi", spec.size_mb) } },
            },
        }))?;
        self.create_if_absent(&namespace, &pvc).await?;

        let version = spec.version.as_deref().unwrap_or(desc.default_version);
        let probe = json!({
            "exec": { "command": desc.probe_command },
            "initialDelaySeconds": 15,
            "periodSeconds": 10,
        });
        let mut container = json!({
            "name": engine.as_str(),
            "image": format!("{}:{version}", desc.image),
            "ports": [{ "name": engine.as_str(), "containerPort": desc.port, "protocol": "TCP" }],
            "envFrom": [{ "secretRef": { "name": secret_name } }],
            "volumeMounts": [{ "name": "data", "mountPath": desc.data_path }],
            "livenessProbe": probe,
            "readinessProbe": probe,
        });
        if !desc.args.is_empty() {
            container["args"] = json!(desc.args);
        }
        let statefulset: StatefulSet = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "spec": {
                "replicas": 1,
                "serviceName": name,
                "selector": { "matchLabels": { LABEL_DATABASE: spec.database_id } },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "containers": [container],
                        "volumes": [{ "name": "data", "persistentVolumeClaim": { "claimName": pvc_name } }],
                    },
                },
            },
        }))?;
        self.create_if_absent(&namespace, &statefulset).await?;

        let service: Service = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "spec": {
                "type": "ClusterIP",
                "selector": { LABEL_DATABASE: spec.database_id },
                "ports": [{ "name": engine.as_str(), "port": desc.port, "targetPort": desc.port }],
            },
        }))?;
        self.create_if_absent(&namespace, &service).await?;

        let host = self.database_host(&spec.project_id, &spec.database_id);
        info!(%namespace, database = %name, %engine, "database provisioned");
        Ok(DatabaseCredentials {
            engine,
            connection_url: connection_url(engine, &username, &password, &host, &database),
            username,
            password,
            database,
            host,
            port: desc.port,
        })
    }

    /// Remove StatefulSet, Service, PVC and Secret, in that order.
    pub async fn delete_database(&self, project_id: &str, database_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.database(database_id);
        self.delete_if_present::<StatefulSet>(&namespace, &name).await?;
        self.delete_if_present::<Service>(&namespace, &name).await?;
        self.delete_if_present::<PersistentVolumeClaim>(&namespace, &self.names.database_data(database_id))
            .await?;
        self.delete_if_present::<Secret>(&namespace, &self.names.database_credentials(database_id))
            .await?;
        info!(%namespace, database = %name, "database deleted");
        Ok(())
    }

    pub async fn get_database_status(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> ClusterResult<DatabaseStatus> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.database(database_id);
        let Some(statefulset) = self.get_opt::<StatefulSet>(&namespace, &name).await? else {
            return Ok(DatabaseStatus::default());
        };
        let status = statefulset.status.unwrap_or_default();
        let ready_replicas = status.ready_replicas.unwrap_or(0);
        Ok(DatabaseStatus {
            exists: true,
            ready: ready_replicas >= 1,
            replicas: status.replicas,
            ready_replicas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::orchestrator;

    const DB: &str = "a1b2c3d4-e5f6-4711-8899-aabbccddeeff";

    #[test]
    fn engine_parsing_and_descriptors() {
        assert_eq!("Postgres".parse::<DatabaseEngine>().unwrap(), DatabaseEngine::Postgresql);
        assert_eq!("mongo".parse::<DatabaseEngine>().unwrap(), DatabaseEngine::Mongodb);
        assert!("oracle".parse::<DatabaseEngine>().is_err());
        assert_eq!(DatabaseEngine::Mysql.descriptor().port, 3306);
        assert_eq!(DatabaseEngine::Redis.descriptor().credentials.username, None);
        assert_eq!(
            DatabaseEngine::Mysql.descriptor().credentials.root_password,
            Some("MYSQL_ROOT_PASSWORD")
        );
        assert_eq!(DatabaseEngine::Postgresql.descriptor().credentials.root_password, None);
    }

    #[tokio::test]
    async fn postgres_credentials_and_resources() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        let creds = orch
            .create_database(&DatabaseSpec::new("p1", DB, DatabaseEngine::Postgresql, 1024))
            .await
            .unwrap();

        let host = creds.host.strip_suffix(".proj-p1.svc.cluster.local").unwrap();
        let id = host.strip_prefix("db-").unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(creds.port, 5432);
        assert!(creds.connection_url.starts_with("postgresql://"));
        assert!(creds.connection_url.ends_with(":5432/app"));

        let pvc: PersistentVolumeClaim = cluster.get("proj-p1", "db-a1b2c3d4-data").await.unwrap();
        let requests = pvc.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"].0, "1024Mi");

        let sts: StatefulSet = cluster.get("proj-p1", "db-a1b2c3d4").await.unwrap();
        let sts_spec = sts.spec.unwrap();
        assert_eq!(sts_spec.replicas, Some(1));
        let container = &sts_spec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("postgres:16"));
        assert!(container.readiness_probe.is_some());

        let secret: Secret = cluster.get("proj-p1", "db-a1b2c3d4-credentials").await.unwrap();
        assert_eq!(
            secret_value(&secret, "POSTGRES_PASSWORD").as_deref(),
            Some(creds.password.as_str())
        );
    }

    #[tokio::test]
    async fn creating_twice_reuses_credentials_and_resources() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        let spec = DatabaseSpec::new("p1", DB, DatabaseEngine::Mysql, 512);

        let first = orch.create_database(&spec).await.unwrap();
        let second = orch.create_database(&spec).await.unwrap();
        assert_eq!(first, second);
        assert!(first.connection_url.starts_with("mysql://"));

        let secret: Secret = cluster.get("proj-p1", "db-a1b2c3d4-credentials").await.unwrap();
        let root = secret_value(&secret, "MYSQL_ROOT_PASSWORD").unwrap();
        assert_eq!(root.len(), first.password.len());
        assert_ne!(root, first.password);
        assert_eq!(secret_value(&secret, "MYSQL_USER"), Some(first.username.clone()));

        assert_eq!(cluster.count::<Secret>("proj-p1"), 1);
        assert_eq!(cluster.count::<PersistentVolumeClaim>("proj-p1"), 1);
        assert_eq!(cluster.count::<StatefulSet>("proj-p1"), 1);
        assert_eq!(cluster.count::<Service>("proj-p1"), 1);
    }

    #[tokio::test]
    async fn redis_url_has_no_user() {
        let (orch, _) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        let creds = orch
            .create_database(&DatabaseSpec::new("p1", DB, DatabaseEngine::Redis, 256))
            .await
            .unwrap();
        assert!(creds.connection_url.starts_with("redis://:"));
        assert!(creds.connection_url.ends_with(":6379/0"));
    }

    #[tokio::test]
    async fn status_and_idempotent_delete() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        assert!(!orch.get_database_status("p1", DB).await.unwrap().exists);
        orch.delete_database("p1", DB).await.unwrap();

        orch.create_database(&DatabaseSpec::new("p1", DB, DatabaseEngine::Mongodb, 2048))
            .await
            .unwrap();
        let status = orch.get_database_status("p1", DB).await.unwrap();
        assert!(status.exists);
        assert!(!status.ready);

        cluster
            .set_status::<StatefulSet>("proj-p1", "db-a1b2c3d4", json!({"replicas": 1, "readyReplicas": 1}))
            .unwrap();
        assert!(orch.get_database_status("p1", DB).await.unwrap().ready);

        orch.delete_database("p1", DB).await.unwrap();
        orch.delete_database("p1", DB).await.unwrap();
        assert_eq!(cluster.count::<StatefulSet>("proj-p1"), 0);
        assert_eq!(cluster.count::<Secret>("proj-p1"), 0);
    }

    #[tokio::test]
    async fn zero_size_is_invalid() {
        let (orch, _) = orchestrator();
        let err = orch
            .create_database(&DatabaseSpec::new("p1", DB, DatabaseEngine::Postgresql, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Invalid(_)));
    }
}
