//! Image build seam.
//!
//! The real builder lives outside this workspace; the pipeline only needs
//! an image tag back from `build` and a successful `push`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// Everything a builder needs to produce an image for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub service_id: String,
    /// Image repository name, e.g. `web-api`.
    pub image_name: String,
    pub commit_sha: String,
}

#[async_trait]
pub trait BuildClient: Send + Sync {
    /// Build the image and return its fully qualified tag.
    async fn build(&self, request: &BuildRequest) -> PipelineResult<String>;

    /// Push a previously built tag to the registry.
    async fn push(&self, tag: &str) -> PipelineResult<()>;
}

/// Builder that fabricates tags without doing any work.
#[derive(Debug)]
pub struct MockBuildClient {
    registry: String,
    fail_build: AtomicBool,
    fail_push: AtomicBool,
    pushed: Mutex<Vec<String>>,
}

impl MockBuildClient {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            fail_build: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.fail_build.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    /// Tags pushed so far, oldest first.
    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().clone()
    }

    pub fn tag_for(&self, request: &BuildRequest) -> String {
        let sha: String = request.commit_sha.chars().take(12).collect();
        format!("{}/{}:{}", self.registry, request.image_name, sha)
    }
}

impl Default for MockBuildClient {
    fn default() -> Self {
        Self::new("registry.tugboat.local")
    }
}

#[async_trait]
impl BuildClient for MockBuildClient {
    async fn build(&self, request: &BuildRequest) -> PipelineResult<String> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(PipelineError::Build(format!(
                "build of {} failed",
                request.commit_sha
            )));
        }
        let tag = self.tag_for(request);
        info!(service = %request.service_id, %tag, "mock image built");
        Ok(tag)
    }

    async fn push(&self, tag: &str) -> PipelineResult<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(PipelineError::Push(format!("registry rejected {tag}")));
        }
        self.pushed.lock().push(tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest {
        BuildRequest {
            service_id: "svc-1".into(),
            image_name: "web-api".into(),
            commit_sha: "0123456789abcdef0123".into(),
        }
    }

    #[tokio::test]
    async fn tag_uses_short_sha() {
        let client = MockBuildClient::new("reg.local");
        let tag = client.build(&request()).await.unwrap();
        assert_eq!(tag, "reg.local/web-api:0123456789ab");

        client.push(&tag).await.unwrap();
        assert_eq!(client.pushed(), vec![tag]);
    }

    #[tokio::test]
    async fn failure_toggles() {
        let client = MockBuildClient::default();
        client.set_fail_build(true);
        assert!(matches!(
            client.build(&request()).await,
            Err(PipelineError::Build(_))
        ));

        client.set_fail_push(true);
        assert!(matches!(client.push("x:1").await, Err(PipelineError::Push(_))));
        assert!(client.pushed().is_empty());
    }
}
