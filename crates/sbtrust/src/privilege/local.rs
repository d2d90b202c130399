//! In-process execution for callers that already run as root.

use async_trait::async_trait;
use std::sync::Arc;

use sbtrust_core::Result;

use super::ops::OpExecutor;
use super::protocol::{HelperRequest, HelperResponse};
use super::{ElevatedSession, PrivilegeBroker};

/// Runs privileged operations directly, without a helper process.
pub struct InProcessBroker {
    executor: Arc<OpExecutor>,
}

impl InProcessBroker {
    pub fn new(executor: Arc<OpExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl PrivilegeBroker for InProcessBroker {
    async fn open(&self) -> Result<Box<dyn ElevatedSession>> {
        Ok(Box::new(LocalSession {
            executor: Arc::clone(&self.executor),
        }))
    }
}

struct LocalSession {
    executor: Arc<OpExecutor>,
}

#[async_trait]
impl ElevatedSession for LocalSession {
    async fn call(&mut self, request: HelperRequest) -> Result<HelperResponse> {
        Ok(self.executor.execute(request).await)
    }
}
