//! Mock generation backend for deterministic tests.
//!
//! ```rust,ignore
//! use ledgerly_inference::mock::MockGenerationBackend;
//!
//! let backend = MockGenerationBackend::new().with_fixed_response(r#"{"transactions": []}"#);
//! let failing = MockGenerationBackend::new().failing("backend down");
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ledgerly_core::{Error, GenerationBackend, Result};

#[derive(Debug, Clone)]
enum Behaviour {
    Respond(String),
    Fail(String),
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
}

/// Mock backend returning a fixed response or a fixed error.
#[derive(Clone)]
pub struct MockGenerationBackend {
    behaviour: Behaviour,
    latency: Duration,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            behaviour: Behaviour::Respond(r#"{"transactions": [], "confidence_score": 0.9}"#.into()),
            latency: Duration::ZERO,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Return `response` verbatim for every call.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        self.behaviour = Behaviour::Respond(response.into());
        self
    }

    /// Fail every call with an inference error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behaviour = Behaviour::Fail(message.into());
        self
    }

    /// Sleep before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().map(|log| log.len()).unwrap_or(0)
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut log) = self.call_log.lock() {
            log.push(MockCall {
                system: system.to_string(),
                prompt: prompt.to_string(),
            });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.behaviour {
            Behaviour::Respond(text) => Ok(text.clone()),
            Behaviour::Fail(message) => Err(Error::Inference(message.clone())),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
