//! Provider invocation boundary
//!
//! LLM, tool and MCP nodes reach external backends only through
//! [`ProviderInvoker`]. Real HTTP clients plug in behind this trait; the
//! built-in [`SimulatedProvider`] returns canned responses.

use crate::workflow::types::{AgentDefinition, DataMap};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// What kind of call a node is making
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Model,
    Tool,
    Mcp,
}

impl InvocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationKind::Model => "model",
            InvocationKind::Tool => "tool",
            InvocationKind::Mcp => "mcp",
        }
    }
}

/// A single provider call
#[derive(Debug, Clone)]
pub struct ProviderRequest<'a> {
    pub kind: InvocationKind,
    pub node_id: &'a str,
    pub agent: &'a AgentDefinition,
    pub input: &'a DataMap,
}

/// Successful provider response
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub payload: Value,
    pub token_count: u64,
    pub latency: Duration,
}

/// Provider failure. Surfaced in the node output, never thrown past the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no provider registered for '{0}'")]
    UnknownProvider(String),
    #[error("provider '{provider}' failed: {message}")]
    Failed { provider: String, message: String },
    #[error("provider call cancelled")]
    Cancelled,
}

/// Capability interface for model, tool and MCP calls.
///
/// Implementations must observe `cancel` and return promptly once it fires.
pub trait ProviderInvoker: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        request: ProviderRequest<'a>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ProviderReply, ProviderError>>;
}

/// Dispatches to one invoker per provider name
#[derive(Default, Clone)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ProviderInvoker>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router preloaded with simulated backends for the providers the
    /// playground knows about
    pub fn simulated() -> Self {
        let mut router = Self::new();
        for name in ["ollama", "peerllm", "docker-model-runner", "openai", "tool", "mcp"] {
            router.register(name, Arc::new(SimulatedProvider::new(name)));
        }
        router
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ProviderInvoker>) {
        self.providers.insert(name.into().to_lowercase(), provider);
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ProviderInvoker for ProviderRouter {
    fn invoke<'a>(
        &'a self,
        request: ProviderRequest<'a>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ProviderReply, ProviderError>> {
        match self.providers.get(&request.agent.provider.to_lowercase()) {
            Some(provider) => provider.invoke(request, cancel),
            None => {
                let name = request.agent.provider.clone();
                Box::pin(async move { Err(ProviderError::UnknownProvider(name)) })
            }
        }
    }
}

/// Stand-in backend returning canned text
///
/// The reply echoes the agent, model and a digest of the input so that
/// downstream nodes have something deterministic to work with.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    name: String,
    latency: Duration,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn respond(&self, request: &ProviderRequest<'_>) -> Value {
        let agent = request.agent;
        let keys: Vec<&String> = request.input.keys().collect();
        match request.kind {
            InvocationKind::Model => json!(format!(
                "Simulated response from {} ({}) for agent '{}' with inputs {:?}",
                self.name, agent.model, agent.name, keys
            )),
            InvocationKind::Tool => json!({
                "tools": agent.tools,
                "result": format!("Simulated tool call by agent '{}'", agent.name),
            }),
            InvocationKind::Mcp => json!({
                "server": agent.mcp_server,
                "result": format!("Simulated MCP call by agent '{}'", agent.name),
            }),
        }
    }
}

impl ProviderInvoker for SimulatedProvider {
    fn invoke<'a>(
        &'a self,
        request: ProviderRequest<'a>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ProviderReply, ProviderError>> {
        Box::pin(async move {
            let started = Instant::now();
            if !self.latency.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(self.latency) => {}
                }
            }
            let payload = self.respond(&request);
            let token_count = payload.to_string().split_whitespace().count() as u64;
            tracing::debug!(
                "🤖 Simulated {} call for node '{}' via {}",
                request.kind.as_str(),
                request.node_id,
                self.name
            );
            Ok(ProviderReply {
                payload,
                token_count,
                latency: started.elapsed(),
            })
        })
    }
}
