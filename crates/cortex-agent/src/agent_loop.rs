//! Agent Loop — `ENTER → ROUTE → BUILD_CONTEXT → CALL_LLM → branch` (spec.md
//! §4.8). Grounded on `skynet-agent::tools::tool_loop::run_tool_loop`,
//! generalized from a single fixed-provider loop into one that re-routes
//! through the Router/Budget Gate on every `CALL_LLM` step, and from
//! `skynet-scheduler::engine::SchedulerEngine`'s fire-and-forget progress
//! convention for `ProgressEvent` emission.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cortex_core::{Clock, SessionId};
use cortex_memory::MemoryStore;
use cortex_providers::classifier::HeuristicTokenCounter;
use cortex_providers::{route, ChatRequest, ContentBlock, ProviderPool, RouterTiers, StopReason, UsageLedger};
use cortex_sessions::{MessageRole, SessionStore};

use crate::context::ContextBuilder;
use crate::error::{AgentError, Result};
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::tools::{to_definitions, Tool, ToolContext, ToolResult};

/// Iteration cap for one `processMessage` call. Not the teacher's 25 —
/// spec.md fixes this at 20.
pub const MAX_ITERATIONS: usize = 20;

/// Polled before every `CALL_LLM` and between tool executions so a caller
/// can abort a long-running turn without killing the process.
pub type ShouldStop = dyn Fn() -> bool + Send + Sync;

pub struct AgentLoop {
    workspace: String,
    tool_timeout: Duration,
    providers: Arc<ProviderPool>,
    tiers: RouterTiers,
    ledger: Arc<UsageLedger>,
    memory: Arc<MemoryStore>,
    sessions: Arc<SessionStore>,
    context: ContextBuilder,
    tools: Vec<Box<dyn Tool>>,
    clock: Arc<dyn Clock>,
    /// Per-session interrupt channel senders, registered for the duration of
    /// an in-flight `process_message` call.
    interrupts: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace: String,
        tool_timeout: Duration,
        providers: Arc<ProviderPool>,
        tiers: RouterTiers,
        ledger: Arc<UsageLedger>,
        memory: Arc<MemoryStore>,
        sessions: Arc<SessionStore>,
        mut tools: Vec<Box<dyn Tool>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = ContextBuilder::new(sessions.clone(), memory.clone());
        tools.push(Box::new(crate::tools::recall::RecallTool::new(context.cache_handle())));
        Self {
            workspace,
            tool_timeout,
            providers,
            tiers,
            ledger,
            memory,
            sessions,
            context,
            tools,
            clock,
            interrupts: DashMap::new(),
        }
    }

    /// Injects a message into a currently-running turn for `session_id`.
    /// Dropped silently if no turn is in flight — the caller should fall
    /// back to starting a fresh `process_message` in that case.
    pub fn push_interrupt(&self, session_id: &str, text: String) {
        if let Some(tx) = self.interrupts.get(session_id) {
            let _ = tx.send(text);
        }
    }

    /// Runs one full turn: appends `text` as a user message, drives the
    /// state machine until the model ends its turn, hits the iteration cap,
    /// or `should_stop` fires, and returns the final assistant text.
    pub async fn process_message(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
        progress: Option<ProgressSender>,
        should_stop: Option<&ShouldStop>,
        compress_model: &str,
        max_context_tokens: usize,
    ) -> Result<String> {
        let (tx, mut interrupt_rx) = mpsc::unbounded_channel();
        self.interrupts.insert(session_id.to_string(), tx);

        let result = self
            .run(
                session_id,
                user_id,
                text,
                progress,
                should_stop,
                compress_model,
                max_context_tokens,
                &mut interrupt_rx,
            )
            .await;

        self.interrupts.remove(session_id);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
        progress: Option<ProgressSender>,
        should_stop: Option<&ShouldStop>,
        compress_model: &str,
        max_context_tokens: usize,
        interrupt_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<String> {
        let progress = progress.as_ref();
        let started_at = self.clock.now();

        self.sessions
            .append_message(session_id, MessageRole::User, vec![ContentBlock::Text { text: text.to_string() }])?;

        let ctx = ToolContext { workspace: self.workspace.clone(), session_id: session_id.to_string() };
        let mut next_input = text.to_string();
        let mut last_text = String::new();

        for iteration in 0..MAX_ITERATIONS {
            if should_stop.map(|f| f()).unwrap_or(false) {
                warn!(session_id, iteration, "process_message stopped by caller before CALL_LLM");
                return Ok(last_text);
            }

            emit(progress, ProgressEvent::Thinking);

            let counter = HeuristicTokenCounter;
            let decision = route(&next_input, &SessionId::from(session_id), self.tools.len(), &self.tiers, &self.providers, &self.ledger)
                .map_err(AgentError::Router)?;

            let messages = self
                .context
                .build(
                    session_id,
                    user_id,
                    &decision.model,
                    max_context_tokens as u32,
                    &self.providers,
                    &decision.provider,
                    compress_model,
                    &counter,
                    &next_input,
                    progress,
                )
                .await?;

            let req = ChatRequest {
                model: decision.model.clone(),
                messages,
                system: None,
                tools: to_definitions(&self.tools),
                temperature: None,
                max_tokens: None,
            };

            debug!(session_id, iteration, provider = %decision.provider, model = %decision.model, "CALL_LLM");
            let response = self.providers.call(&decision.provider, &req).await.map_err(AgentError::Provider)?;

            self.ledger
                .record(&SessionId::from(session_id), &decision.model, decision.tier, response.usage.input_tokens, response.usage.output_tokens)
                .ok();

            last_text = response.text();

            self.sessions.append_message(session_id, MessageRole::Assistant, response.content.clone())?;

            match response.stop_reason {
                StopReason::EndTurn | StopReason::MaxTokens => {
                    let elapsed_ms = (self.clock.now() - started_at).num_milliseconds();
                    info!(session_id, iteration, elapsed_ms, stop_reason = ?response.stop_reason, "turn complete");
                    return Ok(last_text);
                }
                StopReason::Error => {
                    return Err(AgentError::SessionNotFound(format!("provider {} returned an error stop reason", decision.provider)));
                }
                StopReason::ToolUse => {}
            }

            let tool_uses = response.tool_uses();
            if tool_uses.is_empty() {
                return Ok(last_text);
            }

            let mut result_blocks: Vec<Option<ContentBlock>> = vec![None; tool_uses.len()];
            let mut pure_idx = Vec::new();
            let mut serial_idx = Vec::new();
            for (i, (_, name, _)) in tool_uses.iter().enumerate() {
                if self.find_tool(name).map(|t| t.is_pure()).unwrap_or(false) {
                    pure_idx.push(i);
                } else {
                    serial_idx.push(i);
                }
            }

            if !pure_idx.is_empty() {
                let pure_futures = pure_idx.iter().map(|&i| {
                    let (id, name, input) = tool_uses[i];
                    let ctx = ctx.clone();
                    async move {
                        let out = self.run_tool(name, id, input.clone(), &ctx, progress).await;
                        (i, id, out)
                    }
                });
                for (i, id, out) in futures_util::future::join_all(pure_futures).await {
                    result_blocks[i] =
                        Some(ContentBlock::ToolResult { id: id.to_string(), output: out.content, is_error: out.is_error });
                }
            }

            for &i in &serial_idx {
                if should_stop.map(|f| f()).unwrap_or(false) {
                    warn!(session_id, iteration, "process_message stopped by caller mid tool batch");
                    break;
                }
                let (id, name, input) = tool_uses[i];
                let out = self.run_tool(name, id, input.clone(), &ctx, progress).await;
                result_blocks[i] = Some(ContentBlock::ToolResult { id: id.to_string(), output: out.content, is_error: out.is_error });
            }

            let tool_results: Vec<ContentBlock> = result_blocks.into_iter().flatten().collect();
            self.sessions.append_message(session_id, MessageRole::Tool, tool_results)?;

            next_input = drain_interrupts(interrupt_rx);
            if next_input.is_empty() {
                next_input = last_text.clone();
            } else {
                self.sessions
                    .append_message(session_id, MessageRole::User, vec![ContentBlock::Text { text: next_input.clone() }])?;
            }
        }

        warn!(session_id, max_iterations = MAX_ITERATIONS, "agent loop hit iteration cap");
        self.sessions.append_message(
            session_id,
            MessageRole::Assistant,
            vec![ContentBlock::Text { text: format!("{last_text}\n\n[stopped: reached the {MAX_ITERATIONS}-step limit for this turn]") }],
        )?;
        Err(AgentError::IterationLimitExceeded(MAX_ITERATIONS))
    }

    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    async fn run_tool(&self, name: &str, call_id: &str, input: serde_json::Value, ctx: &ToolContext, progress: Option<&ProgressSender>) -> ToolResult {
        emit(progress, ProgressEvent::ToolStart { tool: name.to_string(), call_id: call_id.to_string() });

        let Some(tool) = self.find_tool(name) else {
            let result = ToolResult::error(format!("unknown tool: {name}"));
            emit(progress, ProgressEvent::ToolError { tool: name.to_string(), call_id: call_id.to_string(), message: result.content.clone() });
            return result;
        };

        let result = match tokio::time::timeout(self.tool_timeout, tool.execute(ctx, input)).await {
            Ok(r) => r,
            Err(_) => ToolResult::error(format!("tool '{name}' timed out after {}ms", self.tool_timeout.as_millis())),
        };

        if result.is_error {
            emit(progress, ProgressEvent::ToolError { tool: name.to_string(), call_id: call_id.to_string(), message: result.content.clone() });
        } else {
            emit(progress, ProgressEvent::ToolComplete { tool: name.to_string(), call_id: call_id.to_string(), is_error: false });
        }
        result
    }
}

fn drain_interrupts(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    let mut pending = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        pending.push(msg);
    }
    pending.join("\n")
}
