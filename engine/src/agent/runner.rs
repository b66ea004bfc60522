//! Conversation orchestrator
//!
//! One call to [`Orchestrator::run`] handles one user turn:
//!
//! 1. Persist the user message and build the bounded context
//! 2. Stream a generation, forwarding text deltas as they arrive
//! 3. Run the requested capability calls in order
//!    (repetition check, approval, invocation)
//! 4. Fold the results into the context and stream again
//!
//! The run ends when a generation requests no calls (`Completed`), the
//! detector fires (`Aborted`), the provider fails (`Failed`), the iteration
//! limit is hit (`Stopped`) or the cancellation token fires (`Cancelled`).

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use sdk::capability::CapabilityContext;
use sdk::errors::EngineError;
use sdk::types::CallParams;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AgentProfile, EngineContext, LoopDetector, LoopPattern};
use crate::approval::{ApprovalGate, ApprovalPrompter, DenyAllPrompter};
use crate::history::{to_context, ContextManager, MessageHistory, SessionStore};
use crate::llm::{CallRequest, ContextEntry, GenerationProvider, GenerationRequest, StreamEvent};
use crate::record::{ascending, CallPart, IdPrefix, Message, Part, Session};
use crate::tools::CapabilityRegistry;

/// Error recorded on calls the gate refused
pub const DENIED_BY_POLICY: &str = "denied by policy";

const CALL_CANCELLED: &str = "call cancelled";

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Aborted(LoopPattern),
    Failed(String),
    Stopped,
    Cancelled,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Cancelled => 130,
            RunOutcome::Aborted(_) | RunOutcome::Failed(_) | RunOutcome::Stopped => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted(pattern) => write!(f, "aborted: {}", pattern),
            RunOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            RunOutcome::Stopped => write!(f, "stopped"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Item of a run's output stream
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Streamed model text or an engine diagnostic
    Text(String),
    /// Always the last event
    Finished(RunOutcome),
}

/// Result of running one batch of capability calls
enum BatchOutcome {
    Done,
    Loop(LoopPattern),
    Cancelled,
}

/// What the generation stream produced next
enum Next {
    Cancelled,
    Event(Option<crate::llm::Result<StreamEvent>>),
}

pub struct Orchestrator {
    provider: Arc<dyn GenerationProvider>,
    registry: Arc<CapabilityRegistry>,
    history: MessageHistory,
    sessions: SessionStore,
    context_manager: ContextManager,
    gate: ApprovalGate,
    detector: LoopDetector,
    profile: AgentProfile,
    session: Session,
    model_id: String,
    max_iterations: usize,
    max_messages: usize,
    verbose: bool,
    iteration: usize,
}

impl Orchestrator {
    /// Orchestrator for `session`, using the build profile and denying every
    /// call that needs a prompt until a prompter is set.
    pub fn new(
        ctx: &EngineContext,
        provider: Arc<dyn GenerationProvider>,
        registry: Arc<CapabilityRegistry>,
        session: Session,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            history: ctx.history(&session.project_id),
            sessions: ctx.sessions(),
            context_manager: ctx.context_manager(),
            gate: ctx.gate(Arc::new(DenyAllPrompter)),
            detector: ctx.detector(),
            profile: AgentProfile::build(),
            session,
            model_id: model_id.into(),
            max_iterations: ctx.run.max_iterations.max(1),
            max_messages: ctx.limits.max_messages,
            verbose: ctx.run.verbose,
            iteration: 0,
        }
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Replace the prompter; memoized decisions are dropped
    pub fn with_prompter(mut self, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        self.gate = ApprovalGate::new(self.gate.auto_approve(), prompter);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut ApprovalGate {
        &mut self.gate
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Iterations used by the current or last run
    pub fn iteration_count(&self) -> usize {
        self.iteration
    }

    /// Model used for generations; the profile's model wins
    pub fn model_id(&self) -> &str {
        self.profile.model_id.as_deref().unwrap_or(&self.model_id)
    }

    /// Iteration limit; a profile may lower it but never raise it
    pub fn max_iterations(&self) -> usize {
        self.profile
            .max_steps
            .map_or(self.max_iterations, |steps| steps.clamp(1, self.max_iterations))
    }

    /// Handle one user turn.
    ///
    /// The stream yields text as it is produced and ends with exactly one
    /// [`RunEvent::Finished`]. Dropping it early stops the run at the next
    /// suspension point.
    pub fn run(
        &mut self,
        input: impl Into<String>,
        cancel: CancellationToken,
    ) -> BoxStream<'_, RunEvent> {
        let input = input.into();
        Box::pin(stream! {
            self.iteration = 0;
            self.detector.reset();
            let max_iterations = self.max_iterations();
            info!(
                "Starting run in session {} (agent: {}, model: {}, max iterations: {})",
                self.session.id, self.profile.name, self.model_id(), max_iterations
            );

            let mut user = Message::user(&self.session.id, input.as_str());
            user.agent = Some(self.profile.name.clone());
            if let Err(e) = self.persist(&user).await {
                for event in storage_failure(&e) {
                    yield event;
                }
                return;
            }

            let mut context = match self
                .history
                .build_context_for_generation(&self.session.id, self.max_messages, Some(&user.id))
                .await
            {
                Ok(context) => context,
                Err(e) => {
                    for event in storage_failure(&e) {
                        yield event;
                    }
                    return;
                }
            };
            context.push(ContextEntry::user(input.as_str()));

            let profile = &self.profile;
            let manifest = self.registry.manifest(|name| profile.can_use(name));
            let system = Some(self.profile.system_prompt.clone()).filter(|s| !s.is_empty());

            while self.iteration < max_iterations {
                self.iteration += 1;
                if self.verbose {
                    info!("Iteration {}/{}", self.iteration, max_iterations);
                } else {
                    debug!("Iteration {}/{}", self.iteration, max_iterations);
                }

                let request = GenerationRequest {
                    model: self.model_id().to_string(),
                    context: self.context_manager.prune(context.clone()),
                    system: system.clone(),
                    manifest: manifest.clone(),
                };

                let mut assistant = self.new_assistant_message();
                let mut text = String::new();
                let mut requests: Vec<CallRequest> = Vec::new();
                let mut failure = None;
                let mut cancelled = false;

                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    opened = self.provider.stream(request) => Some(opened),
                };

                match opened {
                    None => cancelled = true,
                    Some(Err(e)) => failure = Some(e),
                    Some(Ok(mut events)) => loop {
                        let next = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Next::Cancelled,
                            item = events.next() => Next::Event(item),
                        };
                        match next {
                            Next::Cancelled => {
                                cancelled = true;
                                break;
                            }
                            Next::Event(None) => break,
                            Next::Event(Some(Ok(StreamEvent::TextDelta(delta)))) => {
                                if !delta.is_empty() {
                                    text.push_str(&delta);
                                    yield RunEvent::Text(delta);
                                }
                            }
                            Next::Event(Some(Ok(StreamEvent::CapabilityCall(call)))) => {
                                debug!("Model requested capability '{}'", call.name);
                                requests.push(call);
                            }
                            Next::Event(Some(Ok(StreamEvent::Usage(usage)))) => {
                                assistant.usage = Some(usage);
                            }
                            Next::Event(Some(Err(e))) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    },
                }

                if !text.is_empty() {
                    assistant.parts.push(Part::text(text.as_str()));
                }

                if cancelled {
                    assistant.set_error("cancelled", "run cancelled");
                    for event in self.cancel_run(&assistant).await {
                        yield event;
                    }
                    return;
                }

                if let Some(e) = failure {
                    error!("Generation failed: {}", e);
                    assistant.set_error("generation", e.to_string());
                    if let Err(persist_error) = self.persist(&assistant).await {
                        warn!("Failed to persist partial assistant message: {}", persist_error);
                    }
                    yield RunEvent::Text(format!("\n[error] generation failed: {}\n", e));
                    yield RunEvent::Finished(RunOutcome::Failed(e.to_string()));
                    return;
                }

                if requests.is_empty() {
                    if let Err(e) = self.persist(&assistant).await {
                        for event in storage_failure(&e) {
                            yield event;
                        }
                        return;
                    }
                    info!(
                        "Run completed after {} iteration(s) in session {}",
                        self.iteration, self.session.id
                    );
                    yield RunEvent::Finished(RunOutcome::Completed);
                    return;
                }

                let batch = self.execute_calls(&mut assistant, requests, &cancel).await;
                match batch {
                    Ok(BatchOutcome::Done) => {}
                    Ok(BatchOutcome::Loop(pattern)) => {
                        warn!("Aborting run: {}", pattern);
                        if let Err(e) = self.persist(&assistant).await {
                            for event in storage_failure(&e) {
                                yield event;
                            }
                            return;
                        }
                        yield RunEvent::Text(format!("\n[loop detected] {}; stopping\n", pattern));
                        yield RunEvent::Finished(RunOutcome::Aborted(pattern));
                        return;
                    }
                    Ok(BatchOutcome::Cancelled) => {
                        for event in self.cancel_run(&assistant).await {
                            yield event;
                        }
                        return;
                    }
                    Err(e) => {
                        for event in storage_failure(&e) {
                            yield event;
                        }
                        return;
                    }
                }

                context.extend(to_context(std::slice::from_ref(&assistant)));
                if let Err(e) = self.persist(&assistant).await {
                    for event in storage_failure(&e) {
                        yield event;
                    }
                    return;
                }
            }

            warn!("Run stopped at the iteration limit ({})", max_iterations);
            yield RunEvent::Text(format!(
                "\n[stopped] reached maximum iterations ({})\n",
                max_iterations
            ));
            yield RunEvent::Finished(RunOutcome::Stopped);
        })
    }

    /// Drain a run, returning all text and the outcome
    pub async fn run_to_completion(
        &mut self,
        input: impl Into<String>,
        cancel: CancellationToken,
    ) -> (String, RunOutcome) {
        let mut text = String::new();
        let mut outcome = RunOutcome::Failed("run ended without an outcome".to_string());
        let mut events = self.run(input, cancel);
        while let Some(event) = events.next().await {
            match event {
                RunEvent::Text(chunk) => text.push_str(&chunk),
                RunEvent::Finished(finished) => outcome = finished,
            }
        }
        (text, outcome)
    }

    fn new_assistant_message(&self) -> Message {
        let mut message = Message::assistant(&self.session.id);
        message.agent = Some(self.profile.name.clone());
        message.model_id = Some(self.model_id().to_string());
        message.provider_id = Some(self.provider.name().to_string());
        message
    }

    /// Save a message and touch the session
    async fn persist(&mut self, message: &Message) -> Result<(), EngineError> {
        self.history.save(&self.session.id, message).await?;
        self.session.touch();
        self.sessions.save(&self.session).await
    }

    async fn cancel_run(&mut self, assistant: &Message) -> [RunEvent; 2] {
        info!("Run cancelled in session {}", self.session.id);
        if let Err(e) = self.persist(assistant).await {
            warn!("Failed to persist cancelled assistant message: {}", e);
        }
        [
            RunEvent::Text("\n[cancelled] run cancelled before completion\n".to_string()),
            RunEvent::Finished(RunOutcome::Cancelled),
        ]
    }

    /// Id for the `index`-th call of this turn, unique within `message`
    fn call_id_for(&self, message: &Message, requested: Option<String>, index: usize) -> String {
        let id = requested
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call_{}_{}", self.iteration, index));
        if message.has_call_id(&id) {
            let fresh = ascending(IdPrefix::Call);
            debug!("Re-keyed duplicate call id {} as {}", id, fresh);
            fresh
        } else {
            id
        }
    }

    /// Run a batch of calls in order, appending one call part per attempt
    async fn execute_calls(
        &mut self,
        assistant: &mut Message,
        requests: Vec<CallRequest>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        for (index, request) in requests.into_iter().enumerate() {
            let CallRequest {
                id,
                name,
                arguments,
            } = request;
            let params = CallParams::from_value(arguments);
            let call_id = self.call_id_for(assistant, id, index);

            if let Some(pattern) = self.detector.check(&name, &params) {
                return Ok(BatchOutcome::Loop(pattern));
            }

            let mut part = CallPart::new(name.as_str(), call_id.as_str(), params.clone());

            if !self.profile.can_use(&name) {
                warn!("Agent '{}' may not use '{}'", self.profile.name, name);
                part.state.fail(
                    format!(
                        "capability '{}' is not available to agent '{}'",
                        name, self.profile.name
                    ),
                    None,
                );
                assistant.add_part(Part::Tool(part))?;
                continue;
            }

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.gate.check(&name, &params) => Some(outcome),
            };
            let Some(outcome) = checked else {
                part.state.fail(CALL_CANCELLED, None);
                assistant.add_part(Part::Tool(part))?;
                return Ok(BatchOutcome::Cancelled);
            };

            if !outcome.decision.approved {
                warn!("Call to '{}' denied (risk: {})", name, outcome.risk);
                part.state.reject(DENIED_BY_POLICY);
                assistant.add_part(Part::Tool(part))?;
                continue;
            }

            if self.verbose {
                info!("Calling '{}' ({}, risk: {})", name, call_id, outcome.risk);
            } else {
                debug!("Calling '{}' ({}, risk: {})", name, call_id, outcome.risk);
            }

            part.state.start();
            let ctx = CapabilityContext::new(
                self.session.id.as_str(),
                assistant.id.as_str(),
                self.profile.name.as_str(),
                self.session.directory.clone(),
            )
            .with_call_id(call_id.as_str());

            let invoked = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.registry.invoke(&name, &params, &ctx) => Some(result),
            };
            let Some(result) = invoked else {
                part.state.fail(CALL_CANCELLED, None);
                assistant.add_part(Part::Tool(part))?;
                return Ok(BatchOutcome::Cancelled);
            };

            match result.error {
                Some(error) => {
                    debug!("'{}' returned an error: {}", name, error);
                    part.state.fail(error, Some(result.output));
                }
                None => part.state.succeed(result.output),
            }
            part.state.metadata = result.metadata;
            assistant.add_part(Part::Tool(part))?;
        }
        Ok(BatchOutcome::Done)
    }
}

fn storage_failure(e: &EngineError) -> [RunEvent; 2] {
    error!("Failed to persist conversation: {}", e);
    [
        RunEvent::Text(format!("\n[error] could not save conversation: {}\n", e)),
        RunEvent::Finished(RunOutcome::Failed(e.to_string())),
    ]
}
