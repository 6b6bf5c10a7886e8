//! The agent reasoning loop implementation.
//!
//! A run moves through three states. `Agent` invokes the model with the
//! full thread history; a reply with tool calls moves to `ToolExec`, which
//! dispatches them and returns to `Agent`; a plain answer moves to `End`,
//! where the formatter shapes it. The thread is locked for the whole run
//! and its state is written back only when the run succeeds.

use std::sync::Arc;
use std::time::Duration;

use quarry_config::AppConfig;
use quarry_core::error::RunError;
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::message::{ConversationState, Message, ThreadId};
use quarry_core::provider::{ModelReply, Provider, ProviderRequest};
use quarry_core::shape::{AskRequest, OutputShape};
use quarry_core::thread::ThreadStore;
use quarry_core::tool::{ToolCall, ToolRegistry};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::formatter::Formatter;
use crate::prompt;
use crate::retry::{RetryPolicy, invoke};

/// The result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    /// The model's final free-text answer
    pub answer: String,
    /// The answer shaped into the requested JSON object
    pub output: serde_json::Value,
    /// Model invocations in this run
    pub turns: u32,
    /// Tool calls dispatched in this run
    pub tool_calls: usize,
}

enum Step {
    Agent,
    ToolExec(Vec<ToolCall>),
    End(String),
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    dispatcher: Dispatcher,

    threads: Arc<dyn ThreadStore>,

    formatter: Formatter,

    /// Base system prompt; the tool catalogue is appended
    system_prompt: String,

    /// Maximum model invocations per run
    max_turns: u32,

    policy: RetryPolicy,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop with default bounds.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        threads: Arc<dyn ThreadStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = model.into();
        let defaults = quarry_config::AgentConfig::default();
        Self {
            formatter: Formatter::new(provider.clone(), model.clone()),
            dispatcher: Dispatcher::new(tools, event_bus.clone()),
            provider,
            model,
            temperature: 0.2,
            max_tokens: None,
            threads,
            system_prompt: defaults.system_prompt.clone(),
            max_turns: defaults.max_turns,
            policy: RetryPolicy::from_config(&defaults),
            event_bus,
        }
    }

    /// Build a loop with every bound taken from configuration.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        threads: Arc<dyn ThreadStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.agent);
        let formatter = Formatter::new(provider.clone(), config.formatter_model())
            .with_max_retries(config.formatter.max_retries)
            .with_retry_policy(policy.clone());

        Self::new(provider, config.agent_model(), tools, threads, event_bus)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_turns(config.agent.max_turns)
            .with_retry_policy(policy)
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs))
            .with_system_prompt(&config.agent.system_prompt)
            .with_formatter(formatter)
    }

    /// Set the maximum number of model invocations per run.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    /// Answer one request on its thread.
    ///
    /// A request without a thread id starts a new thread. Runs on the same
    /// thread are serialized; runs on different threads proceed
    /// independently. On any error, including cancellation, the stored
    /// thread is left as it was before the run.
    pub async fn run(
        &self,
        request: AskRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let thread_id = request
            .thread_id
            .as_deref()
            .map(ThreadId::from)
            .unwrap_or_default();
        let shape = request.shape();

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            guard = self.threads.lock(&thread_id) => guard,
        };

        let mut state = self.threads.get(&thread_id).await?;
        info!(
            thread_id = %thread_id,
            history = state.len(),
            "Starting run"
        );
        self.event_bus.publish(DomainEvent::RunStarted {
            thread_id: thread_id.to_string(),
            timestamp: chrono::Utc::now(),
        });

        if state.is_empty() {
            state.push(Message::system(prompt::system_prompt(
                &self.system_prompt,
                self.dispatcher.tools(),
            )));
        }
        state.push(Message::user(prompt::user_prompt(&request.query, &shape)));

        match self.drive(&mut state, &shape, &cancel).await {
            Ok((answer, output, turns, tool_calls)) => {
                self.threads.put(&thread_id, state).await?;
                info!(thread_id = %thread_id, turns, tool_calls, "Run completed");
                self.event_bus.publish(DomainEvent::RunCompleted {
                    thread_id: thread_id.to_string(),
                    turns,
                    timestamp: chrono::Utc::now(),
                });
                Ok(RunOutcome {
                    thread_id,
                    answer,
                    output,
                    turns,
                    tool_calls,
                })
            }
            Err(e) => {
                warn!(thread_id = %thread_id, code = e.code(), error = %e, "Run failed");
                self.event_bus.publish(DomainEvent::RunFailed {
                    thread_id: thread_id.to_string(),
                    code: e.code().into(),
                    timestamp: chrono::Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Run the state machine to `End` and format the answer.
    async fn drive(
        &self,
        state: &mut ConversationState,
        shape: &OutputShape,
        cancel: &CancellationToken,
    ) -> Result<(String, serde_json::Value, u32, usize), RunError> {
        let definitions = self.dispatcher.tools().definitions();
        let mut turns = 0u32;
        let mut dispatched = 0usize;
        let mut step = Step::Agent;

        loop {
            step = match step {
                Step::Agent => {
                    let request = ProviderRequest {
                        model: self.model.clone(),
                        messages: state.messages.clone(),
                        temperature: self.temperature,
                        max_tokens: self.max_tokens,
                        tools: definitions.clone(),
                        response_format: Default::default(),
                    };

                    let response =
                        invoke(self.provider.as_ref(), &request, &self.policy, cancel).await?;
                    turns += 1;
                    state.turn_count += 1;

                    let call_count = match &response.reply {
                        ModelReply::ToolCalls { calls, .. } => calls.len(),
                        ModelReply::Answer { .. } => 0,
                    };
                    debug!(
                        thread_id = %state.thread_id,
                        turn = turns,
                        tool_calls = call_count,
                        "Model replied"
                    );
                    self.event_bus.publish(DomainEvent::ResponseGenerated {
                        thread_id: state.thread_id.to_string(),
                        turn: turns,
                        model: response.model.clone(),
                        tool_calls: call_count,
                        tokens_used: response.usage.as_ref().map(|u| u.total_tokens),
                        timestamp: chrono::Utc::now(),
                    });

                    state.push(response.reply.to_message());
                    match response.reply {
                        ModelReply::Answer { content } => Step::End(content),
                        ModelReply::ToolCalls { calls, .. } => {
                            if turns >= self.max_turns {
                                return Err(RunError::BoundedTurnsExceeded {
                                    limit: self.max_turns,
                                });
                            }
                            Step::ToolExec(calls)
                        }
                    }
                }

                Step::ToolExec(calls) => {
                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RunError::Cancelled),
                        results = self.dispatcher.dispatch_all(&calls) => results,
                    };
                    dispatched += results.len();
                    for result in results {
                        let content = if result.is_error {
                            format!("Error: {}", result.payload)
                        } else {
                            result.payload
                        };
                        state.push(Message::tool_result(result.call_id, content));
                    }
                    Step::Agent
                }

                Step::End(answer) => {
                    let output = self.formatter.format(&answer, shape, cancel).await?;
                    return Ok((answer, output, turns, dispatched));
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        SequentialMockProvider, StubPriceTool, make_text_response, make_tool_call,
        make_tool_call_response,
    };
    use quarry_core::error::ProviderError;
    use quarry_core::message::Role;
    use quarry_core::shape::{DataType, OutputItem};
    use quarry_threads::InMemoryThreadStore;
    use serde_json::json;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(StubPriceTool {
                price: 1.23,
                delay: Duration::ZERO,
            }))
            .unwrap();
        Arc::new(registry)
    }

    fn agent(provider: Arc<SequentialMockProvider>, threads: Arc<InMemoryThreadStore>) -> AgentLoop {
        AgentLoop::new(
            provider,
            "mock-model",
            registry(),
            threads,
            Arc::new(EventBus::default()),
        )
    }

    fn price_request() -> AskRequest {
        AskRequest::new(
            "What is the price of TOKENX?",
            vec![OutputItem::new("price", DataType::Number)],
        )
    }

    #[tokio::test]
    async fn tool_call_then_formatted_answer() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("call_1", "get_price", json!({"symbol": "TOKENX"}))],
                "",
            ),
            make_text_response("The price is 1.23"),
            make_text_response(r#"{"price": 1.23}"#),
        ]));
        let threads = Arc::new(InMemoryThreadStore::new());
        let outcome = agent(provider.clone(), threads.clone())
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.output, json!({"price": 1.23}));
        assert_eq!(outcome.answer, "The price is 1.23");
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(provider.call_count(), 3);

        let state = threads.get(&outcome.thread_id).await.unwrap();
        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(state.messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert!(state.tool_calls_balanced());
        assert_eq!(state.turn_count, 2);
    }

    #[tokio::test]
    async fn system_prompt_carries_catalogue_and_tools_are_bound() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            r#"{"price": 2}"#,
        )]));
        let threads = Arc::new(InMemoryThreadStore::new());
        agent(provider.clone(), threads)
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();

        let request = &provider.requests()[0];
        assert!(request.messages[0].content.contains("- `get_price`"));
        assert!(request.messages[1].content.contains("- price (number)"));
        assert_eq!(request.tools.len(), 1);
        // The answer was already shaped JSON: no formatting call
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn turn_budget_counts_model_invocations() {
        let looping: Vec<_> = (0..5)
            .map(|i| {
                make_tool_call_response(
                    vec![make_tool_call(&format!("c{i}"), "get_price", json!({"symbol": "X"}))],
                    "",
                )
            })
            .collect();
        let provider = Arc::new(SequentialMockProvider::new(looping));
        let threads = Arc::new(InMemoryThreadStore::new());
        let err = agent(provider.clone(), threads.clone())
            .with_max_turns(5)
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::BoundedTurnsExceeded { limit: 5 }));
        assert_eq!(provider.call_count(), 5);
        assert_eq!(threads.thread_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn answer_on_the_last_allowed_turn_succeeds() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("c1", "get_price", json!({"symbol": "X"}))],
                "",
            ),
            make_text_response(r#"{"price": 1.23}"#),
        ]));
        let threads = Arc::new(InMemoryThreadStore::new());
        let outcome = agent(provider, threads)
            .with_max_turns(2)
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.turns, 2);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_to_the_model() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("c1", "get_weather", json!({}))], ""),
            make_text_response(r#"{"price": null}"#),
        ]));
        let threads = Arc::new(InMemoryThreadStore::new());
        let outcome = agent(provider.clone(), threads)
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.output, json!({"price": null}));
        let second = &provider.requests()[1];
        let tool_msg = second.messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.content, "Error: unknown tool get_weather");
    }

    #[tokio::test]
    async fn model_failure_leaves_the_thread_untouched() {
        let threads = Arc::new(InMemoryThreadStore::new());
        let first = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            r#"{"price": 1}"#,
        )]));
        let outcome = agent(first, threads.clone())
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();
        let before = threads.get(&outcome.thread_id).await.unwrap();

        let failing = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::AuthenticationFailed("revoked".into()),
        )]));
        let mut again = price_request();
        again.thread_id = Some(outcome.thread_id.to_string());
        let err = agent(failing, threads.clone())
            .run(again, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "model_invocation_failed");
        let after = threads.get(&outcome.thread_id).await.unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(threads.lock_count(), 0);
    }

    #[tokio::test]
    async fn failed_runs_on_new_threads_leave_no_locks() {
        let threads = Arc::new(InMemoryThreadStore::new());
        for _ in 0..3 {
            let failing = Arc::new(SequentialMockProvider::scripted(vec![Err(
                ProviderError::AuthenticationFailed("revoked".into()),
            )]));
            let err = agent(failing, threads.clone())
                .run(price_request(), CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "model_invocation_failed");
        }
        assert_eq!(threads.thread_count().await.unwrap(), 0);
        assert_eq!(threads.lock_count(), 0);
    }

    #[tokio::test]
    async fn follow_up_appends_to_history() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(r#"{"price": 1}"#),
            make_text_response(r#"{"price": 2}"#),
        ]));
        let threads = Arc::new(InMemoryThreadStore::new());
        let agent = agent(provider.clone(), threads.clone());

        let first = agent
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();
        let mut follow_up = price_request();
        follow_up.thread_id = Some(first.thread_id.to_string());
        let second = agent
            .run(follow_up, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.thread_id, second.thread_id);
        let state = threads.get(&first.thread_id).await.unwrap();
        // system, user, assistant, user, assistant
        assert_eq!(state.len(), 5);
        assert_eq!(
            state.messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        // The second invocation saw the whole history
        assert_eq!(provider.requests()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn events_bracket_the_run() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            r#"{"price": 1}"#,
        )]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let agent = AgentLoop::new(
            provider,
            "mock-model",
            registry(),
            Arc::new(InMemoryThreadStore::new()),
            bus,
        );
        agent
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.as_ref(), DomainEvent::RunStarted { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.as_ref(),
            DomainEvent::ResponseGenerated { turn: 1, tool_calls: 0, .. }
        ));
        let third = rx.recv().await.unwrap();
        assert!(matches!(third.as_ref(), DomainEvent::RunCompleted { turns: 1, .. }));
    }

    #[tokio::test]
    async fn from_config_applies_bounds() {
        let mut config = AppConfig::default();
        config.agent.max_turns = 1;
        config.formatter.model = Some("fmt-model".into());
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("c1", "get_price", json!({"symbol": "X"}))],
            "",
        )]));
        let agent = AgentLoop::from_config(
            &config,
            provider,
            registry(),
            Arc::new(InMemoryThreadStore::new()),
            Arc::new(EventBus::default()),
        );
        let err = agent
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::BoundedTurnsExceeded { limit: 1 }));
    }

    /// Sleeps `delay_ms`, then returns `tag` and records when it finished.
    struct Waiter {
        finished: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl quarry_core::tool::Tool for Waiter {
        fn name(&self) -> &str {
            "wait"
        }
        fn description(&self) -> &str {
            "Waits, then echoes its tag"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string"},
                    "delay_ms": {"type": "integer"}
                },
                "required": ["tag", "delay_ms"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> Result<String, quarry_core::error::ToolError> {
            let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let tag = arguments["tag"].as_str().unwrap_or_default().to_string();
            self.finished.lock().unwrap().push(tag.clone());
            Ok(tag)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tool_messages_follow_call_order_not_completion_order() {
        let finished = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(Waiter {
                finished: finished.clone(),
            }))
            .unwrap();

        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![
                    make_tool_call("slow", "wait", json!({"tag": "first", "delay_ms": 300})),
                    make_tool_call("fast", "wait", json!({"tag": "second", "delay_ms": 10})),
                ],
                "",
            ),
            make_text_response(r#"{"price": 1}"#),
        ]));
        let threads = Arc::new(InMemoryThreadStore::new());
        let outcome = AgentLoop::new(
            provider.clone(),
            "mock-model",
            Arc::new(registry),
            threads.clone(),
            Arc::new(EventBus::default()),
        )
        .run(price_request(), CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(*finished.lock().unwrap(), vec!["second", "first"]);
        assert_eq!(outcome.tool_calls, 2);

        let state = threads.get(&outcome.thread_id).await.unwrap();
        let tool_messages: Vec<(&str, &str)> = state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap_or_default(), m.content.as_str()))
            .collect();
        assert_eq!(tool_messages, vec![("slow", "first"), ("fast", "second")]);

        // The model saw the same order on its second turn
        let second_turn = &provider.requests()[1];
        let ids: Vec<_> = second_turn
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn from_config_uses_the_provider_model() {
        let mut config = AppConfig::default();
        config.providers.insert(
            config.default_provider.clone(),
            quarry_config::ProviderConfig {
                api_key: None,
                api_url: None,
                default_model: Some("provider-model".into()),
            },
        );
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            r#"{"price": 1}"#,
        )]));
        let agent = AgentLoop::from_config(
            &config,
            provider.clone(),
            registry(),
            Arc::new(InMemoryThreadStore::new()),
            Arc::new(EventBus::default()),
        );
        agent
            .run(price_request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].model, "provider-model");
    }
}
