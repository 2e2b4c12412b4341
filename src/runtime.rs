//! Invocation runtime
//!
//! Built once at process start, then serves any number of invocations.
//! Each invocation reads the gateway target from the environment, obtains
//! a token, opens a tool session with it and lets the agent answer.

use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::agent::{extract_text, format_all, AgentLoop, GeminiClient, InvocationPayload, LlmClient};
use crate::auth::{AccessToken, CredentialBroker, GateOutcome, OAuthBroker, TokenGate, TokenRequest};
use crate::config::{ConfigError, EnvSource, GatewayConfig, RuntimeConfig};
use crate::gateway::{with_session, McpConnector, SessionConnector};
use crate::Result;

pub struct AgentRuntime {
    broker: Arc<dyn CredentialBroker>,
    connector: Arc<dyn SessionConnector>,
    agent: AgentLoop<Arc<dyn LlmClient>>,
    env: EnvSource,
}

impl AgentRuntime {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        connector: Arc<dyn SessionConnector>,
        agent: AgentLoop<Arc<dyn LlmClient>>,
    ) -> Self {
        Self {
            broker,
            connector,
            agent,
            env: EnvSource::Process,
        }
    }

    /// Read the per-invocation gateway target from `env` instead of the process.
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Wire the production collaborators from configuration.
    pub fn init(config: &RuntimeConfig) -> Self {
        if config.gemini_api_key.is_empty() {
            tracing::warn!("GEMINI_API_KEY is not set; model calls will be rejected");
        }
        if config.identity.providers.is_empty() {
            tracing::warn!("No identity providers configured; every invocation will fail authentication");
        }

        let client: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(&config.gemini_api_key, &config.model));
        let agent = AgentLoop::new(client, config.max_iterations, Some(config.system_prompt.clone()));

        info!(model = %config.model, max_iterations = config.max_iterations, "Runtime initialised");
        Self::new(
            Arc::new(OAuthBroker::new(&config.identity)),
            Arc::new(McpConnector::new()),
            agent,
        )
    }

    /// Answer one invocation.
    ///
    /// Only an incomplete gateway configuration is an `Err`; authentication
    /// and runtime failures come back as user-visible strings.
    pub async fn handle(&self, payload: &InvocationPayload) -> std::result::Result<String, ConfigError> {
        let span = info_span!("invocation", id = %Uuid::new_v4());
        self.handle_inner(payload).instrument(span).await
    }

    async fn handle_inner(&self, payload: &InvocationPayload) -> std::result::Result<String, ConfigError> {
        let gateway = GatewayConfig::from_env(&self.env).map_err(|e| {
            error!("Gateway configuration incomplete: {}", e);
            e
        })?;

        let prompt = payload.prompt();
        info!("Handling prompt ({} chars)", prompt.chars().count());

        let gate = TokenGate::new(
            self.broker.clone(),
            TokenRequest::m2m(&gateway.provider_name, gateway.scopes.clone()),
        );
        info!(
            provider = %gate.request().provider_name,
            scopes = gate.request().scopes.len(),
            "Requesting gateway token"
        );
        let outcome = gate
            .invoke(|token| self.answer(&gateway.gateway_url, token, prompt))
            .await;

        Ok(match outcome {
            GateOutcome::Authorized(Ok(answer)) => answer,
            GateOutcome::Authorized(Err(e)) => {
                error!("Invocation failed: {}", e);
                format!("An error occurred: {}", e)
            }
            GateOutcome::Unauthorized(e) => format!("Authentication failed: {}", e),
        })
    }

    async fn answer(&self, gateway_url: &str, token: AccessToken, prompt: &str) -> Result<String> {
        with_session(self.connector.as_ref(), gateway_url, token, |session| async move {
            let tools = session.list_tools().await?;
            info!("Gateway offers {} tools", tools.len());

            let response = self.agent.run(prompt, &tools, session.as_ref()).await?;
            for line in format_all(response.content()) {
                info!("{}", line);
            }

            Ok(extract_text(response.content()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::{ContentBlock, Message, DEFAULT_PROMPT};
    use crate::auth::stubs::CountingBroker;
    use crate::config::{COGNITO_SCOPE, GATEWAY_URL, PROVIDER_NAME};
    use crate::gateway::spies::{time_tool, SpyConnector};
    use serde_json::json;

    const URL: &str = "https://gateway.example.com/mcp";

    fn full_env_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            (GATEWAY_URL, URL),
            (PROVIDER_NAME, "cognito-provider"),
            (COGNITO_SCOPE, "gateway/genesis-gateway:invoke"),
        ]
    }

    fn full_env() -> EnvSource {
        EnvSource::fixed(full_env_pairs())
    }

    struct Harness {
        broker: Arc<CountingBroker>,
        connector: Arc<SpyConnector>,
        llm: Arc<FakeLlmClient>,
        runtime: AgentRuntime,
    }

    fn harness(broker: CountingBroker, connector: SpyConnector, llm: FakeLlmClient, env: EnvSource) -> Harness {
        let broker = Arc::new(broker);
        let connector = Arc::new(connector);
        let llm = Arc::new(llm);
        let client: Arc<dyn LlmClient> = llm.clone();
        let runtime = AgentRuntime::new(broker.clone(), connector.clone(), AgentLoop::new(client, 5, None))
            .with_env(env);
        Harness {
            broker,
            connector,
            llm,
            runtime,
        }
    }

    #[tokio::test]
    async fn test_missing_config_never_reaches_broker() {
        let keys = [GATEWAY_URL, PROVIDER_NAME, COGNITO_SCOPE];
        for mask in 1..8u8 {
            let present: Vec<(&str, &str)> = full_env_pairs()
                .into_iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) == 0)
                .map(|(_, pair)| pair)
                .collect();
            let h = harness(
                CountingBroker::issuing(),
                SpyConnector::new(vec![]),
                FakeLlmClient::new(vec!["unused"]),
                EnvSource::fixed(present),
            );

            let err = h.runtime.handle(&InvocationPayload::default()).await.unwrap_err();
            let expected: Vec<&str> = keys
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| *k)
                .collect();
            assert!(matches!(err, ConfigError::MissingEnv(ref missing) if *missing == expected));
            assert_eq!(h.broker.calls(), 0);
            assert_eq!(h.connector.opens(), 0);
        }
    }

    #[tokio::test]
    async fn test_authentication_failure_skips_session() {
        let h = harness(
            CountingBroker::failing(),
            SpyConnector::new(vec![time_tool()]),
            FakeLlmClient::new(vec!["unused"]),
            full_env(),
        );

        let answer = h.runtime.handle(&InvocationPayload::with_prompt("hi")).await.unwrap();

        assert!(answer.starts_with("Authentication failed: "));
        assert!(answer.contains("client secret mismatch"));
        assert_eq!(h.broker.calls(), 1);
        assert_eq!(h.connector.opens(), 0);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_request_follows_gateway_config() {
        let h = harness(
            CountingBroker::issuing(),
            SpyConnector::new(vec![time_tool()]),
            FakeLlmClient::new(vec!["done"]),
            full_env(),
        );

        h.runtime.handle(&InvocationPayload::with_prompt("hi")).await.unwrap();

        let requests = h.broker.requests.lock().unwrap();
        let scopes = ["gateway/genesis-gateway:invoke".to_string()].into_iter().collect();
        assert_eq!(*requests, vec![TokenRequest::m2m("cognito-provider", scopes)]);
    }

    #[tokio::test]
    async fn test_list_failure_still_closes_session() {
        let h = harness(
            CountingBroker::issuing(),
            SpyConnector::failing_list(),
            FakeLlmClient::new(vec!["unused"]),
            full_env(),
        );

        let answer = h.runtime.handle(&InvocationPayload::with_prompt("hi")).await.unwrap();

        assert!(answer.starts_with("An error occurred: "));
        assert_eq!(h.connector.opens(), 1);
        assert_eq!(h.connector.closes(), 1);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_still_closes_session() {
        let h = harness(
            CountingBroker::issuing(),
            SpyConnector::new(vec![time_tool()]),
            FakeLlmClient::failing("model overloaded"),
            full_env(),
        );

        let answer = h.runtime.handle(&InvocationPayload::with_prompt("hi")).await.unwrap();

        assert_eq!(answer, "An error occurred: LLM error: model overloaded");
        assert_eq!(h.connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_uses_default_prompt() {
        let h = harness(
            CountingBroker::issuing(),
            SpyConnector::new(vec![time_tool()]),
            FakeLlmClient::new(vec!["It is 3 PM in Las Vegas."]),
            full_env(),
        );

        let payload: InvocationPayload = serde_json::from_value(json!({})).unwrap();
        let answer = h.runtime.handle(&payload).await.unwrap();

        assert_eq!(answer, "It is 3 PM in Las Vegas.");
        let seen = h.llm.seen.lock().unwrap();
        assert_eq!(seen[0], vec![Message::user(DEFAULT_PROMPT)]);
    }

    #[tokio::test]
    async fn test_successful_invocation_uses_gateway_tool() {
        let h = harness(
            CountingBroker::issuing(),
            SpyConnector::new(vec![time_tool()]),
            FakeLlmClient::with_tool_call(
                "lambda-function-target___get-current-time",
                json!({"timezone": "Asia/Tokyo"}),
                "It is 10:30 in Tokyo.",
            ),
            EnvSource::fixed([(GATEWAY_URL, URL), (PROVIDER_NAME, "cognito-provider"), (COGNITO_SCOPE, "")]),
        );

        let answer = h
            .runtime
            .handle(&InvocationPayload::with_prompt("What time is it in Tokyo?"))
            .await
            .unwrap();

        assert_eq!(answer, "It is 10:30 in Tokyo.");
        assert_eq!(h.broker.calls(), 1);
        assert_eq!(h.connector.opens(), 1);
        assert_eq!(h.connector.closes(), 1);

        let seen = h.llm.seen.lock().unwrap();
        let tool_turn = &seen[1][2].content[0];
        match tool_turn {
            ContentBlock::ToolResult { tool_result } => {
                assert!(tool_result.content[0].render().ends_with("using stub-token"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }
}
