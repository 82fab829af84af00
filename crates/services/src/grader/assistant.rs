use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lesson_core::model::FeedbackLedger;

use super::reply::{GraderResult, parse_reply, strip_code_fence};
use super::{EvaluationRequest, Grader};
use crate::error::GraderError;

#[derive(Clone, Debug)]
pub struct GraderConfig {
    pub base_url: String,
    pub api_key: String,
    pub assistant_id: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl GraderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            poll_interval: Duration::from_millis(1000),
            max_polls: 60,
        }
    }

    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("LESSON_AI_API_KEY").ok()?;
        let assistant_id = env::var("LESSON_AI_ASSISTANT_ID").ok()?;
        if api_key.trim().is_empty() || assistant_id.trim().is_empty() {
            return None;
        }
        let mut config = Self::new(api_key, assistant_id);
        if let Ok(base_url) = env::var("LESSON_AI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(ms) = env::var("LESSON_AI_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = env::var("LESSON_AI_MAX_POLLS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_polls = max.max(1);
        }
        Some(config)
    }
}

/// Grader backed by a hosted assistant (thread / message / run API).
#[derive(Clone)]
pub struct AssistantGrader {
    client: Client,
    config: Option<GraderConfig>,
}

impl AssistantGrader {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(GraderConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<GraderConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    fn config(&self) -> Result<&GraderConfig, GraderError> {
        self.config.as_ref().ok_or(GraderError::Disabled)
    }

    fn url(config: &GraderConfig, path: &str) -> String {
        format!("{}/{path}", config.base_url.trim_end_matches('/'))
    }

    fn authorized(config: &GraderConfig, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&config.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GraderError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GraderError::HttpStatus { status, body });
        }
        Ok(response.json().await?)
    }

    /// Post `prompt` to a new thread, run the assistant and return its reply text.
    async fn run_prompt(&self, prompt: String) -> Result<String, GraderError> {
        let config = self.config()?;

        let thread: Thread = Self::send(Self::authorized(
            config,
            self.client
                .post(Self::url(config, "threads"))
                .json(&serde_json::json!({})),
        ))
        .await?;

        let _: serde_json::Value = Self::send(Self::authorized(
            config,
            self.client
                .post(Self::url(config, &format!("threads/{}/messages", thread.id)))
                .json(&NewMessage {
                    role: "user",
                    content: prompt,
                }),
        ))
        .await?;

        let run: Run = Self::send(Self::authorized(
            config,
            self.client
                .post(Self::url(config, &format!("threads/{}/runs", thread.id)))
                .json(&NewRun {
                    assistant_id: &config.assistant_id,
                }),
        ))
        .await?;

        for attempt in 1..=config.max_polls {
            tokio::time::sleep(config.poll_interval).await;
            let status: Run = Self::send(Self::authorized(
                config,
                self.client.get(Self::url(
                    config,
                    &format!("threads/{}/runs/{}", thread.id, run.id),
                )),
            ))
            .await?;
            tracing::debug!(attempt, status = %status.status, "polled grader run");

            match status.status.as_str() {
                "completed" => return self.latest_reply(config, &thread.id).await,
                "failed" => {
                    let message = status
                        .last_error
                        .map_or_else(|| "unknown".to_owned(), |e| e.message);
                    return Err(GraderError::RunFailed(message));
                }
                "expired" => return Err(GraderError::Expired),
                _ => {}
            }
        }

        Err(GraderError::Timeout {
            attempts: config.max_polls,
        })
    }

    async fn latest_reply(
        &self,
        config: &GraderConfig,
        thread_id: &str,
    ) -> Result<String, GraderError> {
        let list: MessageList = Self::send(Self::authorized(
            config,
            self.client
                .get(Self::url(config, &format!("threads/{thread_id}/messages"))),
        ))
        .await?;

        list.data
            .into_iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| m.content.into_iter().next())
            .and_then(|c| c.text)
            .map(|t| t.value)
            .ok_or(GraderError::EmptyResponse)
    }
}

#[async_trait]
impl Grader for AssistantGrader {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<GraderResult, GraderError> {
        let reply = self.run_prompt(request.to_prompt()).await?;
        parse_reply(&reply)
    }

    async fn summarize(&self, ledger: &FeedbackLedger) -> Result<String, GraderError> {
        let snapshot = ledger
            .to_json()
            .map_err(|e| GraderError::Malformed(e.to_string()))?;
        let reply = self.run_prompt(snapshot).await?;
        let text = strip_code_fence(&reply);
        if text.is_empty() {
            return Err(GraderError::EmptyResponse);
        }
        Ok(text.to_owned())
    }
}

#[derive(Debug, Serialize)]
struct NewMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct NewRun<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::{Question, QuestionKind, Session};

    #[tokio::test]
    async fn disabled_grader_refuses_to_evaluate() {
        let grader = AssistantGrader::new(None);
        assert!(!grader.enabled());

        let question = Question::new("q1", QuestionKind::Text, "Hi?");
        let session = Session::new("s1", "Hello", vec![question.clone()]);
        let request = EvaluationRequest::new(&session, &question, "Hello!");
        assert!(matches!(
            grader.evaluate(&request).await,
            Err(GraderError::Disabled)
        ));
        assert!(matches!(
            grader.summarize(&FeedbackLedger::fresh(&session)).await,
            Err(GraderError::Disabled)
        ));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let mut config = GraderConfig::new("key", "asst_1");
        config.base_url = "http://localhost:9999/v1/".into();
        assert_eq!(
            AssistantGrader::url(&config, "threads"),
            "http://localhost:9999/v1/threads"
        );
    }

    #[test]
    fn run_status_deserializes_last_error() {
        let run: Run = serde_json::from_str(
            r#"{"id": "run_1", "status": "failed",
                "last_error": {"code": "x", "message": "boom"}}"#,
        )
        .unwrap();
        assert_eq!(run.status, "failed");
        assert_eq!(run.last_error.unwrap().message, "boom");
    }

    #[test]
    fn newest_assistant_message_is_read_first() {
        let list: MessageList = serde_json::from_str(
            r#"{"data": [
                {"role": "assistant",
                 "content": [{"type": "text", "text": {"value": "{\"score\":1}"}}]},
                {"role": "user", "content": [{"type": "text", "text": {"value": "prompt"}}]}
            ]}"#,
        )
        .unwrap();
        let first = list
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .unwrap();
        assert_eq!(first.content[0].text.as_ref().unwrap().value, "{\"score\":1}");
    }
}
