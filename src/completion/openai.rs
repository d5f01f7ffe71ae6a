use super::{Completer, CompletionError};
use crate::config::Config;
use crate::conversation::{Message, Role};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    system_prompt: String,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    fn build_request<'a>(&'a self, history: &'a [Message]) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if history.first().map(|message| message.role) != Some(Role::System) {
            messages.push(ChatMessage {
                role: Role::System.as_str(),
                content: &self.system_prompt,
            });
        }
        messages.extend(
            history
                .iter()
                .filter(|message| !message.failed)
                .map(|message| ChatMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                }),
        );

        ChatRequest {
            model: &self.model,
            messages,
        }
    }
}

#[async_trait]
impl Completer for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey)?;
        let request = self.build_request(messages);
        debug!(
            "sending {} messages to {} ({})",
            request.messages.len(),
            self.endpoint,
            self.model
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::EmptyResponse)?
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyReply)?;
        info!("received {} byte reply from {}", reply.len(), self.model);
        Ok(reply)
    }
}

/// Pulls `error.message` out of an API error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::{api_error_message, ChatMessage, OpenAiClient};
    use crate::completion::{Completer, CompletionError};
    use crate::config::Config;
    use crate::conversation::Message;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn client(api_key: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(&Config {
            api_key: api_key.map(str::to_string),
            api_base: "http://localhost:9/v1/".to_string(),
            system_prompt: "Be brief.".to_string(),
            ..Config::default()
        })
    }

    #[test]
    fn endpoint_joins_base_without_double_slash() {
        assert_eq!(client(None).endpoint, "http://localhost:9/v1/chat/completions");
    }

    #[test]
    fn request_prepends_system_prompt_when_history_lacks_one() {
        let client = client(None);
        let history = vec![Message::user("Hello")];
        let request = client.build_request(&history);

        assert_eq!(
            request.messages,
            vec![
                ChatMessage { role: "system", content: "Be brief." },
                ChatMessage { role: "user", content: "Hello" },
            ]
        );
    }

    #[test]
    fn request_keeps_existing_system_message_and_drops_failures() {
        let client = client(None);
        let history = vec![
            Message::system("Seeded."),
            Message::user("one"),
            Message::failure("Error: timeout"),
            Message::user("two"),
        ];
        let request = client.build_request(&history);

        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "user"]);
        assert_eq!(request.messages[0].content, "Seeded.");

        let json = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][2]["content"], "two");
    }

    #[test]
    fn api_error_message_prefers_structured_field() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        assert_eq!(api_error_message(body), "Rate limit reached");
        assert_eq!(api_error_message(" Bad Gateway \n"), "Bad Gateway");
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let result = client(None).complete(&[Message::user("hi")]).await;
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    /// Client pointed at `base` that never goes through a system proxy.
    fn local_client(base: &str) -> OpenAiClient {
        let mut client = client(Some("sk-test"));
        client.endpoint = format!("{base}/chat/completions");
        client.http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("http client should build");
        client
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(header_end) = request.windows(4).position(|window| window == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..header_end]);
        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.trim().eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    /// Serves a single canned HTTP response and yields the raw request it got.
    async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("client should connect");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                let read = socket.read(&mut buf).await.expect("request should be readable");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            socket
                .write_all(response.as_bytes())
                .await
                .expect("response should be written");
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{addr}/v1"), handle)
    }

    #[tokio::test]
    async fn successful_reply_returns_first_choice() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}},{"message":{"content":"ignored"}}]}"#,
        )
        .await;

        let reply = local_client(&base)
            .complete(&[Message::user("Hello")])
            .await
            .expect("reply should succeed");
        assert_eq!(reply, "Hi there");

        let request = server.await.expect("server task should finish").to_lowercase();
        assert!(request.starts_with("post /v1/chat/completions "));
        assert!(request.contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""model":"gpt-4""#));
        assert!(request.contains(r#"{"role":"system","content":"be brief."}"#));
    }

    #[tokio::test]
    async fn error_status_maps_to_api_error() {
        let (base, _server) = serve_once(
            "401 Unauthorized",
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        )
        .await;

        let result = local_client(&base).complete(&[Message::user("Hello")]).await;
        match result {
            Err(CompletionError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_choices_is_empty_response() {
        let (base, _server) = serve_once("200 OK", r#"{"choices":[]}"#).await;
        let result = local_client(&base).complete(&[Message::user("Hello")]).await;
        assert!(matches!(result, Err(CompletionError::EmptyResponse)));
    }

    #[tokio::test]
    async fn null_or_blank_content_is_empty_reply() {
        for body in [
            r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#,
            r#"{"choices":[{"message":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"message":{"role":"assistant","content":"  \n"}}]}"#,
        ] {
            let (base, _server) = serve_once("200 OK", body).await;
            let result = local_client(&base).complete(&[Message::user("Hello")]).await;
            assert!(
                matches!(result, Err(CompletionError::EmptyReply)),
                "body {body} gave {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_decode_error() {
        let (base, _server) = serve_once("200 OK", "<html>gateway</html>").await;
        let result = local_client(&base).complete(&[Message::user("Hello")]).await;
        assert!(matches!(result, Err(CompletionError::Decode(_))));
    }

    #[tokio::test]
    async fn refused_connection_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        drop(listener);

        let result = local_client(&format!("http://{addr}/v1"))
            .complete(&[Message::user("Hello")])
            .await;
        assert!(matches!(result, Err(CompletionError::Http(_))));
    }
}
