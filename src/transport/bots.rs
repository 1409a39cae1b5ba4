use crate::error::DeliveryError;
use crate::transport::{Bot, Message, SendFuture, Target};
use log::info;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Bot delivering messages as JSON POSTs to an HTTP endpoint
///
/// Each message is posted as `{"target": .., "text": ..}`; aggregated batches
/// as `{"target": .., "messages": [..]}` when the endpoint advertises support.
pub struct WebhookBot {
    id: String,
    url: String,
    aggregated: bool,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SinglePayload<'a> {
    target: &'a Target,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchPayload<'a> {
    target: &'a Target,
    messages: Vec<&'a str>,
}

impl WebhookBot {
    /// Create a new webhook bot
    ///
    /// # Arguments
    ///
    /// * `id` - Bot id subscriptions refer to
    /// * `url` - Endpoint receiving the POSTs
    /// * `aggregated` - Whether the endpoint accepts aggregated batches
    pub fn new(id: String, url: String, aggregated: bool) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            id,
            url,
            aggregated,
            client,
        })
    }

    fn post<T: Serialize>(&self, payload: &T) -> SendFuture {
        let request = self.client.post(&self.url).json(payload);
        let url = self.url.clone();
        Box::pin(async move {
            let response = request.send().await?;
            if response.status().is_success() {
                Ok(())
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(DeliveryError::SendFailed(format!(
                    "webhook {} returned {}: {}",
                    url, status, body
                )))
            }
        })
    }
}

impl Bot for WebhookBot {
    fn id(&self) -> &str {
        &self.id
    }

    fn platform(&self) -> &str {
        "webhook"
    }

    fn supports_aggregated(&self) -> bool {
        self.aggregated
    }

    fn send(&self, target: &Target, message: Message) -> SendFuture {
        self.post(&SinglePayload {
            target,
            text: &message.text,
        })
    }

    fn send_aggregated(&self, target: &Target, messages: Vec<Message>) -> SendFuture {
        self.post(&BatchPayload {
            target,
            messages: messages.iter().map(|m| m.text.as_str()).collect(),
        })
    }
}

/// Bot that writes every message to the application log
///
/// Useful for local runs where no chat platform is connected.
pub struct ConsoleBot {
    id: String,
}

impl ConsoleBot {
    pub fn new(id: String) -> Self {
        Self { id }
    }
}

impl Bot for ConsoleBot {
    fn id(&self) -> &str {
        &self.id
    }

    fn platform(&self) -> &str {
        "console"
    }

    fn supports_aggregated(&self) -> bool {
        false
    }

    fn send(&self, target: &Target, message: Message) -> SendFuture {
        info!("[{} -> {}]\n{}", self.id, target, message.text);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Accept one HTTP request, reply with `status`, and return the request body
    fn one_shot_server(status: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).unwrap();
                buffer.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buffer).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buffer.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            stream.write_all(response.as_bytes()).unwrap();
            let text = String::from_utf8_lossy(&buffer).to_string();
            text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_webhook_posts_target_and_text() {
        let (url, server) = one_shot_server("200 OK");
        let bot = WebhookBot::new("hook".to_string(), url, false).unwrap();
        let target = Target::new("webhook").with("channel", "ops");

        bot.send(&target, Message::text("disk full")).await.unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["text"], "disk full");
        assert_eq!(body["target"]["platform_type"], "webhook");
        assert_eq!(body["target"]["channel"], "ops");
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let (url, server) = one_shot_server("500 Internal Server Error");
        let bot = WebhookBot::new("hook".to_string(), url, true).unwrap();

        let messages = vec![Message::text("a"), Message::text("b")];
        let result = bot
            .send_aggregated(&Target::new("webhook"), messages)
            .await;

        assert!(matches!(result, Err(DeliveryError::SendFailed(_))));
        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["messages"], serde_json::json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_console_bot_always_succeeds() {
        let bot = ConsoleBot::new("console".to_string());
        assert!(!bot.supports_aggregated());
        assert!(bot
            .send(&Target::new("console"), Message::text("hello"))
            .await
            .is_ok());
        assert!(bot
            .send_aggregated(
                &Target::new("console"),
                vec![Message::text("a"), Message::text("b")]
            )
            .await
            .is_ok());
    }
}
