use super::email::{EmailSender, OutgoingEmail};
use crate::users::WelcomeEmailRequest;
use crate::validate::{is_blank, is_email};
use async_trait::async_trait;
use relay_domain::messaging::{ReplyMessage, RequestHandler, RequestMessage};
use std::sync::Arc;

const BAD_REQUEST: u16 = 400;
const BAD_GATEWAY: u16 = 502;

pub struct WelcomeEmailConsumer {
    sender: Arc<dyn EmailSender>,
}

impl WelcomeEmailConsumer {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

fn validate(request: &WelcomeEmailRequest) -> Result<(), String> {
    if !is_email(&request.email) {
        return Err(format!("invalid email: {}", request.email));
    }
    if is_blank(&request.full_name) {
        return Err("fullName is required".to_string());
    }
    if is_blank(&request.email_verification_token) {
        return Err("emailVerificationToken is required".to_string());
    }
    Ok(())
}

fn compose(request: &WelcomeEmailRequest) -> OutgoingEmail {
    OutgoingEmail {
        to: request.email.clone(),
        subject: "Welcome aboard".to_string(),
        body: format!(
            "Hi {},\n\nPlease verify your email with this token: {}\n",
            request.full_name, request.email_verification_token
        ),
    }
}

#[async_trait]
impl RequestHandler for WelcomeEmailConsumer {
    fn handler_name(&self) -> &str {
        "welcome-user-email"
    }

    async fn handle(&self, message: RequestMessage) -> ReplyMessage {
        let request: WelcomeEmailRequest = match message.decode() {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(trace_id = %message.trace_id(), error = %err, "malformed welcome email request");
                return ReplyMessage::failure(BAD_REQUEST, err.to_string());
            }
        };
        if let Err(reason) = validate(&request) {
            tracing::warn!(trace_id = %message.trace_id(), %reason, "welcome email request rejected");
            return ReplyMessage::failure(BAD_REQUEST, reason);
        }

        match self.sender.send(&compose(&request)).await {
            Ok(()) => {
                tracing::info!(
                    trace_id = %message.trace_id(),
                    correlation_id = %message.correlation_id(),
                    "welcome email delivered"
                );
                ReplyMessage::ok("welcome email sent", None)
            }
            Err(err) => {
                tracing::warn!(trace_id = %message.trace_id(), error = %err, "welcome email send failed");
                ReplyMessage::failure(BAD_GATEWAY, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::error::{DomainError, DomainResult};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailSender for Outbox {
        async fn send(&self, email: &OutgoingEmail) -> DomainResult<()> {
            if self.fail {
                return Err(DomainError::transient_delivery("smtp down"));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn message(email: &str, name: &str) -> RequestMessage {
        RequestMessage::new(
            "trace-1",
            json!({ "email": email, "fullName": name, "emailVerificationToken": "tok" }),
        )
    }

    #[tokio::test]
    async fn valid_request_is_sent_and_acknowledged() {
        let sender = Arc::new(Outbox::default());
        let consumer = WelcomeEmailConsumer::new(sender.clone());

        let reply = consumer.handle(message("ada@example.com", "Ada Lovelace")).await;
        assert!(reply.is_success());
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert!(sent[0].body.contains("tok"));
    }

    #[tokio::test]
    async fn invalid_input_replies_bad_request() {
        let sender = Arc::new(Outbox::default());
        let consumer = WelcomeEmailConsumer::new(sender.clone());

        let reply = consumer.handle(message("not-an-email", "Ada")).await;
        assert!(!reply.is_success());
        assert_eq!(reply.status_code(), 400);

        let reply = consumer.handle(message("ada@example.com", "  ")).await;
        assert_eq!(reply.status_code(), 400);

        let reply = consumer
            .handle(RequestMessage::new("trace-1", json!({ "email": "ada@example.com" })))
            .await;
        assert_eq!(reply.status_code(), 400);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_is_not_a_success() {
        let consumer = WelcomeEmailConsumer::new(Arc::new(Outbox {
            fail: true,
            ..Default::default()
        }));
        let reply = consumer.handle(message("ada@example.com", "Ada")).await;
        assert!(!reply.is_success());
        assert_eq!(reply.status_code(), 502);
    }
}
