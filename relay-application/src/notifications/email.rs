use async_trait::async_trait;
use relay_domain::error::DomainResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 邮件发送通道
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> DomainResult<()>;
}

/// 只记录日志的发送实现（本地运行）
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: &OutgoingEmail) -> DomainResult<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}
