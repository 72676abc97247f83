//! 通知功能
//!
//! 欢迎邮件的请求/应答消费者：校验请求、经 `EmailSender` 发送并回复应答。
//! 非法输入回复 `success=false, statusCode=400`，发信失败回复 502，由投递方决定是否重试。
//!
mod email;
mod welcome_consumer;

pub use email::{EmailSender, LogEmailSender, OutgoingEmail};
pub use welcome_consumer::WelcomeEmailConsumer;
