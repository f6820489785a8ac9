use crate::mail::OutgoingMail;
use crate::queue::SendTask;

const NAME_PLACEHOLDER: &str = "{name}";

/// Subject and body shared by every campaign message. The only
/// personalization is `{name}` substitution in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailTemplate {
    pub subject: String,
    pub body: String,
}

impl MailTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn render(&self, task: &SendTask) -> OutgoingMail {
        OutgoingMail {
            to: task.email.clone(),
            subject: self.subject.clone(),
            body: self.body.replace(NAME_PLACEHOLDER, &task.name),
        }
    }
}
