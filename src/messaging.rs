//! Outbound reminder messages and the provider seam.

use async_trait::async_trait;
use tracing::info;

use crate::model::Channel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: String,
    pub body: String,
}

/// Delivery provider. `Err` carries the provider's reason and is recorded on
/// the reminder item as-is.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), String>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, message: &OutboundMessage) -> Result<(), String> {
        info!(channel = message.channel.as_str(), to = %message.to, body = %message.body, "outbound message");
        Ok(())
    }
}

/// Values substituted into a reminder template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub service: &'a str,
    pub date: &'a str,
    pub time: &'a str,
    pub worker: &'a str,
    pub business: &'a str,
}

/// Replace `{{service}} {{date}} {{time}} {{worker}} {{business}}`.
/// Unknown placeholders are left untouched.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        let value = match key {
            "service" => Some(vars.service),
            "date" => Some(vars.date),
            "time" => Some(vars.time),
            "worker" => Some(vars.worker),
            "business" => Some(vars.business),
            _ => None,
        };
        match value {
            Some(v) => out.push_str(v),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}
