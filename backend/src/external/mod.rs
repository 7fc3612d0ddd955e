//! External API integrations

pub mod webhook;

pub use webhook::{EventSink, WebhookClient};
