//! Event sinks
//!
//! - [`ConsoleSink`] logs every forwarded event as one line
//! - [`WebhookSink`] posts events as JSON from a background worker so a slow
//!   endpoint never stalls frame processing

use crate::config::WebhookConfig;
use harness_diag::{wall_clock_iso, Event, EventLevel, EventSink, SinkError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Format an event as `[LEVEL][CODE] name=value ... | message`
pub fn format_event(event: &Event) -> String {
    let mut line = format!("[{}][{}]", event.level, event.code);
    for value in &event.values {
        line.push_str(&format!(" {}={:.3}", value.name, value.value));
    }
    line.push_str(" | ");
    line.push_str(&event.message);
    line
}

/// Writes events to the log
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        let line = format_event(event);
        match event.level {
            EventLevel::Alert => log::warn!("{}", line),
            EventLevel::EarlyWarning => log::info!("{}", line),
        }
        Ok(())
    }
}

/// JSON body posted for each event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub level: EventLevel,
    pub code: String,
    pub rule_name: String,
    pub message: String,
    pub values: BTreeMap<String, f64>,
    /// Source timestamp of the triggering frame
    pub source_ts_ms: u64,
    /// Wall-clock time the event was queued
    pub timestamp: String,
}

impl WebhookPayload {
    pub fn from_event(event: &Event) -> Self {
        Self {
            level: event.level,
            code: event.code.clone(),
            rule_name: event.rule.clone(),
            message: event.message.clone(),
            values: event
                .values
                .iter()
                .map(|v| (v.name.clone(), v.value))
                .collect(),
            source_ts_ms: event.timestamp_ms,
            timestamp: wall_clock_iso(),
        }
    }
}

/// Post one payload; any non-2xx answer is a failure
pub fn post_payload(
    agent: &ureq::Agent,
    url: &str,
    payload: &WebhookPayload,
) -> Result<(), SinkError> {
    let body =
        serde_json::to_string(payload).map_err(|e| SinkError::Serialization(e.to_string()))?;

    match agent
        .post(url)
        .set("Content-Type", "application/json")
        .send_string(&body)
    {
        Ok(resp) if (200..300).contains(&resp.status()) => Ok(()),
        Ok(resp) => Err(SinkError::Status {
            status: resp.status(),
            body: resp.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Status(status, resp)) => Err(SinkError::Status {
            status,
            body: resp.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(e)) => Err(SinkError::Transport(e.to_string())),
    }
}

/// Fire-and-forget webhook delivery over a bounded queue
pub struct WebhookSink {
    url: String,
    tx: Option<SyncSender<WebhookPayload>>,
    worker: Option<JoinHandle<()>>,
}

impl WebhookSink {
    /// Start the delivery worker
    pub fn spawn(config: &WebhookConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&format!("harness-monitor/{}", env!("CARGO_PKG_VERSION")))
            .build();
        let (tx, rx) = mpsc::sync_channel::<WebhookPayload>(config.queue_capacity);
        let url = config.url.clone();

        let worker_url = url.clone();
        let worker = thread::spawn(move || {
            for payload in rx {
                match post_payload(&agent, &worker_url, &payload) {
                    Ok(()) => log::debug!(
                        "Webhook accepted {} {} ({})",
                        payload.level,
                        payload.code,
                        payload.rule_name
                    ),
                    // No retry: the event already counts as sent
                    Err(e) => log::warn!(
                        "Webhook delivery of {} {} failed: {}",
                        payload.level,
                        payload.code,
                        e
                    ),
                }
            }
            log::debug!("Webhook worker stopped");
        });

        log::info!("Webhook sink posting to {}", url);
        Self {
            url,
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop accepting events and wait for queued deliveries to finish
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Webhook worker panicked");
            }
        }
    }
}

impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        match tx.try_send(WebhookPayload::from_event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Transport(
                "queue full, event dropped".to_string(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Closed),
        }
    }
}

impl Drop for WebhookSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
