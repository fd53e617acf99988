//! Deposit notifications
//!
//! Notifications are a best-effort side channel. `notify` formats the
//! message and hands it to a bounded queue; a background worker posts it
//! to the Telegram Bot API. Failures are logged and dropped: they never
//! reach the tracking loop, never touch stored records, and are never
//! retried.

use crate::error::NotificationError;
use crate::records::DepositRecord;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages waiting beyond this many are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

const SEND_TIMEOUT_SECS: u64 = 15;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Outbound alert channel for newly stored deposits.
pub trait Notifier: Send + Sync {
    /// Dispatch an alert for `record` without waiting for delivery.
    fn notify(&self, record: &DepositRecord);
}

/// Telegram notification configuration
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Line appended after a blank line to every message
    pub signature: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// Render the alert text for a deposit.
pub fn format_deposit_message(record: &DepositRecord, signature: &str) -> String {
    format!(
        "New deposit detected!\n\
         Block Number: {}\n\
         Timestamp: {}\n\
         Transaction Hash: {}\n\
         Gas Fee: {}\n\
         Pubkey: {}\n\
         \n\
         {}",
        record.block_number,
        record
            .block_timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        record.hash,
        record.fee,
        record.pubkey,
        signature
    )
}

/// Telegram notifier backed by a bounded queue and a sender task.
pub struct TelegramNotifier {
    queue: mpsc::Sender<String>,
    signature: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("capacity", &self.queue.max_capacity())
            .finish()
    }
}

impl TelegramNotifier {
    /// Start the sender task and return the notifier feeding it.
    ///
    /// Must be called from within a tokio runtime. The task ends once the
    /// notifier is dropped and the queue is drained.
    pub fn spawn(
        config: TelegramConfig,
        capacity: usize,
    ) -> Result<(Self, JoinHandle<()>), NotificationError> {
        let signature = config.signature.clone();
        let sender = TelegramSender::new(config)?;
        Ok(Self::spawn_sender(sender, signature, capacity))
    }

    fn spawn_sender(
        sender: TelegramSender,
        signature: String,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(sender.run(rx));
        (Self::from_queue(tx, signature), handle)
    }

    fn from_queue(queue: mpsc::Sender<String>, signature: String) -> Self {
        Self { queue, signature }
    }

    /// Try to enqueue a message without blocking.
    fn enqueue(&self, text: String) -> Result<(), NotificationError> {
        self.queue.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => NotificationError::QueueFull,
            TrySendError::Closed(_) => NotificationError::QueueClosed,
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, record: &DepositRecord) {
        let message = format_deposit_message(record, &self.signature);
        match self.enqueue(message) {
            Ok(()) => debug!("Queued notification for {}", record.hash),
            Err(e) => warn!("Dropping notification for {}: {}", record.hash, e),
        }
    }
}

/// Background half of the notifier: drains the queue into the Bot API.
struct TelegramSender {
    config: TelegramConfig,
    client: Client,
    api_base: String,
}

impl TelegramSender {
    fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        let api_base = format!("{}/bot{}", TELEGRAM_API_URL, config.bot_token);
        Self::with_api_base(config, api_base)
    }

    fn with_api_base(config: TelegramConfig, api_base: String) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            config,
            client,
            api_base,
        })
    }

    async fn run(self, mut rx: mpsc::Receiver<String>) {
        while let Some(text) = rx.recv().await {
            if let Err(e) = self.send_message(&text).await {
                error!("Failed to send deposit notification: {}", e);
            }
        }
        debug!("Notification queue closed, sender stopping");
    }

    /// Send one message. A single attempt; failures are returned, not retried.
    async fn send_message(&self, text: &str) -> Result<(), NotificationError> {
        if !self.config.is_configured() {
            info!("Telegram not configured, would send:\n{}", text);
            return Ok(());
        }

        let resp = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(NotificationError::Status { status, body })
    }
}
