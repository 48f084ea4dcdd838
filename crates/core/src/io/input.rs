use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::types::Event;

/// Event channel sender. Collaborators push events here.
pub type EventSender = mpsc::Sender<Event>;
/// Event channel receiver. The runtime consumes from here.
pub type EventReceiver = mpsc::Receiver<Event>;

pub fn channel(buffer: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Submit user text as a `user_message` event.
pub async fn submit_text(tx: &EventSender, text: impl Into<String>) -> Result<(), CoreError> {
    tx.send(Event::user_message(text))
        .await
        .map_err(|_| CoreError::ChannelClosed)
}

/// Validate raw collaborator input, then send it. Malformed input never reaches the runtime.
pub async fn submit_raw(tx: &EventSender, raw: &serde_json::Value) -> Result<(), CoreError> {
    let event = Event::from_json(raw)?;
    tx.send(event).await.map_err(|_| CoreError::ChannelClosed)
}
