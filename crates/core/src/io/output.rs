use tokio::sync::mpsc;

use crate::types::DecisionRecord;

/// Result sink sender. The dispatcher delivers one record per completed task.
pub type DecisionSender = mpsc::Sender<DecisionRecord>;
/// Result sink receiver. Subscribers consume decision records here.
pub type DecisionReceiver = mpsc::Receiver<DecisionRecord>;

pub fn channel(buffer: usize) -> (DecisionSender, DecisionReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Subscriber interface for completed decisions. Delivery is at-most-once and never blocks.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, record: DecisionRecord);
}

impl ResultSink for DecisionSender {
    fn deliver(&self, record: DecisionRecord) {
        let task_id = record.task_id;
        match self.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%task_id, "result sink full, dropping decision record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%task_id, "result sink closed, dropping decision record");
            }
        }
    }
}
