use std::future::Future;

use kubegate_types::LogLine;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log sink closed")]
    Closed,
}

/// Receiver of live log lines; one clone is handed to every pod stream.
///
/// `send` may wait for room, which holds back the pod stream feeding it.
pub trait LogSink: Clone + Send + Sync + 'static {
    fn send(&self, line: LogLine) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl LogSink for mpsc::Sender<LogLine> {
    fn send(&self, line: LogLine) -> impl Future<Output = Result<(), SinkError>> + Send {
        async move { mpsc::Sender::send(self, line).await.map_err(|_| SinkError::Closed) }
    }
}

impl LogSink for mpsc::UnboundedSender<LogLine> {
    fn send(&self, line: LogLine) -> impl Future<Output = Result<(), SinkError>> + Send {
        let result = mpsc::UnboundedSender::send(self, line).map_err(|_| SinkError::Closed);
        async move { result }
    }
}
