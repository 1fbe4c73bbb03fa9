use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Inbound half of a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next text frame, or None on orderly close
    async fn next_frame(&mut self) -> Result<Option<String>, SocketError>;
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), SocketError>;

    async fn close(&mut self) -> Result<(), SocketError>;
}

/// Handler for inbound text frames. A returned string is sent back to the
/// same connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, user_id: u64, message: String) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Pump task failed: {0}")]
    Task(String),
}

#[async_trait]
impl FrameReader for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Result<Option<String>, SocketError> {
        loop {
            match self.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // binary and control frames
                Some(Err(e)) => return Err(SocketError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl FrameWriter for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: String) -> Result<(), SocketError> {
        self.send(Message::Text(frame))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        SinkExt::close(self)
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// A live client connection: one reader pump and one writer pump.
///
/// The writer drains the outbound queue the hub pushes into and ends when
/// the hub closes that queue. The reader hands each text frame to the
/// message handler and ends on orderly close or transport error. Whichever
/// pump ends first tears down the other.
pub struct Connection {
    pub user_id: u64,
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
    outbound: mpsc::Receiver<String>,
    replies: mpsc::WeakSender<String>,
    message_handler: Arc<dyn MessageHandler>,
}

impl Connection {
    pub fn new(
        user_id: u64,
        reader: Box<dyn FrameReader>,
        writer: Box<dyn FrameWriter>,
        outbound: mpsc::Receiver<String>,
        replies: mpsc::WeakSender<String>,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            user_id,
            reader,
            writer,
            outbound,
            replies,
            message_handler,
        }
    }

    /// Runs both pumps until the connection ends
    pub async fn run(self) -> Result<(), SocketError> {
        let Connection {
            user_id,
            reader,
            writer,
            outbound,
            replies,
            message_handler,
        } = self;

        let mut writer_task = tokio::spawn(write_pump(writer, outbound));
        let mut reader_task = tokio::spawn(read_pump(user_id, reader, replies, message_handler));

        let result = tokio::select! {
            r = &mut writer_task => {
                debug!(user_id = user_id, "Writer pump finished");
                reader_task.abort();
                r
            }
            r = &mut reader_task => {
                debug!(user_id = user_id, "Reader pump finished");
                writer_task.abort();
                r
            }
        };

        result.map_err(|e| SocketError::Task(e.to_string()))?
    }
}

async fn write_pump(
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::Receiver<String>,
) -> Result<(), SocketError> {
    while let Some(frame) = outbound.recv().await {
        writer.send_frame(frame).await?;
    }
    // queue closed by the hub
    let _ = writer.close().await;
    Ok(())
}

async fn read_pump(
    user_id: u64,
    mut reader: Box<dyn FrameReader>,
    replies: mpsc::WeakSender<String>,
    message_handler: Arc<dyn MessageHandler>,
) -> Result<(), SocketError> {
    while let Some(frame) = reader.next_frame().await? {
        let Some(reply) = message_handler.handle_message(user_id, frame).await else {
            continue;
        };
        match replies.upgrade() {
            Some(sender) => {
                if sender.try_send(reply).is_err() {
                    warn!(user_id = user_id, "Dropping reply, outbound queue unavailable");
                }
            }
            None => break,
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{RecordingWriter, ScriptedReader};
    use super::*;
    use std::collections::VecDeque;

    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle_message(&self, _user_id: u64, message: String) -> Option<String> {
            (message != "quiet").then(|| format!("echo:{}", message))
        }
    }

    #[tokio::test]
    async fn test_writer_ends_when_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        let writer = RecordingWriter::default();
        let (_hold, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let reader = ScriptedReader {
            frames: VecDeque::new(),
            hold_open: Some(hold_rx),
        };

        let connection = Connection::new(
            1,
            Box::new(reader),
            Box::new(writer.clone()),
            rx,
            tx.downgrade(),
            Arc::new(EchoHandler),
        );
        let run = tokio::spawn(connection.run());

        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        drop(tx);

        run.await.unwrap().unwrap();
        assert_eq!(*writer.frames.lock().unwrap(), vec!["a", "b"]);
        assert!(*writer.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_reader_replies_through_outbound_queue() {
        let (tx, rx) = mpsc::channel(4);
        let writer = RecordingWriter::default();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let mut reader = ScriptedReader::closing(&["hi", "quiet"]);
        // keep the reader open until the replies are written
        reader.frames.pop_back();
        reader.hold_open = Some(hold_rx);

        let connection = Connection::new(
            2,
            Box::new(reader),
            Box::new(writer.clone()),
            rx,
            tx.downgrade(),
            Arc::new(EchoHandler),
        );
        let run = tokio::spawn(connection.run());

        for _ in 0..100 {
            if !writer.frames.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        drop(hold_tx);
        run.await.unwrap().unwrap();

        assert_eq!(*writer.frames.lock().unwrap(), vec!["echo:hi"]);
        drop(tx);
    }

    #[tokio::test]
    async fn test_transport_error_ends_connection() {
        let (tx, rx) = mpsc::channel(4);
        let reader = ScriptedReader {
            frames: VecDeque::from([Err(SocketError::ReceiveFailed("reset".to_string()))]),
            hold_open: None,
        };

        let connection = Connection::new(
            3,
            Box::new(reader),
            Box::new(RecordingWriter::default()),
            rx,
            tx.downgrade(),
            Arc::new(EchoHandler),
        );

        let result = connection.run().await;
        assert!(matches!(result, Err(SocketError::ReceiveFailed(_))));
    }
}
