use crate::error::Error;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A handle to one received message.
///
/// A message that arrived in a single final frame is buffered; a fragmented
/// message is handed out while its continuation frames are still in flight
/// and yields payload chunks as they arrive. Either form can be consumed
/// chunk-by-chunk through the `Stream` impl or collected with
/// [`Message::buffer`].
///
/// A streaming message whose connection dies before the final fragment
/// yields a final `Err` chunk carrying the close information.
pub struct Message {
    kind: MessageKind,
    body: Body,
}

enum Body {
    Buffered(Option<Vec<u8>>),
    Streaming(ReceiverStream<Result<Vec<u8>, Error>>),
}

impl Message {
    pub(crate) fn buffered(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            body: Body::Buffered(Some(payload)),
        }
    }

    pub(crate) fn streaming(kind: MessageKind, chunks: Receiver<Result<Vec<u8>, Error>>) -> Self {
        Self {
            kind,
            body: Body::Streaming(ReceiverStream::new(chunks)),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    /// Whether the message is still being received.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Streaming(_))
    }

    /// Reads the message to its end and returns the full payload.
    pub async fn buffer(mut self) -> Result<Vec<u8>, Error> {
        use futures::StreamExt;

        match self.body {
            Body::Buffered(ref mut payload) => Ok(payload.take().unwrap_or_default()),
            Body::Streaming(ref mut chunks) => {
                let mut payload = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    payload.extend(chunk?);
                }
                Ok(payload)
            }
        }
    }

    /// Reads the message to its end as a string. The payload of a text
    /// message has already been UTF-8 validated by the parser.
    pub async fn text(self) -> Result<String, Error> {
        Ok(String::from_utf8(self.buffer().await?)?)
    }
}

impl Stream for Message {
    type Item = Result<Vec<u8>, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.body {
            Body::Buffered(payload) => Poll::Ready(payload.take().map(Ok)),
            Body::Streaming(chunks) => Pin::new(chunks).poll_next(cx),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Message");
        debug.field("kind", &self.kind);
        match &self.body {
            Body::Buffered(payload) => {
                debug.field("len", &payload.as_ref().map(Vec::len).unwrap_or_default())
            }
            Body::Streaming(_) => debug.field("streaming", &true),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_buffered_message() {
        let message = Message::buffered(MessageKind::Text, b"hello".to_vec());
        assert!(message.is_text());
        assert!(!message.is_streaming());
        assert_eq!(message.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_buffered_message_as_stream() {
        let mut message = Message::buffered(MessageKind::Binary, b"chunk".to_vec());
        assert_eq!(message.next().await.unwrap().unwrap(), b"chunk");
        assert!(message.next().await.is_none());
    }

    #[tokio::test]
    async fn test_streaming_message_collects_chunks() {
        let (tx, rx) = mpsc::channel(4);
        let message = Message::streaming(MessageKind::Binary, rx);

        tokio::spawn(async move {
            tx.send(Ok(b"first ".to_vec())).await.unwrap();
            tx.send(Ok(b"second".to_vec())).await.unwrap();
        });

        assert_eq!(message.buffer().await.unwrap(), b"first second");
    }

    #[tokio::test]
    async fn test_streaming_message_surfaces_connection_error() {
        let (tx, rx) = mpsc::channel(4);
        let message = Message::streaming(MessageKind::Binary, rx);

        tokio::spawn(async move {
            tx.send(Ok(b"partial".to_vec())).await.unwrap();
            tx.send(Err(Error::closed(
                crate::close::CloseCode::ABNORMAL_CLOSE,
                "TCP connection closed unexpectedly",
            )))
            .await
            .unwrap();
        });

        assert!(message.buffer().await.is_err());
    }
}
