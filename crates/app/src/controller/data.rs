use actix_web::web::Bytes;
use tokio::sync::broadcast;

/// One encoded multipart part, cheap to clone across subscribers.
#[derive(Clone, Debug)]
pub(crate) struct FrameChunk {
    pub(crate) sequence: u64,
    pub(crate) payload: Bytes,
}

/// Fan-out point between the single capture loop and every stream viewer.
///
/// Each subscriber holds its own cursor into a bounded ring; a viewer that
/// falls behind skips frames without slowing the loop or other viewers.
#[derive(Clone)]
pub(crate) struct FrameHub {
    sender: broadcast::Sender<FrameChunk>,
}

impl FrameHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<FrameChunk> {
        self.sender.subscribe()
    }

    /// Returns how many viewers the chunk was delivered to.
    pub(crate) fn publish(&self, chunk: FrameChunk) -> usize {
        self.sender.send(chunk).unwrap_or(0)
    }

    pub(crate) fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}
