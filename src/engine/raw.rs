//! Raw byte-stream engine.
//!
//! Every successful read is delivered as-is: chunk boundaries are whatever
//! the OS produced, so the caller owns any application framing.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::shared::{EngineCore, Reader};
use crate::buffer::{BytePool, RawBuffer};
use crate::events::{BoxFuture, Channel, ReceiveEvents};
use crate::options::SocketOptions;
use crate::status::{CloseResult, CloseWaiter, SendStatus};
use crate::transport::BoxedConnection;

/// Engine that passes chunks through untouched.
pub struct RawEngine {
    core: EngineCore,
}

impl RawEngine {
    /// Wrap `conn`, renting receive buffers from the shared pool.
    pub fn new(conn: BoxedConnection, options: &SocketOptions) -> Self {
        Self::with_pool(conn, options, BytePool::shared())
    }

    pub fn with_pool(conn: BoxedConnection, options: &SocketOptions, pool: Arc<BytePool>) -> Self {
        Self {
            core: EngineCore::new(conn, options.clone(), pool),
        }
    }

    /// Write `bytes` verbatim.
    pub async fn send(&self, bytes: &[u8], cancel: &CancellationToken) -> SendStatus {
        self.core.send_parts(&[bytes], cancel).await
    }

    /// Read until the stream ends, delivering each chunk to subscribers.
    ///
    /// Runs at most once per engine.
    pub async fn listen(&self, cancel: &CancellationToken) -> CloseResult {
        let mut reader = match self.core.begin_listen() {
            Ok(reader) => reader,
            Err(rejected) => return rejected,
        };

        let mut buffer = RawBuffer::new(self.core.pool(), self.core.options().buffer_size);
        let result = self.receive(&mut reader, &mut buffer, cancel).await;
        buffer.dispose();

        self.core.finish_listen(result)
    }

    async fn receive(
        &self,
        reader: &mut Reader,
        buffer: &mut RawBuffer,
        cancel: &CancellationToken,
    ) -> CloseResult {
        loop {
            if cancel.is_cancelled() {
                return CloseResult::closed_local();
            }

            buffer.reset();
            let free = match buffer.free_space() {
                Ok(free) => free,
                Err(e) => return CloseResult::error(e),
            };

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseResult::closed_local(),
                read = reader.read(free) => read,
            };

            let n = match read {
                Ok(0) => return self.core.end_of_stream(),
                Ok(n) => n,
                Err(e) => return self.core.read_failed(e),
            };

            if let Err(e) = buffer.track_written(n) {
                return CloseResult::error(e);
            }
            match buffer.data() {
                Ok(chunk) => self.core.events().dispatch(chunk),
                Err(e) => return CloseResult::error(e),
            }
        }
    }

    /// Close from this side; see [`Engine::close`](super::Engine::close).
    pub async fn close(&self) {
        self.core.close().await;
    }

    pub fn closed(&self) -> CloseWaiter {
        self.core.closed()
    }

    pub fn events(&self) -> &ReceiveEvents {
        self.core.events()
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    pub fn connection_id(&self) -> u64 {
        self.core.id()
    }
}

impl Channel for RawEngine {
    fn events(&self) -> &ReceiveEvents {
        self.core.events()
    }

    fn transmit<'a>(
        &'a self,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SendStatus> {
        Box::pin(self.send(payload, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::{duplex, AsyncWriteExt};

    use crate::status::CloseStatus;

    fn engine_pair(buffer_size: usize) -> (Arc<RawEngine>, tokio::io::DuplexStream) {
        let (a, b) = duplex(4096);
        let options = SocketOptions::raw().with_buffer_size(buffer_size);
        (Arc::new(RawEngine::with_pool(Box::new(a), &options, BytePool::new())), b)
    }

    #[tokio::test]
    async fn test_chunks_are_delivered_verbatim() {
        let (engine, mut peer) = engine_pair(64);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        engine.events().subscribe(move |chunk| sink.lock().extend_from_slice(chunk));

        let cancel = CancellationToken::new();
        let listener = {
            let (engine, cancel) = (engine.clone(), cancel.clone());
            tokio::spawn(async move { engine.listen(&cancel).await })
        };

        peer.write_all(b"hello ").await.unwrap();
        peer.write_all(b"world").await.unwrap();
        peer.shutdown().await.unwrap();

        let result = listener.await.unwrap();
        assert_eq!(result.status, CloseStatus::ClosedRemote);
        assert_eq!(&*received.lock(), b"hello world");
    }

    #[tokio::test]
    async fn test_chunk_larger_than_buffer_is_split() {
        let (engine, mut peer) = engine_pair(4);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        engine.events().subscribe(move |chunk| sink.lock().push(chunk.to_vec()));

        peer.write_all(b"0123456789").await.unwrap();
        peer.shutdown().await.unwrap();
        engine.listen(&CancellationToken::new()).await;

        let chunks = chunks.lock();
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn test_send_writes_verbatim() {
        let (engine, mut peer) = engine_pair(64);

        let status = engine.send(b"raw bytes", &CancellationToken::new()).await;
        assert_eq!(status, SendStatus::Ok);

        let mut buf = [0u8; 9];
        tokio::io::AsyncReadExt::read_exact(&mut peer, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"raw bytes");
    }

    #[tokio::test]
    async fn test_cancel_before_read_is_local() {
        let (engine, _peer) = engine_pair(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.listen(&cancel).await;
        assert_eq!(result.status, CloseStatus::ClosedLocal);
        assert_eq!(engine.closed().wait().await.status, CloseStatus::ClosedLocal);
    }

    #[tokio::test]
    async fn test_buffer_returned_after_listen() {
        let pool = BytePool::new();
        let (a, mut b) = duplex(64);
        let engine = RawEngine::with_pool(Box::new(a), &SocketOptions::raw(), pool.clone());

        b.shutdown().await.unwrap();
        engine.listen(&CancellationToken::new()).await;

        assert_eq!(pool.rented(), 1);
        assert_eq!(pool.returned(), 1);
    }
}
