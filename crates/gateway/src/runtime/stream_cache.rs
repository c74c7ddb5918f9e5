//! Per-turn chunk buffers with resumable readers.
//!
//! The producer task of a turn is the only writer of its buffer; any number
//! of readers may subscribe from any sequence number and will see every
//! chunk from there on, in order, exactly once. A reconnecting client
//! resumes by subscribing again from the first sequence it has not seen.
//!
//! Buffers are reclaimed by [`MessageStreamCache::sweep`] once they are
//! terminal, have no readers and have outlived the retention window, or
//! after sitting idle past the idle timeout. Cancelling a turn drops its
//! buffer immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use cp_domain::config::StreamConfig;
use cp_domain::error::{Error, Result};
use cp_domain::ids::TurnId;
use cp_domain::stream::{BoxStream, Chunk};
use cp_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamBuffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamBuffer {
    chunks: Vec<Chunk>,
    closed: bool,
    cancelled: bool,
    /// Error that ended the stream, replayed to every reader after the
    /// buffered chunks.
    failure: Option<Error>,
    closed_at: Option<Instant>,
    last_activity: Instant,
    readers: usize,
}

struct Entry {
    buffer: Mutex<StreamBuffer>,
    notify: Notify,
}

impl Entry {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(StreamBuffer {
                chunks: Vec::new(),
                closed: false,
                cancelled: false,
                failure: None,
                closed_at: None,
                last_activity: Instant::now(),
                readers: 0,
            }),
            notify: Notify::new(),
        }
    }
}

/// Decrements the reader count when a subscription ends or is dropped.
struct ReaderGuard(Arc<Entry>);

impl ReaderGuard {
    fn attach(entry: Arc<Entry>) -> Self {
        entry.buffer.lock().readers += 1;
        Self(entry)
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut buf = self.0.buffer.lock();
        buf.readers = buf.readers.saturating_sub(1);
        buf.last_activity = Instant::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MessageStreamCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MessageStreamCache {
    streams: RwLock<HashMap<TurnId, Arc<Entry>>>,
    retention: Duration,
    idle_timeout: Duration,
}

impl MessageStreamCache {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            retention: Duration::from_secs(config.retention_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    fn entry(&self, turn_id: &TurnId) -> Result<Arc<Entry>> {
        self.streams
            .read()
            .get(turn_id)
            .cloned()
            .ok_or_else(|| Error::StreamNotFound(turn_id.to_string()))
    }

    /// Create the buffer for a turn.
    pub fn open(&self, turn_id: &TurnId) -> Result<()> {
        let mut streams = self.streams.write();
        if streams.contains_key(turn_id) {
            return Err(Error::Other(format!("stream for turn {turn_id} already open")));
        }
        streams.insert(turn_id.clone(), Arc::new(Entry::new()));
        Ok(())
    }

    /// Append the next chunk. Its sequence must equal the number of chunks
    /// already buffered. A terminal chunk closes the buffer.
    pub fn append(&self, turn_id: &TurnId, chunk: Chunk) -> Result<()> {
        let entry = self.entry(turn_id)?;
        {
            let mut buf = entry.buffer.lock();
            if buf.closed {
                return Err(Error::StreamClosed(turn_id.to_string()));
            }
            let expected = buf.chunks.len() as u64;
            if chunk.sequence != expected {
                return Err(Error::Other(format!(
                    "turn {turn_id}: chunk sequence {} out of order, expected {expected}",
                    chunk.sequence
                )));
            }

            let now = Instant::now();
            if chunk.terminal {
                buf.closed = true;
                buf.closed_at = Some(now);
            }
            buf.last_activity = now;
            buf.chunks.push(chunk);
        }
        entry.notify.notify_waiters();
        Ok(())
    }

    /// Mark the buffer terminal. Closing twice is a no-op.
    pub fn close(&self, turn_id: &TurnId) -> Result<()> {
        self.finish(turn_id, None)
    }

    /// Mark the buffer terminal with an error that readers receive after
    /// the buffered chunks.
    pub fn fail(&self, turn_id: &TurnId, error: Error) -> Result<()> {
        self.finish(turn_id, Some(error))
    }

    fn finish(&self, turn_id: &TurnId, failure: Option<Error>) -> Result<()> {
        let entry = self.entry(turn_id)?;
        {
            let mut buf = entry.buffer.lock();
            if !buf.closed {
                buf.closed = true;
                buf.closed_at = Some(Instant::now());
                buf.failure = failure;
            }
        }
        entry.notify.notify_waiters();
        Ok(())
    }

    /// Drop the buffer of a cancelled turn. Readers end after whatever they
    /// already received. Returns whether a buffer existed.
    pub fn cancel(&self, turn_id: &TurnId) -> bool {
        let Some(entry) = self.streams.write().remove(turn_id) else {
            return false;
        };
        let chunks = {
            let mut buf = entry.buffer.lock();
            buf.closed = true;
            buf.cancelled = true;
            buf.closed_at.get_or_insert_with(Instant::now);
            buf.chunks.len()
        };
        entry.notify.notify_waiters();

        TraceEvent::StreamReclaimed {
            turn_id: turn_id.to_string(),
            chunks,
            reason: "cancelled".into(),
        }
        .emit();
        true
    }

    /// Lazy, ordered, finite stream of chunks from `from_sequence` on.
    ///
    /// Waits for new chunks while the buffer is open and ends once the
    /// terminal chunk has been delivered. A failed stream ends with its
    /// error; a cancelled one just ends.
    pub fn subscribe(
        &self,
        turn_id: &TurnId,
        from_sequence: u64,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        let entry = self.entry(turn_id)?;

        let stream = async_stream::stream! {
            let _guard = ReaderGuard::attach(entry.clone());
            let mut next = from_sequence as usize;

            loop {
                let notified = entry.notify.notified();
                tokio::pin!(notified);
                // Register interest before inspecting the buffer so a
                // concurrent append cannot slip between check and wait.
                notified.as_mut().enable();

                let (batch, closed, cancelled, failure) = {
                    let buf = entry.buffer.lock();
                    let batch = buf.chunks.get(next..).map(<[Chunk]>::to_vec).unwrap_or_default();
                    (batch, buf.closed, buf.cancelled, buf.failure.as_ref().map(Error::cloned))
                };

                let delivered = batch.len();
                for chunk in batch {
                    yield Ok(chunk);
                }
                next += delivered;

                if closed {
                    if !cancelled {
                        if let Some(err) = failure {
                            yield Err(err);
                        }
                    }
                    return;
                }
                if delivered == 0 {
                    notified.await;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[cfg(test)]
    fn chunks(&self, turn_id: &TurnId) -> Option<Vec<Chunk>> {
        let entry = self.streams.read().get(turn_id).cloned()?;
        let chunks = entry.buffer.lock().chunks.clone();
        Some(chunks)
    }

    #[cfg(test)]
    fn contains(&self, turn_id: &TurnId) -> bool {
        self.streams.read().contains_key(turn_id)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    /// Reclaim buffers past retention or idle timeout.
    ///
    /// A buffer reclaimed for idleness while still open is closed with
    /// [`Error::StreamClosed`] first, so its readers end instead of waiting
    /// on a buffer nobody can reach. Those turns are listed in
    /// [`SweepReport::abandoned`] for the caller to settle.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut reclaimed = Vec::new();
        let mut woken = Vec::new();
        let mut report = SweepReport::default();
        {
            let mut streams = self.streams.write();
            streams.retain(|turn_id, entry| {
                let mut buf = entry.buffer.lock();
                let retained_out = buf.closed
                    && buf.readers == 0
                    && buf
                        .closed_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= self.retention);
                let idle = now.saturating_duration_since(buf.last_activity) >= self.idle_timeout;

                if !(retained_out || idle) {
                    return true;
                }
                if !buf.closed {
                    buf.closed = true;
                    buf.closed_at = Some(now);
                    buf.failure = Some(Error::StreamClosed(turn_id.to_string()));
                    report.abandoned.push(AbandonedStream {
                        turn_id: turn_id.clone(),
                        chunks: buf.chunks.clone(),
                    });
                    woken.push(entry.clone());
                }
                let reason = if retained_out { "retention" } else { "idle" };
                reclaimed.push((turn_id.clone(), buf.chunks.len(), reason));
                false
            });
        }

        for entry in woken {
            entry.notify.notify_waiters();
        }
        for (turn_id, chunks, reason) in &reclaimed {
            TraceEvent::StreamReclaimed {
                turn_id: turn_id.to_string(),
                chunks: *chunks,
                reason: (*reason).into(),
            }
            .emit();
        }
        report.reclaimed = reclaimed.len();
        report
    }
}

/// A buffer the sweep closed while its producer had not finished.
#[derive(Debug, Clone)]
pub struct AbandonedStream {
    pub turn_id: TurnId,
    /// Chunks buffered before the stream went idle.
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub reclaimed: usize,
    pub abandoned: Vec<AbandonedStream>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn cache() -> MessageStreamCache {
        MessageStreamCache::new(&StreamConfig {
            retention_secs: 60,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
        })
    }

    fn fill(cache: &MessageStreamCache, turn: &TurnId, n: u64) {
        for i in 0..n - 1 {
            cache.append(turn, Chunk::text(i, format!("c{i}"))).unwrap();
        }
        cache.append(turn, Chunk::terminal(n - 1, None)).unwrap();
    }

    async fn sequences(stream: BoxStream<'static, Result<Chunk>>) -> Vec<u64> {
        stream.map(|c| c.unwrap().sequence).collect().await
    }

    #[tokio::test]
    async fn resume_from_sequence_two() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        fill(&cache, &turn, 5);

        let seqs = sequences(cache.subscribe(&turn, 2).unwrap()).await;
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn append_after_close_fails() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::text(0, "a")).unwrap();
        cache.close(&turn).unwrap();

        let err = cache.append(&turn, Chunk::text(1, "b")).unwrap_err();
        assert!(matches!(err, Error::StreamClosed(_)));
    }

    #[tokio::test]
    async fn terminal_chunk_closes() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::terminal(0, None)).unwrap();
        assert!(matches!(
            cache.append(&turn, Chunk::text(1, "late")),
            Err(Error::StreamClosed(_))
        ));
    }

    #[tokio::test]
    async fn out_of_order_append_rejected() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        assert!(cache.append(&turn, Chunk::text(1, "skip")).is_err());
        assert!(cache.chunks(&turn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_reader_sees_chunks_as_they_arrive() {
        let cache = Arc::new(cache());
        let turn = TurnId::new();
        cache.open(&turn).unwrap();

        let reader = tokio::spawn(sequences(cache.subscribe(&turn, 0).unwrap()));

        for i in 0..4 {
            cache.append(&turn, Chunk::text(i, "x")).unwrap();
            tokio::task::yield_now().await;
        }
        cache.append(&turn, Chunk::terminal(4, None)).unwrap();

        assert_eq!(reader.await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concurrent_readers_all_see_gapless_sequences() {
        let cache = Arc::new(cache());
        let turn = TurnId::new();
        cache.open(&turn).unwrap();

        let readers: Vec<_> = (0..4u64)
            .map(|from| tokio::spawn(sequences(cache.subscribe(&turn, from).unwrap())))
            .collect();

        let writer = {
            let cache = cache.clone();
            let turn = turn.clone();
            tokio::spawn(async move {
                for i in 0..19 {
                    cache.append(&turn, Chunk::text(i, "t")).unwrap();
                    tokio::task::yield_now().await;
                }
                cache.append(&turn, Chunk::terminal(19, None)).unwrap();
            })
        };
        writer.await.unwrap();

        for (from, reader) in readers.into_iter().enumerate() {
            let seqs = reader.await.unwrap();
            let expected: Vec<u64> = (from as u64..20).collect();
            assert_eq!(seqs, expected);
        }
    }

    #[tokio::test]
    async fn failure_is_replayed_after_chunks() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::text(0, "partial")).unwrap();
        cache
            .fail(
                &turn,
                Error::ProviderUnavailable {
                    provider: "openai".into(),
                    message: "down".into(),
                },
            )
            .unwrap();

        let items: Vec<_> = cache.subscribe(&turn, 0).unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::ProviderUnavailable { .. })));
    }

    #[tokio::test]
    async fn cancel_removes_buffer_and_ends_readers() {
        let cache = Arc::new(cache());
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::text(0, "a")).unwrap();

        let reader = tokio::spawn(sequences(cache.subscribe(&turn, 0).unwrap()));
        tokio::task::yield_now().await;

        assert!(cache.cancel(&turn));
        assert!(!cache.contains(&turn));
        assert_eq!(reader.await.unwrap(), vec![0]);
        assert!(matches!(
            cache.append(&turn, Chunk::text(1, "b")),
            Err(Error::StreamNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sweep_honours_retention_and_idle() {
        let cache = cache();
        let done = TurnId::new();
        let stalled = TurnId::new();
        let fresh = TurnId::new();
        for t in [&done, &stalled, &fresh] {
            cache.open(t).unwrap();
        }
        cache.append(&done, Chunk::terminal(0, None)).unwrap();
        cache.append(&fresh, Chunk::text(0, "a")).unwrap();

        let now = Instant::now();
        assert_eq!(cache.sweep(now).reclaimed, 0);

        assert_eq!(cache.sweep(now + Duration::from_secs(61)).reclaimed, 1);
        assert!(!cache.contains(&done));

        let report = cache.sweep(now + Duration::from_secs(301));
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.abandoned.len(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn active_reader_delays_retention() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::text(0, "a")).unwrap();
        cache.close(&turn).unwrap();

        let guard = ReaderGuard::attach(cache.entry(&turn).unwrap());
        assert_eq!(cache.sweep(Instant::now() + Duration::from_secs(61)).reclaimed, 0);
        drop(guard);
        let report = cache.sweep(Instant::now() + Duration::from_secs(61));
        assert_eq!(report.reclaimed, 1);
        assert!(report.abandoned.is_empty());
    }

    #[tokio::test]
    async fn idle_sweep_ends_waiting_readers() {
        let cache = cache();
        let turn = TurnId::new();
        cache.open(&turn).unwrap();
        cache.append(&turn, Chunk::text(0, "a")).unwrap();

        let mut reader = cache.subscribe(&turn, 0).unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap().delta, "a");

        let waiting = tokio::spawn(async move {
            let tail = reader.next().await;
            let end = reader.next().await;
            (tail, end)
        });
        tokio::task::yield_now().await;

        let report = cache.sweep(Instant::now() + Duration::from_secs(301));
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].turn_id, turn);
        assert_eq!(report.abandoned[0].chunks.len(), 1);

        let (tail, end) = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("reader still blocked after idle sweep")
            .unwrap();
        assert!(matches!(tail, Some(Err(Error::StreamClosed(_)))));
        assert!(end.is_none());
        assert!(!cache.contains(&turn));
    }

    #[tokio::test]
    async fn unknown_turn_is_not_found() {
        let cache = cache();
        assert!(matches!(
            cache.subscribe(&TurnId::new(), 0),
            Err(Error::StreamNotFound(_))
        ));
    }
}
