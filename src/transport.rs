//! Per-job event log.
//!
//! Events are kept for the lifetime of the job so every subscriber replays
//! the stream from the first event, then follows live until `done`. The
//! job registry drops the whole log some time after it finishes.

use async_stream::stream;
use async_trait::async_trait;
use browserman_agent::{Event, EventSink};
use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;
use tokio::sync::broadcast;

const LIVE_CAPACITY: usize = 256;

/// Append-only, replayable event sequence for one job.
pub struct EventLog {
    history: Mutex<Vec<Event>>,
    live: broadcast::Sender<(usize, Event)>,
    finished: OnceLock<Instant>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            history: Mutex::new(Vec::new()),
            live,
            finished: OnceLock::new(),
        }
    }

    fn history(&self) -> MutexGuard<'_, Vec<Event>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event. Anything after the first `done` is dropped.
    pub fn push(&self, event: Event) {
        let mut history = self.history();
        if history.last().is_some_and(Event::is_done) {
            return;
        }
        if event.is_done() {
            let _ = self.finished.set(Instant::now());
        }
        let idx = history.len();
        history.push(event.clone());
        // No receivers is fine: late subscribers replay from history.
        let _ = self.live.send((idx, event));
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.history().clone()
    }

    pub fn len(&self) -> usize {
        self.history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    /// The terminal event, once the job has finished.
    pub fn outcome(&self) -> Option<Event> {
        self.history().last().filter(|e| e.is_done()).cloned()
    }

    /// When the `done` event was pushed.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished.get().copied()
    }

    fn since(&self, idx: usize) -> Vec<Event> {
        self.history().get(idx..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    /// Stream every event from the start, ending after `done`.
    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = Event> + Send + 'static {
        // Snapshot and subscribe under the same lock so nothing falls between.
        let (replay, mut rx) = {
            let history = self.history();
            (history.clone(), self.live.subscribe())
        };
        let log = Arc::clone(self);

        stream! {
            let mut seen = 0usize;
            for event in replay {
                seen += 1;
                let done = event.is_done();
                yield event;
                if done {
                    return;
                }
            }
            loop {
                match rx.recv().await {
                    Ok((idx, event)) => {
                        if idx < seen {
                            continue;
                        }
                        seen = idx + 1;
                        let done = event.is_done();
                        yield event;
                        if done {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        for event in log.since(seen) {
                            seen += 1;
                            let done = event.is_done();
                            yield event;
                            if done {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn emit(&self, event: Event) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replay_from_start_for_each_subscriber() {
        let log = Arc::new(EventLog::new());
        log.push(Event::text("a"));
        log.push(Event::image("b"));
        log.push(Event::done());

        for _ in 0..2 {
            let events: Vec<Event> = log.subscribe().collect().await;
            assert_eq!(
                events,
                vec![Event::text("a"), Event::image("b"), Event::done()]
            );
        }
    }

    #[tokio::test]
    async fn test_live_follow_until_done() {
        let log = Arc::new(EventLog::new());
        log.push(Event::text("early"));
        assert!(log.finished_at().is_none());
        let stream = log.subscribe();

        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                log.emit(Event::text("late")).await;
                log.emit(Event::failed("boom")).await;
                log.emit(Event::text("ignored")).await;
            })
        };

        let events: Vec<Event> = stream.collect().await;
        writer.await.unwrap();
        assert_eq!(
            events,
            vec![
                Event::text("early"),
                Event::text("late"),
                Event::failed("boom")
            ]
        );
        assert_eq!(log.len(), 3);
        assert_eq!(log.outcome(), Some(Event::failed("boom")));
        assert!(log.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_catches_up() {
        let log = Arc::new(EventLog::new());
        let stream = log.subscribe();
        for i in 0..(LIVE_CAPACITY * 2) {
            log.push(Event::text(i.to_string()));
        }
        log.push(Event::done());

        let events: Vec<Event> = stream.collect().await;
        assert_eq!(events.len(), LIVE_CAPACITY * 2 + 1);
        assert_eq!(events[0], Event::text("0"));
        assert_eq!(events.last(), Some(&Event::done()));
    }
}
