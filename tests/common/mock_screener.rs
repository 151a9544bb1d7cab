use moderation_queue::models::{Content, QueueItem};
use moderation_queue::worker::{ContentScreener, Evaluation, ScreeningError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Screener returning a fixed verdict and counting its calls
pub struct MockScreener {
    verdict: Option<Evaluation>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    pub calls: AtomicUsize,
}

impl MockScreener {
    pub fn approving() -> Self {
        Self {
            verdict: Some(Evaluation::approved()),
            delay: None,
            timeout: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(evaluation: Evaluation) -> Self {
        Self {
            verdict: Some(evaluation),
            delay: None,
            timeout: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call as if the screening backend were down
    pub fn unavailable() -> Self {
        Self {
            verdict: None,
            delay: None,
            timeout: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps `delay` and gives up after 50ms
    pub fn slow(delay: Duration) -> Self {
        Self {
            verdict: Some(Evaluation::approved()),
            delay: Some(delay),
            timeout: Some(Duration::from_millis(50)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Approves after `delay`, bounded only by the worker's own timeout
    pub fn approving_after(delay: Duration) -> Self {
        Self {
            verdict: Some(Evaluation::approved()),
            delay: Some(delay),
            timeout: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentScreener for MockScreener {
    async fn screen(
        &self,
        _item: &QueueItem,
        _content: &Content,
    ) -> Result<Evaluation, ScreeningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.verdict
            .clone()
            .ok_or_else(|| ScreeningError::Unavailable("classifier offline".to_string()))
    }

    fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}
