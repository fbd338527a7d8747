//! Test doubles for the pull side: a channel-fed listener, a closure-backed
//! iterator, and a commit-tracking consume message.

use async_trait::async_trait;
use conveyor_core::context::{Context, ContextError};
use conveyor_core::message::{EventConsumeMessage, MessageError};
use conveyor_core::transport::{ConsumeMessage, Listener, MessageIterator, TransportError};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// A [`ConsumeMessage`] wrapping a prepared [`EventConsumeMessage`], with
/// commit tracking for assertions.
#[derive(Debug, Default)]
pub struct QueuedMessage {
    message: EventConsumeMessage,
    committed: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    headers: Option<HashMap<String, String>>,
}

impl QueuedMessage {
    /// Wrap a prepared message.
    #[must_use]
    pub fn new(message: EventConsumeMessage) -> Self {
        Self {
            message,
            ..Self::default()
        }
    }

    /// Attach trace-propagation headers.
    #[must_use]
    pub fn with_propagation_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Shared flag flipped by the first commit.
    #[must_use]
    pub fn committed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.committed)
    }

    /// How many times commit was called.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Box into the trait object the iterator contract expects.
    #[must_use]
    pub fn boxed(self) -> Box<dyn ConsumeMessage> {
        Box::new(self)
    }
}

#[async_trait]
impl ConsumeMessage for QueuedMessage {
    async fn event_message(&self, _ctx: &Context) -> Result<EventConsumeMessage, MessageError> {
        Ok(self.message.clone())
    }

    async fn commit(&self, _ctx: &Context) -> Result<(), TransportError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn propagation_headers(&self) -> Option<HashMap<String, String>> {
        self.headers.clone()
    }
}

/// Iterator over an in-process message queue, shared by every worker of a
/// pool the way a real transport iterator is.
pub struct ChannelIterator {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Box<dyn ConsumeMessage>>>,
    closed: AtomicBool,
}

impl ChannelIterator {
    /// Whether [`MessageIterator::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageIterator for ChannelIterator {
    async fn next(&self, ctx: &Context) -> Result<Box<dyn ConsumeMessage>, TransportError> {
        tokio::select! {
            () = ctx.cancelled() => Err(TransportError::Context(
                ctx.error().unwrap_or(ContextError::Canceled),
            )),
            message = async { self.rx.lock().await.recv().await } => {
                message.ok_or_else(|| TransportError::Other("listener channel closed".to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A [`Listener`] fed from the test body. `listen` hands out the channel
/// iterator, or a custom iterator installed with
/// [`ChannelListener::set_iterator`] for stop-path tests.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Box<dyn ConsumeMessage>>,
    iterator: Arc<ChannelIterator>,
    custom: Mutex<Option<Arc<dyn MessageIterator>>>,
    listens: Mutex<Vec<(String, String)>>,
}

impl Default for ChannelListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelListener {
    /// Create a listener with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            iterator: Arc::new(ChannelIterator {
                rx: tokio::sync::Mutex::new(rx),
                closed: AtomicBool::new(false),
            }),
            custom: Mutex::new(None),
            listens: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a message for the next `next` call.
    pub fn send_message(&self, message: Box<dyn ConsumeMessage>) {
        let _ = self.tx.send(message);
    }

    /// Replace the iterator handed out by `listen`.
    pub fn set_iterator(&self, iterator: Arc<dyn MessageIterator>) {
        *self.custom.lock().unwrap_or_else(PoisonError::into_inner) = Some(iterator);
    }

    /// The channel iterator, for close-tracking assertions.
    #[must_use]
    pub fn iterator(&self) -> Arc<ChannelIterator> {
        Arc::clone(&self.iterator)
    }

    /// Every `(topic, group)` pair `listen` was called with.
    #[must_use]
    pub fn listens(&self) -> Vec<(String, String)> {
        self.listens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Listener for ChannelListener {
    async fn listen(
        &self,
        _ctx: &Context,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn MessageIterator>, TransportError> {
        self.listens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), group.to_string()));
        if let Some(custom) = self
            .custom
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(custom);
        }
        Ok(Arc::clone(&self.iterator) as Arc<dyn MessageIterator>)
    }
}

type IteratorFn = dyn Fn(Context) -> BoxFuture<'static, Result<Box<dyn ConsumeMessage>, TransportError>>
    + Send
    + Sync;

/// [`MessageIterator`] over a closure, for scripting pull behavior in tests.
pub struct FuncIterator {
    f: Box<IteratorFn>,
}

impl FuncIterator {
    /// Wrap a closure producing the next message.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Context) -> BoxFuture<'static, Result<Box<dyn ConsumeMessage>, TransportError>>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl MessageIterator for FuncIterator {
    async fn next(&self, ctx: &Context) -> Result<Box<dyn ConsumeMessage>, TransportError> {
        (self.f)(ctx.clone()).await
    }
}

