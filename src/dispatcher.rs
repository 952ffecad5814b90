use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::bucket::Bucket;
use crate::content::{build_content, build_intro, BudgetConfig, ExtraInformation};
use crate::cooldown::{build_key, CooldownGate};
use crate::error::{DeliveryError, DeliveryFailures};
use crate::hook::{Hook, NoopHook};
use crate::locker::{LocalLocker, Locker};
use crate::message::{MessageContext, NoopTraceCapturer, TraceCapturer};
use crate::payload::WebhookPayload;
use crate::queue::BoundedQueue;
use crate::transport::{Client, ReqwestClient, Transport, WebhookContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Tuning for one [`Dispatcher`] instance.
///
/// The cooldown/lock timings are defaults copied from the external
/// platform's throughput rules; override them when targeting a different
/// endpoint or when tests need to run fast.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Dispatcher name, embedded in every dedup key.
    pub name: String,
    /// Queue depth; enqueues beyond it are dropped.
    pub queue_capacity: usize,
    /// How many deliveries may run concurrently.
    pub concurrency: usize,
    /// Default suppression window for a first occurrence.
    pub base_cooldown: Duration,
    /// Store key serializing all attempts of this dispatcher.
    pub global_key: String,
    /// How often to re-check a held global key.
    pub poll_interval: Duration,
    /// TTL on the global key, bounding how long a crashed attempt can
    /// block others.
    pub global_lock_ttl: Duration,
    /// How long the global key is held after a post before release.
    pub release_delay: Duration,
    /// Byte budgets for the content allocator.
    pub budget: BudgetConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            name: "alerts".to_owned(),
            queue_capacity: 500,
            concurrency: cpus / 3 + 2,
            base_cooldown: Duration::from_secs(15 * 60),
            global_key: "global".to_owned(),
            poll_interval: Duration::from_millis(300),
            global_lock_ttl: Duration::from_secs(30),
            release_delay: Duration::from_secs(2),
            budget: BudgetConfig::default(),
        }
    }
}

struct Job {
    message: Arc<dyn MessageContext>,
}

/// Outgoing-work counter with `Notify`-based wakeup.
struct WaitGroup {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before the re-check so a `done` landing in between
            // cannot be missed.
            notified.as_mut().enable();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Inner {
    name: String,
    queue: BoundedQueue<Job>,
    semaphore: Arc<Semaphore>,
    /// idle ⇄ draining flag; flipped idle→draining by exactly one
    /// producer at a time.
    draining: AtomicBool,
    outgoing: WaitGroup,
    gate: CooldownGate,
    transport: Transport,
    trace: Arc<dyn TraceCapturer>,
    budget: BudgetConfig,
    failures: Mutex<Vec<DeliveryError>>,
}

/// Bounded, best-effort dispatcher of structured events to one chat
/// webhook.
///
/// Enqueueing never blocks and never fails the caller; delivery runs on
/// detached tasks governed by a concurrency width, a global serialization
/// lock and per-event cooldown state. Failures surface only through
/// [`wait`](Dispatcher::wait) and the [`Hook`] protocol.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Configures collaborators before constructing a [`Dispatcher`].
pub struct DispatcherBuilder {
    webhook_url: String,
    config: DispatcherConfig,
    locker: Arc<dyn Locker>,
    bucket: Option<Arc<dyn Bucket>>,
    client: Arc<dyn Client>,
    hook: Arc<dyn Hook>,
    trace: Arc<dyn TraceCapturer>,
}

impl DispatcherBuilder {
    fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            config: DispatcherConfig::default(),
            locker: Arc::new(LocalLocker::new()),
            bucket: None,
            client: Arc::new(ReqwestClient::new()),
            hook: Arc::new(NoopHook),
            trace: Arc::new(NoopTraceCapturer),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.base_cooldown = cooldown;
        self
    }

    pub fn with_global_key(mut self, key: impl Into<String>) -> Self {
        self.config.global_key = key.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_global_lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.global_lock_ttl = ttl;
        self
    }

    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.config.release_delay = delay;
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.config.budget = budget;
        self
    }

    /// Swaps the TTL store. Defaults to a process-local map.
    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = locker;
        self
    }

    /// Enables overflow-file uploads to object storage.
    pub fn with_bucket(mut self, bucket: Arc<dyn Bucket>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn Client>) -> Self {
        self.client = client;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_trace_capturer(mut self, trace: Arc<dyn TraceCapturer>) -> Self {
        self.trace = trace;
        self
    }

    pub fn build(self) -> Dispatcher {
        let config = self.config;
        let gate = CooldownGate::new(
            self.locker,
            config.global_key.clone(),
            config.poll_interval,
            config.global_lock_ttl,
            config.release_delay,
            config.base_cooldown,
        );
        let transport = Transport::new(self.webhook_url, self.client, self.hook, self.bucket);

        Dispatcher {
            inner: Arc::new(Inner {
                name: config.name,
                queue: BoundedQueue::new(config.queue_capacity.max(1)),
                semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
                draining: AtomicBool::new(false),
                outgoing: WaitGroup::new(),
                gate,
                transport,
                trace: self.trace,
                budget: config.budget,
                failures: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Dispatcher {
    /// Starts configuring a dispatcher for the given webhook URL.
    pub fn builder(webhook_url: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(webhook_url)
    }

    /// Dispatcher with all-default collaborators.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self::builder(webhook_url).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of events queued but not yet picked up by the drain loop.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queues one event for delivery and returns immediately.
    ///
    /// Never blocks; the event is silently dropped when the queue is at
    /// capacity. Must be called within a Tokio runtime — delivery runs on
    /// detached tasks that outlive the caller's own future.
    pub fn send_message(&self, message: impl MessageContext + 'static) {
        self.send_context(Arc::new(message));
    }

    /// Like [`send_message`](Dispatcher::send_message) for an already
    /// shared message, e.g. one fanned out to several dispatchers.
    pub fn send_context(&self, message: Arc<dyn MessageContext>) {
        if !self.inner.queue.enqueue(Job { message }) {
            metric_inc("alert.dispatch.dropped");
            warn!(dispatcher = %self.inner.name, "queue full, dropping event");
            return;
        }
        metric_inc("alert.dispatch.enqueued");
        Inner::work(&self.inner);
    }

    /// Resolves once every queued and in-flight delivery has settled.
    ///
    /// Returns the aggregate of all delivery failures recorded since the
    /// previous `wait` (the failures drain on read). Callers impose a
    /// deadline by racing this future with `tokio::time::timeout` or a
    /// cancellation token.
    pub async fn wait(&self) -> Result<(), DeliveryFailures> {
        self.inner.outgoing.wait().await;
        let failures = {
            let mut guard = self
                .inner
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryFailures(failures))
        }
    }
}

impl Inner {
    /// Kicks the drain loop when the dispatcher is idle. The CAS makes
    /// the idle→draining transition happen exactly once per wakeup.
    fn work(inner: &Arc<Inner>) {
        if inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // Counted synchronously so `wait` cannot observe zero between
            // the enqueue and the drain task starting.
            inner.outgoing.add(1);
            let drained = Arc::clone(inner);
            tokio::spawn(async move {
                Inner::drain(drained).await;
            });
        }
    }

    async fn drain(inner: Arc<Inner>) {
        loop {
            while inner.queue.has_next() {
                inner.outgoing.add(1);
                let Ok(permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
                    // Semaphore closed: nothing more can be delivered.
                    inner.outgoing.done();
                    break;
                };
                let Some(job) = inner.queue.dequeue() else {
                    drop(permit);
                    inner.outgoing.done();
                    continue;
                };
                let span = tracing::info_span!(
                    "deliver",
                    dispatcher = %inner.name,
                    level = %job.message.level(),
                    code = job.message.code(),
                );
                let task = Arc::clone(&inner);
                tokio::spawn(
                    async move {
                        task.deliver(job).await;
                        drop(permit);
                        task.outgoing.done();
                    }
                    .instrument(span),
                );
            }
            inner.draining.store(false, Ordering::SeqCst);
            // An enqueue may have slipped in between the empty check and
            // the flag flip; reclaim the flag and keep draining if so.
            if inner.queue.has_next()
                && inner
                    .draining
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                continue;
            }
            break;
        }
        inner.outgoing.done();
    }

    /// One full delivery attempt: global serialization, suppression
    /// check, content packing, transport, suppression-state writeback.
    async fn deliver(&self, job: Job) {
        let msg = job.message;
        let key = build_key(&self.name, &*msg, self.gate.separator());

        self.gate.acquire_global().await;

        let thread_id = Uuid::now_v7();
        let mut extra = ExtraInformation {
            iteration: 0,
            cooldown_ends: Utc::now(),
            cache_key: key.clone(),
            thread_id,
            force_send: msg.force_send(),
        };

        if msg.force_send() {
            extra.cooldown_ends = Utc::now()
                + chrono::Duration::from_std(self.gate.release_delay())
                    .unwrap_or_else(|_| chrono::Duration::zero());
            let result = self.post_message(Arc::clone(&msg), extra).await;
            self.record_outcome(result);
            self.gate.release_global_after_delay().await;
            return;
        }

        if self.gate.is_suppressed(&key).await {
            metric_inc("alert.delivery.suppressed");
            debug!(key = %key, "event suppressed by cooldown");
            self.gate.release_global_now().await;
            return;
        }

        let iteration = self.gate.next_iteration(&key).await;
        let cooldown = self.gate.cooldown(&*msg, iteration);
        extra.iteration = iteration;
        extra.cooldown_ends = Utc::now()
            + chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());

        let result = self.post_message(Arc::clone(&msg), extra).await;
        if result.is_ok() {
            self.gate.record_sent(&key, &*msg, cooldown).await;
        }
        self.record_outcome(result);
        self.gate.release_global_after_delay().await;
    }

    async fn post_message(
        &self,
        message: Arc<dyn MessageContext>,
        extra: ExtraInformation,
    ) -> Result<(), DeliveryError> {
        let intro = build_intro(message.service(), message.err().is_some());
        let trace = self.trace.capture();
        let built = build_content(&*message, &extra, &trace, &self.budget);

        let mut payload = WebhookPayload::new(extra.thread_id);
        payload.content = intro;
        payload.embeds = built.embeds;

        let mut web = WebhookContext {
            message,
            files: built.files,
            payload,
            extra,
            response: None,
        };
        self.transport.deliver(&mut web).await
    }

    fn record_outcome(&self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => {
                metric_inc("alert.delivery.success");
                debug!(dispatcher = %self.name, "notification delivered");
            }
            Err(err) => {
                metric_inc("alert.delivery.failure");
                warn!(dispatcher = %self.name, error = %err, "notification delivery failed");
                let mut guard = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
                guard.push(err);
            }
        }
    }
}
