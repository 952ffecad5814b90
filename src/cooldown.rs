use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::locker::Locker;
use crate::message::MessageContext;

/// Hard ceiling on any suppression window.
pub(crate) const MAX_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Suppression window for the given repeat count.
///
/// `base * max(1, iteration² / 2)`, capped at 24 hours: the first few
/// occurrences stay close together while high-frequency repeats widen
/// rapidly.
pub(crate) fn cooldown_for(base: Duration, iteration: u32) -> Duration {
    let multiplier = ((iteration as u64 * iteration as u64) / 2).max(1);
    let cooldown = base.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
    cooldown.min(MAX_COOLDOWN)
}

/// Builds the dedup key for one event:
/// `dispatcher ⊕ environment ⊕ service ⊕ type ⊕ (explicit key | caller)`.
pub(crate) fn build_key(dispatcher: &str, msg: &dyn MessageContext, separator: &str) -> String {
    let service = msg.service();
    let mut key = String::with_capacity(64);
    key.push_str(dispatcher);
    key.push_str(separator);
    key.push_str(&service.environment);
    key.push_str(separator);
    key.push_str(&service.name);
    key.push_str(separator);
    key.push_str(&service.kind);
    key.push_str(separator);
    match msg.key() {
        Some(explicit) => key.push_str(explicit),
        None => key.push_str(&msg.caller().format_as_key()),
    }
    key
}

/// Serializes delivery attempts and tracks per-event suppression state
/// on the injected TTL store.
///
/// Store failures are logged and otherwise ignored: when the backend is
/// unreachable the gate degrades to "always send" rather than dropping
/// events.
pub(crate) struct CooldownGate {
    locker: Arc<dyn Locker>,
    global_key: String,
    poll_interval: Duration,
    global_lock_ttl: Duration,
    release_delay: Duration,
    base_cooldown: Duration,
}

impl CooldownGate {
    pub fn new(
        locker: Arc<dyn Locker>,
        global_key: String,
        poll_interval: Duration,
        global_lock_ttl: Duration,
        release_delay: Duration,
        base_cooldown: Duration,
    ) -> Self {
        Self {
            locker,
            global_key,
            poll_interval,
            global_lock_ttl,
            release_delay,
            base_cooldown,
        }
    }

    pub fn separator(&self) -> &str {
        self.locker.separator()
    }

    pub fn release_delay(&self) -> Duration {
        self.release_delay
    }

    /// Polls until the global key is free, then claims it.
    ///
    /// The global key is the mutual-exclusion gate across concurrent
    /// delivery tasks of one dispatcher: its presence means another
    /// attempt is mid-flight.
    pub async fn acquire_global(&self) {
        while self.locker.exist(&self.global_key).await {
            tokio::time::sleep(self.poll_interval).await;
        }
        if let Err(err) = self
            .locker
            .set(&self.global_key, b"locked", self.global_lock_ttl)
            .await
        {
            warn!(error = %err, key = %self.global_key, "failed to set global lock");
        }
    }

    /// Holds the global key for the release delay, then frees it. Bursts
    /// of back-to-back sends stay throttled against each other.
    pub async fn release_global_after_delay(&self) {
        tokio::time::sleep(self.release_delay).await;
        self.locker.delete(&self.global_key).await;
    }

    /// Frees the global key immediately (suppressed attempts do not pay
    /// the release delay).
    pub async fn release_global_now(&self) {
        self.locker.delete(&self.global_key).await;
    }

    /// Whether the event behind `key` is inside its suppression window.
    pub async fn is_suppressed(&self, key: &str) -> bool {
        self.locker.exist(key).await
    }

    /// Read-increment-write of the per-key iteration counter.
    ///
    /// Defaults to 1 on first occurrence or unreadable state. The counter
    /// entry's own TTL widens with each iteration so the count survives
    /// slightly past the message's suppression window.
    pub async fn next_iteration(&self, key: &str) -> u32 {
        let iter_key = format!("{key}{}iter", self.locker.separator());
        let previous = match self.locker.get(&iter_key).await {
            Ok(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0),
            Err(err) => {
                if !err.is_not_found() {
                    warn!(error = %err, key = %iter_key, "failed to read iteration counter");
                }
                0
            }
        };
        let iteration = previous.saturating_add(1);
        let ttl = self.base_cooldown.saturating_mul(iteration.saturating_add(1));
        if let Err(err) = self
            .locker
            .set(&iter_key, iteration.to_string().as_bytes(), ttl)
            .await
        {
            warn!(error = %err, key = %iter_key, "failed to store iteration counter");
        }
        iteration
    }

    /// Suppression window for `msg` at the given iteration, honoring the
    /// per-event override.
    pub fn cooldown(&self, msg: &dyn MessageContext, iteration: u32) -> Duration {
        let base = msg.cooldown().unwrap_or(self.base_cooldown);
        cooldown_for(base, iteration)
    }

    /// Marks the event as sent: subsequent identical events are
    /// suppressed until the cooldown lapses.
    pub async fn record_sent(&self, key: &str, msg: &dyn MessageContext, cooldown: Duration) {
        let value = match msg.err() {
            Some(err) => crate::message::chain_message(err),
            None => msg.message().to_owned(),
        };
        if let Err(err) = self.locker.set(key, value.as_bytes(), cooldown).await {
            warn!(error = %err, key = %key, "failed to set suppression key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::LocalLocker;
    use crate::message::{Caller, EventMessage, Service};

    fn gate(locker: Arc<dyn Locker>) -> CooldownGate {
        CooldownGate::new(
            locker,
            "global".to_owned(),
            Duration::from_millis(5),
            Duration::from_secs(30),
            Duration::from_millis(10),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn cooldown_grows_with_iteration_and_caps() {
        let base = Duration::from_secs(900);
        assert_eq!(cooldown_for(base, 1), base);
        assert_eq!(cooldown_for(base, 2), base * 2);
        assert_eq!(cooldown_for(base, 3), base * 4);
        assert_eq!(cooldown_for(base, 4), base * 8);
        assert_eq!(cooldown_for(base, 10_000), MAX_COOLDOWN);
    }

    #[test]
    fn cooldown_is_non_decreasing() {
        let base = Duration::from_secs(60);
        let mut last = Duration::ZERO;
        for iteration in 1..200 {
            let current = cooldown_for(base, iteration);
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn key_uses_explicit_key_when_present() {
        let msg = EventMessage::new("m")
            .with_service(
                Service::new("checkout")
                    .with_environment("prod")
                    .with_kind("http"),
            )
            .with_key("payment-declined");
        let key = build_key("alerts", &msg, "::");
        assert_eq!(key, "alerts::prod::checkout::http::payment-declined");
    }

    #[test]
    fn key_falls_back_to_caller_location() {
        let msg = EventMessage::new("m")
            .with_service(Service::new("checkout").with_environment("prod"))
            .with_caller(Caller::new("src/pay.rs", 7));
        let key = build_key("alerts", &msg, "::");
        assert_eq!(key, "alerts::prod::checkout::::src_pay.rs_7");
    }

    #[tokio::test]
    async fn iteration_increments_per_call() {
        let locker = Arc::new(LocalLocker::new());
        let gate = gate(locker);
        assert_eq!(gate.next_iteration("k").await, 1);
        assert_eq!(gate.next_iteration("k").await, 2);
        assert_eq!(gate.next_iteration("k").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_resets_after_ttl() {
        let locker = Arc::new(LocalLocker::new());
        let gate = CooldownGate::new(
            locker,
            "global".to_owned(),
            Duration::from_millis(5),
            Duration::from_secs(30),
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        assert_eq!(gate.next_iteration("k").await, 1);
        // counter TTL is base * (iteration + 1) = 100ms
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(gate.next_iteration("k").await, 1);
    }

    #[tokio::test]
    async fn global_lock_round_trip() {
        let locker = Arc::new(LocalLocker::new());
        let gate = gate(locker.clone());
        gate.acquire_global().await;
        assert!(locker.exist("global").await);
        gate.release_global_now().await;
        assert!(!locker.exist("global").await);
    }

    #[tokio::test]
    async fn record_sent_suppresses_key() {
        let locker = Arc::new(LocalLocker::new());
        let gate = gate(locker);
        let msg = EventMessage::new("m");
        gate.record_sent("k", &msg, Duration::from_secs(60)).await;
        assert!(gate.is_suppressed("k").await);
    }
}
