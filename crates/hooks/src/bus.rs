//! The hook dispatcher.
//!
//! `trigger` runs every enabled subscriber for an event concurrently, each
//! inside its own failure boundary and execution-time bound. The producer
//! observes only the aggregate per-subscriber outcome map. Events from one
//! producer reach a given subscriber in producer order because producers
//! await the trigger before emitting their next event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::events::HookPayload;

/// Consecutive failures after which a subscriber is taken out of rotation.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Upper bound on a single subscriber execution.
const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(30);

/// A lifecycle event subscriber.
#[async_trait]
pub trait EventHook: Send + Sync {
    /// Unique name, used in outcome maps and disable logs.
    fn name(&self) -> &str;

    /// Handle one event. Errors are contained by the bus.
    async fn execute(&self, event: &str, payload: &HookPayload) -> tarsy_domain::Result<()>;
}

/// Per-subscriber outcome of one `trigger` call (`true` = executed cleanly).
pub type HookOutcomes = HashMap<String, bool>;

struct RegisteredHook {
    hook: Arc<dyn EventHook>,
    enabled: AtomicBool,
    consecutive_errors: AtomicU32,
}

impl RegisteredHook {
    fn new(hook: Arc<dyn EventHook>) -> Self {
        Self {
            hook,
            enabled: AtomicBool::new(true),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    async fn safe_execute(&self, event: &str, payload: &HookPayload) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }

        let run = tokio::time::timeout(SUBSCRIBER_TIMEOUT, self.hook.execute(event, payload));
        let outcome = match run.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("exceeded {}s execution bound", SUBSCRIBER_TIMEOUT.as_secs())),
        };

        match outcome {
            Ok(()) => {
                self.consecutive_errors.store(0, Ordering::Release);
                true
            }
            Err(err) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::error!(
                    hook = self.hook.name(),
                    event,
                    errors,
                    max = MAX_CONSECUTIVE_ERRORS,
                    error = %err,
                    "hook execution failed"
                );
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    self.enabled.store(false, Ordering::Release);
                    tracing::warn!(hook = self.hook.name(), "hook disabled after repeated failures");
                }
                false
            }
        }
    }
}

/// Registration and dispatch of event hooks.
pub struct HookManager {
    hooks: RwLock<HashMap<String, Vec<Arc<RegisteredHook>>>>,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    pub fn new() -> Self {
        Self { hooks: RwLock::new(HashMap::new()) }
    }

    /// Register a subscriber for one event name. Registering the same
    /// subscriber again (after a disable) starts it fresh.
    pub fn register(&self, event: &str, hook: Arc<dyn EventHook>) {
        tracing::info!(hook = hook.name(), event, "registering hook");
        self.hooks
            .write()
            .entry(event.to_owned())
            .or_default()
            .push(Arc::new(RegisteredHook::new(hook)));
    }

    /// Register a subscriber for several event names at once.
    pub fn register_many(&self, events: &[&str], hook: Arc<dyn EventHook>) {
        for event in events {
            self.register(event, hook.clone());
        }
    }

    /// Fan an event out to every enabled subscriber concurrently.
    ///
    /// Never fails: subscriber errors are absorbed into the outcome map.
    pub async fn trigger(&self, event: &str, payload: HookPayload) -> HookOutcomes {
        let subscribers: Vec<Arc<RegisteredHook>> = {
            let hooks = self.hooks.read();
            match hooks.get(event) {
                Some(list) => list
                    .iter()
                    .filter(|h| h.enabled.load(Ordering::Acquire))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        if subscribers.is_empty() {
            return HookOutcomes::new();
        }

        let futures = subscribers.iter().map(|sub| {
            let payload = &payload;
            async move { (sub.hook.name().to_owned(), sub.safe_execute(event, payload).await) }
        });

        let results = futures_util::future::join_all(futures).await;
        results.into_iter().collect()
    }

    /// Whether a named subscriber is currently enabled for an event.
    pub fn is_enabled(&self, event: &str, name: &str) -> bool {
        let hooks = self.hooks.read();
        hooks
            .get(event)
            .map(|list| {
                list.iter()
                    .any(|h| h.hook.name() == name && h.enabled.load(Ordering::Acquire))
            })
            .unwrap_or(false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
