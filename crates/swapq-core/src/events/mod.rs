//! Event bus - タスク／キューのイベントを購読者へ配信
//!
//! # 設計原則
//! - 配信は同期、購読登録順
//! - ハンドラの失敗（Err / panic）は他のハンドラを止めない。DiagnosticsSink に報告し、
//!   スケジューラには伝播しない
//! - 外部の購読者に渡すのは `EventSubscriptions`（subscribe / unsubscribe のみ）。
//!   全ハンドラ削除はクレート内部（teardown）からしか呼べない

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use crate::domain::{EventKind, QueueEvent, SubscriptionId};
use crate::ports::DiagnosticsSink;

/// A subscriber callback. Returning `Err` is reported, not propagated.
pub type EventHandler = Arc<dyn Fn(&QueueEvent) -> Result<(), String> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

pub struct EventBus {
    state: Mutex<BusState>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl EventBus {
    pub fn new(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            diagnostics,
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        state.subscriptions.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` if the handle was unknown (already removed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    /// Deliver `event` to every handler subscribed to its kind.
    pub fn emit(&self, event: &QueueEvent) {
        let kind = event.kind();
        // snapshot so handlers can (un)subscribe without deadlocking
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .subscriptions
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };

        for (id, handler) in handlers {
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(error) = failure {
                self.diagnostics.report(
                    "event handler failed",
                    serde_json::json!({
                        "subscription": id.to_string(),
                        "event": format!("{kind:?}"),
                        "error": error,
                    }),
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscriptions
            .len()
    }

    /// Drop every handler for every event. Teardown only.
    pub(crate) fn clear_all(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = state.subscriptions.len();
        state.subscriptions.clear();
        n
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// The subscription surface handed to observers (UI, loggers, host dapps).
#[derive(Clone)]
pub struct EventSubscriptions {
    bus: Arc<EventBus>,
}

impl EventSubscriptions {
    pub(crate) fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }
}
