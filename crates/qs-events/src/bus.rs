use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::event::{Event, EventKind};

/// Backtest mode captures every published event in history; live mode does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMode {
    Backtest,
    Live,
}

/// Error surfaced by a handler. Logged and counted by `drain()`, never propagated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    pub component: &'static str,
    pub message: String,
}

impl HandlerError {
    pub fn new(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult = Result<(), HandlerError>;

/// Subscriber callback. Receives the event and a publisher for follow-up events.
pub type Handler = Box<dyn FnMut(&Event, &mut Publisher<'_>) -> HandlerResult>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Queue + optional history. Split from the subscriber table so handlers can
/// publish while the table is borrowed for dispatch.
struct Outbox {
    queue: VecDeque<Event>,
    history: Option<Vec<Event>>,
}

impl Outbox {
    fn push(&mut self, event: Event) {
        debug!(kind = %event.kind(), ts = %event.timestamp(), "publish");
        if let Some(h) = self.history.as_mut() {
            h.push(event.clone());
        }
        self.queue.push_back(event);
    }
}

/// Publishing handle passed to handlers during `drain()`.
pub struct Publisher<'a> {
    outbox: &'a mut Outbox,
}

impl Publisher<'_> {
    /// Enqueue an event; it is dispatched later in the same drain.
    pub fn publish(&mut self, event: impl Into<Event>) {
        self.outbox.push(event.into());
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: u64,
    pub handler_errors: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub mode: BusMode,
    pub queue_len: usize,
    pub subscriber_counts: BTreeMap<String, usize>,
    pub history_len: Option<usize>,
    pub event_counts: BTreeMap<String, usize>,
}

/// Typed pub/sub router.
///
/// `publish` only enqueues. `drain` dispatches FIFO, synchronously, including
/// events published by handlers during the drain, so a full
/// Signal -> Order -> Fill -> PositionUpdate cascade resolves before it returns.
/// Handlers for one kind run in subscription order.
pub struct EventBus {
    mode: BusMode,
    subscribers: BTreeMap<EventKind, Vec<Subscription>>,
    outbox: Outbox,
    next_id: u64,
}

impl EventBus {
    pub fn new(mode: BusMode) -> Self {
        let history = match mode {
            BusMode::Backtest => Some(Vec::new()),
            BusMode::Live => None,
        };
        debug!(?mode, "event bus created");
        Self {
            mode,
            subscribers: BTreeMap::new(),
            outbox: Outbox {
                queue: VecDeque::new(),
                history,
            },
            next_id: 0,
        }
    }

    pub fn mode(&self) -> BusMode {
        self.mode
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event, &mut Publisher<'_>) -> HandlerResult + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.entry(kind).or_default().push(Subscription {
            id,
            handler: Box::new(handler),
        });
        debug!(%kind, sub = id.0, "subscribed");
        id
    }

    /// Returns false if the subscription was not registered for `kind`.
    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let Some(subs) = self.subscribers.get_mut(&kind) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if removed {
            debug!(%kind, sub = id.0, "unsubscribed");
        }
        removed
    }

    /// Enqueue (and record, in backtest mode). Never invokes handlers.
    pub fn publish(&mut self, event: impl Into<Event>) {
        self.outbox.push(event.into());
    }

    pub fn queue_len(&self) -> usize {
        self.outbox.queue.len()
    }

    /// Dispatch until the queue is empty. Handler failures are logged and do
    /// not stop the remaining handlers or events.
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(event) = self.outbox.queue.pop_front() {
            report.dispatched += 1;
            let kind = event.kind();

            let Some(subs) = self.subscribers.get_mut(&kind) else {
                continue;
            };

            let mut publisher = Publisher {
                outbox: &mut self.outbox,
            };
            for sub in subs.iter_mut() {
                if let Err(e) = (sub.handler)(&event, &mut publisher) {
                    report.handler_errors += 1;
                    error!(
                        %kind,
                        sub = sub.id.0,
                        component = e.component,
                        error = %e.message,
                        "handler failed"
                    );
                }
            }
        }

        report
    }

    /// History filtered by kind and inclusive time bounds. Empty in live mode.
    pub fn history(
        &self,
        kind: Option<EventKind>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<&Event> {
        let Some(h) = self.outbox.history.as_ref() else {
            return Vec::new();
        };
        h.iter()
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .filter(|e| start.map_or(true, |s| e.timestamp() >= s))
            .filter(|e| end.map_or(true, |t| e.timestamp() <= t))
            .collect()
    }

    pub fn clear_history(&mut self) {
        if let Some(h) = self.outbox.history.as_mut() {
            h.clear();
            debug!("event history cleared");
        }
    }

    pub fn stats(&self) -> BusStats {
        let subscriber_counts = self
            .subscribers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.len()))
            .collect();

        let mut event_counts = BTreeMap::new();
        if let Some(h) = self.outbox.history.as_ref() {
            for e in h {
                *event_counts.entry(e.kind().as_str().to_string()).or_insert(0) += 1;
            }
        }

        BusStats {
            mode: self.mode,
            queue_len: self.outbox.queue.len(),
            subscriber_counts,
            history_len: self.outbox.history.as_ref().map(|h| h.len()),
            event_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetClass, Bar, Direction, MarketData, Signal};
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn md(h: u32) -> MarketData {
        MarketData::new(
            ts(h),
            "BTC/USD",
            AssetClass::Crypto,
            Bar::new(100.0, 101.0, 99.0, 100.5, 10.0),
        )
    }

    #[test]
    fn publish_does_not_dispatch_until_drain() {
        let mut bus = EventBus::new(BusMode::Live);
        let seen = Rc::new(RefCell::new(0));
        let s = Rc::clone(&seen);
        bus.subscribe(EventKind::MarketData, move |_, _| {
            *s.borrow_mut() += 1;
            Ok(())
        });

        bus.publish(md(1));
        assert_eq!(*seen.borrow(), 0);
        assert_eq!(bus.queue_len(), 1);

        let r = bus.drain();
        assert_eq!(r.dispatched, 1);
        assert_eq!(*seen.borrow(), 1);
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let mut bus = EventBus::new(BusMode::Live);
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let o = Rc::clone(&order);
            bus.subscribe(EventKind::MarketData, move |_, _| {
                o.borrow_mut().push(tag);
                Ok(())
            });
        }
        bus.publish(md(1));
        bus.drain();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let mut bus = EventBus::new(BusMode::Live);
        let hits = Rc::new(RefCell::new(Vec::new()));
        let h1 = Rc::clone(&hits);
        let first = bus.subscribe(EventKind::MarketData, move |_, _| {
            h1.borrow_mut().push(1);
            Ok(())
        });
        let h2 = Rc::clone(&hits);
        bus.subscribe(EventKind::MarketData, move |_, _| {
            h2.borrow_mut().push(2);
            Ok(())
        });

        assert!(bus.unsubscribe(EventKind::MarketData, first));
        assert!(!bus.unsubscribe(EventKind::MarketData, first));
        assert!(!bus.unsubscribe(EventKind::Fill, first));

        bus.publish(md(1));
        bus.drain();
        assert_eq!(*hits.borrow(), vec![2]);
    }

    #[test]
    fn history_filters_by_kind_and_time() {
        let mut bus = EventBus::new(BusMode::Backtest);
        bus.publish(md(1));
        bus.publish(Signal::new(ts(2), "BTC/USD", Direction::Long, 100.0));
        bus.publish(md(3));

        assert_eq!(bus.history(None, None, None).len(), 3);
        assert_eq!(bus.history(Some(EventKind::MarketData), None, None).len(), 2);
        assert_eq!(bus.history(None, Some(ts(2)), None).len(), 2);
        assert_eq!(bus.history(None, None, Some(ts(2))).len(), 2);
        assert_eq!(
            bus.history(Some(EventKind::MarketData), Some(ts(2)), Some(ts(3)))
                .len(),
            1
        );

        let stats = bus.stats();
        assert_eq!(stats.history_len, Some(3));
        assert_eq!(stats.event_counts.get("market_data"), Some(&2));
        assert_eq!(stats.event_counts.get("signal"), Some(&1));
        assert_eq!(stats.queue_len, 3);

        bus.clear_history();
        assert!(bus.history(None, None, None).is_empty());
    }

    #[test]
    fn live_mode_keeps_no_history() {
        let mut bus = EventBus::new(BusMode::Live);
        bus.publish(md(1));
        assert!(bus.history(None, None, None).is_empty());
        assert_eq!(bus.stats().history_len, None);
    }
}
