//! Synchronous publish/subscribe used by sources and metrics.

use analyst_index::{DimensionId, Filter};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub const DEFAULT_MAX_EVENT_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The dataset went from empty to non-empty.
    Ready,
    /// Rows changed, or (relayed by a metric) a filter on another dimension changed.
    Change,
    /// A dimension's filter was set or cleared.
    Filter,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Ready,
    Change,
    Filter {
        dimension: DimensionId,
        filter: Option<Filter>,
    },
}

impl Notification {
    pub fn event(&self) -> Event {
        match self {
            Notification::Ready => Event::Ready,
            Notification::Change => Event::Change,
            Notification::Filter { .. } => Event::Filter,
        }
    }
}

/// Handle returned by [`EventEmitter::on`], used to cancel one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(&Notification)>;

struct Subscription {
    id: SubscriptionId,
    event: Event,
    listener: Listener,
}

/// Ordered listener registry.
///
/// Listeners run synchronously in registration order. The list is snapshotted before dispatch,
/// so a listener may subscribe or unsubscribe while an event is being delivered; changes apply
/// from the next dispatch on. Nested dispatch deeper than `max_depth` is dropped.
pub struct EventEmitter {
    subscriptions: RefCell<Vec<Subscription>>,
    next_id: Cell<u64>,
    depth: Cell<usize>,
    max_depth: usize,
}

impl EventEmitter {
    pub fn new(max_depth: usize) -> Self {
        Self {
            subscriptions: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            depth: Cell::new(0),
            max_depth,
        }
    }

    pub fn on(&self, event: Event, listener: impl Fn(&Notification) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            event,
            listener: Rc::new(listener),
        });
        id
    }

    /// Remove every listener for `event`, or every listener at all when `event` is `None`.
    pub fn off(&self, event: Option<Event>) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        match event {
            Some(event) => subscriptions.retain(|s| s.event != event),
            None => subscriptions.clear(),
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn listener_count(&self, event: Event) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|s| s.event == event)
            .count()
    }

    pub fn trigger(&self, notification: &Notification) {
        let event = notification.event();
        let depth = self.depth.get();
        if depth >= self.max_depth {
            log::warn!("dropping {event:?} dispatch nested {depth} levels deep");
            return;
        }

        let listeners: Vec<Listener> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| s.event == event)
            .map(|s| s.listener.clone())
            .collect();
        log::trace!("dispatching {event:?} to {} listeners", listeners.len());

        self.depth.set(depth + 1);
        let _restore = DepthGuard {
            depth: &self.depth,
            restore: depth,
        };
        for listener in listeners {
            listener(notification);
        }
    }
}

/// Resets the dispatch depth when a dispatch ends, including by unwinding out of a listener.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
    restore: usize,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.restore);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENT_DEPTH)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.subscriptions.borrow().len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
