use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::memory::types::MemorySnapshot;

/// Error returned by a listener callback
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a listener callback
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Observer of monitor notifications.
///
/// Every callback has a no-op default, so implementors only override what they care about. Callbacks run on the
/// sampling thread without any engine lock held and may call back into the engine. An error or panic raised by a
/// callback is recorded to the engine's diagnostic sink and never reaches other listeners.
pub trait MemoryListener: Send + Sync {
    fn on_monitoring_started(&self) -> ListenerResult {
        Ok(())
    }

    fn on_monitoring_stopped(&self) -> ListenerResult {
        Ok(())
    }

    /// The engine hit a fatal internal error and is about to stop
    fn on_monitoring_error(&self, _error: &Error) -> ListenerResult {
        Ok(())
    }

    /// Delivered once per sampling cycle
    fn on_snapshot(&self, _snapshot: &MemorySnapshot) -> ListenerResult {
        Ok(())
    }

    fn on_memory_low(&self, _snapshot: &MemorySnapshot) -> ListenerResult {
        Ok(())
    }

    fn on_memory_normal(&self, _snapshot: &MemorySnapshot) -> ListenerResult {
        Ok(())
    }

    /// Entry point used by dispatch; routes `event` to the matching callback above
    fn on_event(&self, event: &MonitorEvent) -> ListenerResult {
        match event {
            MonitorEvent::Started => self.on_monitoring_started(),
            MonitorEvent::Stopped => self.on_monitoring_stopped(),
            MonitorEvent::Error(error) => self.on_monitoring_error(error),
            MonitorEvent::Snapshot(snapshot) => self.on_snapshot(snapshot),
            MonitorEvent::MemoryLow(snapshot) => self.on_memory_low(snapshot),
            MonitorEvent::MemoryNormal(snapshot) => self.on_memory_normal(snapshot),
        }
    }
}

/// Notification delivered to listeners
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Started,
    Stopped,
    Error(Arc<Error>),
    Snapshot(MemorySnapshot),
    MemoryLow(MemorySnapshot),
    MemoryNormal(MemorySnapshot),
}

/// Payload-free discriminant of a [`MonitorEvent`]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum EventKind {
    Started,
    Stopped,
    Error,
    Snapshot,
    MemoryLow,
    MemoryNormal,
}

impl MonitorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Started => EventKind::Started,
            Self::Stopped => EventKind::Stopped,
            Self::Error(_) => EventKind::Error,
            Self::Snapshot(_) => EventKind::Snapshot,
            Self::MemoryLow(_) => EventKind::MemoryLow,
            Self::MemoryNormal(_) => EventKind::MemoryNormal,
        }
    }

    /// Snapshot carried by the event, if any
    pub fn snapshot(&self) -> Option<&MemorySnapshot> {
        match self {
            Self::Snapshot(s) | Self::MemoryLow(s) | Self::MemoryNormal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "monitoring started"),
            Self::Stopped => write!(f, "monitoring stopped"),
            Self::Error(error) => write!(f, "monitoring error: {}", error),
            Self::Snapshot(snapshot) => write!(f, "snapshot: {}", snapshot),
            Self::MemoryLow(snapshot) => write!(f, "memory low: {}", snapshot),
            Self::MemoryNormal(snapshot) => write!(f, "memory normal: {}", snapshot),
        }
    }
}

/// Adapter turning a closure over [`MonitorEvent`] into a [`MemoryListener`]
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&MonitorEvent) -> ListenerResult + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MemoryListener for FnListener<F>
where
    F: Fn(&MonitorEvent) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &MonitorEvent) -> ListenerResult {
        (self.callback)(event)
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

/// Thread-safe set of listeners with identity-based membership
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn MemoryListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener`; returns `false` if that exact listener is already registered
    pub fn add(&self, listener: Arc<dyn MemoryListener>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Removes `listener`; returns whether it was registered
    pub fn remove(&self, listener: &Arc<dyn MemoryListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|existing| !same_listener(existing, listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &Arc<dyn MemoryListener>) -> bool {
        self.listeners.lock().iter().any(|existing| same_listener(existing, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Copy of the current membership, taken under the lock.
    ///
    /// Dispatch iterates the copy with the lock released, so listeners added or removed meanwhile affect only later
    /// dispatches.
    pub fn snapshot_for_dispatch(&self) -> Vec<Arc<dyn MemoryListener>> {
        self.listeners.lock().clone()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ListenerRegistry");
        match self.listeners.try_lock() {
            Some(listeners) => debug.field("listeners", &format!("<{} listeners>", listeners.len())),
            None => debug.field("listeners", &"<locked>"),
        };
        debug.finish()
    }
}

// Compares allocation addresses only; vtable pointers for the same type may differ across codegen units.
fn same_listener(a: &Arc<dyn MemoryListener>, b: &Arc<dyn MemoryListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        snapshots: AtomicUsize,
    }

    impl MemoryListener for Counting {
        fn on_snapshot(&self, _snapshot: &MemorySnapshot) -> ListenerResult {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_set_semantics() {
        let registry = ListenerRegistry::new();
        let a: Arc<dyn MemoryListener> = Arc::new(Counting::default());
        let b: Arc<dyn MemoryListener> = Arc::new(Counting::default());

        assert!(registry.is_empty());
        assert!(registry.add(a.clone()));
        assert!(!registry.add(a.clone()), "re-adding the same listener is a no-op");
        assert!(registry.add(b.clone()));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a));

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(!registry.contains(&a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identity_not_equality() {
        // Two listeners of the same type with identical state are still distinct members
        let registry = ListenerRegistry::new();
        assert!(registry.add(Arc::new(Counting::default())));
        assert!(registry.add(Arc::new(Counting::default())));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dispatch_snapshot_is_detached() {
        let registry = ListenerRegistry::new();
        let a: Arc<dyn MemoryListener> = Arc::new(Counting::default());
        registry.add(a.clone());

        let copy = registry.snapshot_for_dispatch();
        registry.remove(&a);
        registry.add(Arc::new(Counting::default()));
        registry.add(Arc::new(Counting::default()));

        assert_eq!(copy.len(), 1);
        assert!(same_listener(&copy[0], &a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_event_delivery_routes_to_callback() {
        let counting = Arc::new(Counting::default());
        let listener: &dyn MemoryListener = counting.as_ref();
        let snapshot = MemorySnapshot::new(1, 1, 2);

        listener.on_event(&MonitorEvent::Snapshot(snapshot)).unwrap();
        listener.on_event(&MonitorEvent::MemoryLow(snapshot)).unwrap();
        listener.on_event(&MonitorEvent::Started).unwrap();
        assert_eq!(counting.snapshots.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_listener_sees_every_event_kind() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = FnListener::new(move |event: &MonitorEvent| {
            sink.lock().push(event.kind());
            Ok(())
        });

        let snapshot = MemorySnapshot::new(1, 1, 2);
        for event in [
            MonitorEvent::Started,
            MonitorEvent::Snapshot(snapshot),
            MonitorEvent::MemoryLow(snapshot),
            MonitorEvent::MemoryNormal(snapshot),
            MonitorEvent::Error(Arc::new(Error::sampling("boom"))),
            MonitorEvent::Stopped,
        ] {
            listener.on_event(&event).unwrap();
        }

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Started,
                EventKind::Snapshot,
                EventKind::MemoryLow,
                EventKind::MemoryNormal,
                EventKind::Error,
                EventKind::Stopped,
            ]
        );
    }

    #[test]
    fn test_event_accessors() {
        let snapshot = MemorySnapshot::new(3, 1, 4);
        assert_eq!(MonitorEvent::MemoryNormal(snapshot).snapshot(), Some(&snapshot));
        assert!(MonitorEvent::Started.snapshot().is_none());
        assert_eq!(MonitorEvent::Stopped.to_string(), "monitoring stopped");
        assert_eq!(
            MonitorEvent::Error(Arc::new(Error::NotRunning)).to_string(),
            "monitoring error: Memory monitor is not running"
        );
    }
}
