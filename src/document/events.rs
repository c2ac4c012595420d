use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use derivative::Derivative;

type Listener<T> = Rc<dyn Fn(&T)>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Synchronous, single-threaded event source.
///
/// Listeners run in registration order on the emitting task. A listener may
/// subscribe or unsubscribe others while it runs; the change takes effect on
/// the next emission.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Emitter<T> {
    #[derivative(Debug = "ignore")]
    listeners: Rc<RefCell<Listeners<T>>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut listeners = self.listeners.borrow_mut();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Rc::new(listener)));
            id
        };

        let weak: Weak<RefCell<Listeners<T>>> = Rc::downgrade(&self.listeners);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.borrow_mut().entries.retain(|(eid, _)| *eid != id);
                }
            })),
        }
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Emitter::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Subscription {
    #[derivative(Debug(format_with = "fmt_active"))]
    cancel: Option<Box<dyn FnOnce()>>,
}

fn fmt_active(cancel: &Option<Box<dyn FnOnce()>>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", if cancel.is_some() { "active" } else { "cancelled" })
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = seen.clone();
        let _a = emitter.subscribe(move |v| s1.borrow_mut().push(("a", *v)));
        let s2 = seen.clone();
        let _b = emitter.subscribe(move |v| s2.borrow_mut().push(("b", *v)));

        emitter.emit(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let emitter = Emitter::<()>::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let sub = emitter.subscribe(move |_| c.set(c.get() + 1));
        emitter.emit(&());
        sub.unsubscribe();
        emitter.emit(&());

        assert_eq!(count.get(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_after_emitter_dropped() {
        let emitter = Emitter::<()>::new();
        let sub = emitter.subscribe(|_| {});
        drop(emitter);
        sub.unsubscribe();
    }
}
