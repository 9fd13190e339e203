//! In-memory link pair for simulation and tests. Two endpoints share a
//! plugged flag (the presence-detect line) and a byte queue per
//! direction (the serial hardware buffer).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::link::Link;

/// One endpoint of a simulated cable.
pub struct LoopbackLink {
    rx: Rc<RefCell<VecDeque<u8>>>,
    tx: Rc<RefCell<VecDeque<u8>>>,
    plugged: Rc<Cell<bool>>,
}

/// Handle to plug or unplug a cable after its endpoints have been moved
/// into their handlers.
#[derive(Clone)]
pub struct PlugHandle(Rc<Cell<bool>>);

impl PlugHandle {
    pub fn set(&self, plugged: bool) {
        self.0.set(plugged);
    }

    pub fn is_plugged(&self) -> bool {
        self.0.get()
    }
}

impl LoopbackLink {
    /// A cable: what one endpoint writes, the other reads. Starts
    /// unplugged; use the handle to connect it.
    pub fn pair() -> (Self, Self, PlugHandle) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let plugged = Rc::new(Cell::new(false));
        let a = Self {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            plugged: plugged.clone(),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            plugged: plugged.clone(),
        };
        (a, b, PlugHandle(plugged))
    }

    /// A side with nothing attached (a chain endpoint).
    pub fn unplugged() -> Self {
        Self {
            rx: Rc::new(RefCell::new(VecDeque::new())),
            tx: Rc::new(RefCell::new(VecDeque::new())),
            plugged: Rc::new(Cell::new(false)),
        }
    }
}

impl Link for LoopbackLink {
    fn connected(&self) -> bool {
        self.plugged.get()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.borrow_mut().pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.plugged.get() {
            self.tx.borrow_mut().extend(bytes.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_cross_the_cable() {
        let (mut a, mut b, plug) = LoopbackLink::pair();
        plug.set(true);
        a.write(&[1, 2, 3]);
        assert_eq!(b.read_byte(), Some(1));
        assert_eq!(b.read_byte(), Some(2));
        assert_eq!(b.read_byte(), Some(3));
        assert_eq!(b.read_byte(), None);
        b.write(&[9]);
        assert_eq!(a.read_byte(), Some(9));
    }

    #[test]
    fn unplugged_cable_drops_writes() {
        let (mut a, mut b, plug) = LoopbackLink::pair();
        assert!(!a.connected());
        a.write(&[1]);
        assert_eq!(b.read_byte(), None);
        plug.set(true);
        assert!(b.connected());
    }
}
