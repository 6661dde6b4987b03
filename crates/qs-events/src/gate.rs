use std::cell::RefCell;
use std::rc::Rc;

use crate::types::{RiskAlert, Signal};

/// Pre-trade screen applied by components that size their own orders.
///
/// `Err(alert)` means the signal must not become an order; the caller
/// publishes the alert.
pub trait SignalGate {
    fn screen(&mut self, signal: &Signal) -> Result<(), RiskAlert>;
}

impl<T: SignalGate + ?Sized> SignalGate for Rc<RefCell<T>> {
    fn screen(&mut self, signal: &Signal) -> Result<(), RiskAlert> {
        self.borrow_mut().screen(signal)
    }
}
