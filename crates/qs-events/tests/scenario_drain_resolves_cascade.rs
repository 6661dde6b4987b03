//! A Signal -> Order -> Fill chain published from inside handlers must fully
//! resolve within one `drain()`, and events from a later `publish` must not be
//! seen before the earlier cascade finishes.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use qs_events::*;

fn bar_event(hour: u32) -> MarketData {
    MarketData::new(
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        "BTC/USD",
        AssetClass::Crypto,
        Bar::new(100.0, 102.0, 98.0, 101.0, 50.0),
    )
}

fn wire(bus: &mut EventBus, log: Rc<RefCell<Vec<String>>>) {
    let l = Rc::clone(&log);
    bus.subscribe(EventKind::MarketData, move |ev, out| {
        if let Event::MarketData(md) = ev {
            l.borrow_mut().push(format!("md@{}", md.timestamp.format("%H")));
            out.publish(Signal::new(md.timestamp, &md.symbol, Direction::Long, md.close()));
        }
        Ok(())
    });

    let l = Rc::clone(&log);
    bus.subscribe(EventKind::Signal, move |ev, out| {
        if let Event::Signal(s) = ev {
            l.borrow_mut().push("signal".to_string());
            out.publish(Order::market("ORD-1", s.timestamp, &s.symbol, OrderSide::Buy, 1.0));
        }
        Ok(())
    });

    let l = Rc::clone(&log);
    bus.subscribe(EventKind::Order, move |ev, out| {
        if let Event::Order(o) = ev {
            l.borrow_mut().push("order".to_string());
            out.publish(Fill {
                id: "FIL-1".to_string(),
                order_id: o.id.clone(),
                timestamp: o.timestamp,
                symbol: o.symbol.clone(),
                asset_class: o.asset_class,
                side: o.side,
                quantity: o.quantity,
                price: 102.0,
                commission: 0.0,
                strategy_id: o.strategy_id.clone(),
                position_id: None,
            });
        }
        Ok(())
    });

    let l = Rc::clone(&log);
    bus.subscribe(EventKind::Fill, move |_, _| {
        l.borrow_mut().push("fill".to_string());
        Ok(())
    });
}

#[test]
fn cascade_resolves_inside_single_drain() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut bus = EventBus::new(BusMode::Backtest);
    wire(&mut bus, Rc::clone(&log));

    bus.publish(bar_event(9));
    let report = bus.drain();

    assert_eq!(report.dispatched, 4);
    assert_eq!(report.handler_errors, 0);
    assert_eq!(bus.queue_len(), 0);
    assert_eq!(*log.borrow(), vec!["md@09", "signal", "order", "fill"]);
    assert_eq!(bus.history(Some(EventKind::Fill), None, None).len(), 1);
}

#[test]
fn earlier_bar_cascade_completes_before_later_bar_is_seen() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut bus = EventBus::new(BusMode::Live);
    wire(&mut bus, Rc::clone(&log));

    bus.publish(bar_event(9));
    bus.drain();
    bus.publish(bar_event(10));
    bus.drain();

    assert_eq!(
        *log.borrow(),
        vec!["md@09", "signal", "order", "fill", "md@10", "signal", "order", "fill"]
    );
}
