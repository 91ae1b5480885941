use crate::value_objects::market_event::MarketEvent;

/// Finite, per-run source of market events.
pub trait EventFeed {
    fn next_event(&mut self) -> Option<MarketEvent>;
}

#[derive(Debug, Clone)]
pub struct VecEventFeed {
    events: Vec<MarketEvent>,
    index: usize,
}

impl VecEventFeed {
    pub fn new(events: Vec<MarketEvent>) -> Self {
        Self { events, index: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.events.len().saturating_sub(self.index)
    }
}

impl EventFeed for VecEventFeed {
    fn next_event(&mut self) -> Option<MarketEvent> {
        let event = self.events.get(self.index)?.clone();
        self.index += 1;
        Some(event)
    }
}

/// Drains a feed into memory.
pub fn collect_events<F: EventFeed + ?Sized>(feed: &mut F) -> Vec<MarketEvent> {
    let mut events = Vec::new();
    while let Some(event) = feed.next_event() {
        events.push(event);
    }
    events
}
