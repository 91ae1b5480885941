use crate::services::feed_quality::{feed_quality_from_events, FeedQualityReport};
use crate::value_objects::market_event::MarketEvent;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EventQuery {
    pub source: PathBuf,
    /// Keep only these instruments when set.
    pub instruments: Option<Vec<String>>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl EventQuery {
    pub fn all(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            instruments: None,
            start: None,
            end: None,
        }
    }

    pub fn accepts(&self, event: &MarketEvent) -> bool {
        if self.start.is_some_and(|start| event.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| event.timestamp > end) {
            return false;
        }
        match &self.instruments {
            Some(list) => list.iter().any(|inst| *inst == event.instrument),
            None => true,
        }
    }
}

pub trait EventRepository {
    fn load_events(
        &self,
        query: &EventQuery,
    ) -> Result<(Vec<MarketEvent>, FeedQualityReport), String>;
}

/// Serves a fixed event set, e.g. one already loaded and windowed by a sweep.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventRepository {
    events: Vec<MarketEvent>,
}

impl InMemoryEventRepository {
    pub fn new(events: Vec<MarketEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventRepository for InMemoryEventRepository {
    fn load_events(
        &self,
        query: &EventQuery,
    ) -> Result<(Vec<MarketEvent>, FeedQualityReport), String> {
        let events: Vec<MarketEvent> = self
            .events
            .iter()
            .filter(|event| query.accepts(event))
            .cloned()
            .collect();
        let report = feed_quality_from_events(&events);
        Ok((events, report))
    }
}

#[cfg(test)]
mod tests {
    use super::{EventQuery, EventRepository, InMemoryEventRepository};
    use crate::value_objects::market_event::MarketEvent;

    #[test]
    fn in_memory_repository_applies_the_query_window() {
        let repo = InMemoryEventRepository::new(vec![
            MarketEvent::trade(1, "AAA", 10.0),
            MarketEvent::trade(2, "BBB", 20.0),
            MarketEvent::trade(3, "AAA", 11.0),
        ]);
        let query = EventQuery {
            source: "memory".into(),
            instruments: Some(vec!["AAA".to_string()]),
            start: Some(2),
            end: None,
        };
        let (events, report) = repo.load_events(&query).expect("load");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 3);
        assert_eq!(report.rows, 1);
    }
}
