pub mod audit;
pub mod dashboard;
pub mod engine;
pub mod event_feed;
pub mod feed_quality;
pub mod performance;
pub mod scenario;
pub mod strategy;
pub mod vectorized;
