pub mod csv_events;

pub use csv_events::CsvEventRepository;
