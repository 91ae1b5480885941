use quantsys_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use quantsys_domain::repositories::market_data::EventRepository;
use quantsys_infrastructure::artifacts::{FilesystemArtifactReader, FilesystemArtifactWriter};
use quantsys_infrastructure::market_data::CsvEventRepository;

pub struct EngineDeps {
    pub events: Box<dyn EventRepository>,
    pub artifacts: Box<dyn ArtifactWriter + Sync>,
}

pub struct ReportingDeps {
    pub reader: Box<dyn ArtifactReader>,
    pub writer: Box<dyn ArtifactWriter>,
}

pub fn build_engine_deps() -> EngineDeps {
    EngineDeps {
        events: Box::new(CsvEventRepository::new()),
        artifacts: Box::new(FilesystemArtifactWriter::new()),
    }
}

pub fn build_events_repo() -> Box<dyn EventRepository> {
    Box::new(CsvEventRepository::new())
}

pub fn build_reporting_deps() -> ReportingDeps {
    ReportingDeps {
        reader: Box::new(FilesystemArtifactReader::new()),
        writer: Box::new(FilesystemArtifactWriter::new()),
    }
}
