pub mod extractor;
pub mod fetcher;

pub use extractor::HtmlRecordExtractor;
pub use fetcher::{PortalConfig, ReqwestPortalFetcher};
