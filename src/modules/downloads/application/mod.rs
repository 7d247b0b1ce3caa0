pub mod metadata_enrichment;
pub mod persistence;
pub mod queue_service;
pub mod queue_state;

pub use metadata_enrichment::{fetch_with_retry, EnrichedMetadata, MetadataRetryPolicy};
pub use persistence::{decode_jobs, encode_jobs, QueuePersistence, STORE_KEY};
pub use queue_service::{DownloadQueue, QueueDependencies, QueueSettings, SweepReport};
pub use queue_state::{JobGroupView, QueueSnapshot};
