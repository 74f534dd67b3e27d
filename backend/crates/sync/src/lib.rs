pub mod connector;
pub mod engine;
pub mod http;
pub mod notion;
pub mod settings;
pub mod shopify;
pub mod transform;

pub use connector::{DestinationWriter, OrderPage, OrderSource};
pub use engine::{
    ConnectionCheck, ConnectionReport, Reconciler, RunOutcome, RunRequest, RunSummary, SyncMode,
    SyncStrategy,
};
pub use settings::{ConnectorSettings, Connectors};
