//! kie config-center support: transport, dimension merge and the polling source

mod client;
mod dimension;
mod source;

pub use client::{KieClient, RemoteClient};
pub use dimension::{
    generate_labels, DimensionMerger, DimensionName, KvDoc, KvResponse, DIMENSION_PRECEDENCE,
    STATUS_ENABLED,
};
pub use source::{KieSource, KIE_SOURCE_NAME};
