// Shared fixtures for the behavior suites
use std::sync::Arc;

use fundscope_core::{FixtureHttpClient, SourceClient, SourceId, SourcePolicy, ThrottleRegistry};

pub use fundscope_core::parsers::pdf::fixtures::positioned_pdf;

/// Client for `source` answered by `http`, without pacing or retry waits.
pub fn immediate_client(http: &FixtureHttpClient, source: SourceId) -> SourceClient {
    SourceClient::new(
        Arc::new(http.clone()),
        &SourcePolicy::immediate(source),
        &ThrottleRegistry::new(),
    )
}
