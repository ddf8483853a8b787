//! Pipeline configuration.
//!
//! Everything is resolved once, at construction; components receive paths and
//! URLs through their constructors and never read the environment themselves.

use std::env;
use std::path::PathBuf;

use fundscope_store::{resolve_fundscope_home, StoreConfig};

use crate::discovery::bdif::BDIF_BASE_URL;
use crate::discovery::oam::{BUNDESANZEIGER_SEARCH_URL, LUXSE_SEARCH_URL};
use crate::qa::QaThresholds;
use crate::source_policy::SourcePolicy;
use crate::SourceId;

/// SEC asks automated clients to identify themselves with a contact address.
pub const DEFAULT_SEC_USER_AGENT: &str =
    "fundscope/0.1 (holdings research; contact@fundscope.invalid)";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub registry_path: PathBuf,
    /// `cusip,isin` reference table; optional at runtime.
    pub cusip_reference_path: PathBuf,
    pub sec_user_agent: String,
    pub bdif_base_url: String,
    pub bdif_attachment_proxy: Option<String>,
    pub luxse_search_url: String,
    pub bundesanzeiger_search_url: String,
    pub qa: QaThresholds,
    pub nport: SourcePolicy,
    pub oam: SourcePolicy,
    pub bdif: SourcePolicy,
    pub metadata: SourcePolicy,
    /// Concurrent funds per batch ingestion.
    pub max_concurrency: usize,
}

impl PipelineConfig {
    /// All paths beneath `home`, every URL at its public default.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let store = StoreConfig::under(home);
        Self {
            registry_path: store.home.join("registry").join("funds.yaml"),
            cusip_reference_path: store.home.join("reference").join("cusip_to_isin.csv"),
            store,
            sec_user_agent: DEFAULT_SEC_USER_AGENT.to_owned(),
            bdif_base_url: BDIF_BASE_URL.to_owned(),
            bdif_attachment_proxy: None,
            luxse_search_url: LUXSE_SEARCH_URL.to_owned(),
            bundesanzeiger_search_url: BUNDESANZEIGER_SEARCH_URL.to_owned(),
            qa: QaThresholds::default(),
            nport: SourcePolicy::default_for(SourceId::Nport),
            oam: SourcePolicy::default_for(SourceId::Oam),
            bdif: SourcePolicy::default_for(SourceId::Bdif),
            metadata: SourcePolicy::default_for(SourceId::Metadata),
            max_concurrency: 4,
        }
    }

    /// Defaults under the resolved data home, then environment overrides.
    pub fn from_env() -> Self {
        Self::under(resolve_fundscope_home()).with_env_overrides()
    }

    /// Applies `SEC_USER_AGENT`, `BDIF_BASE_URL`, `BDIF_ATTACHMENT_PROXY`,
    /// `LUXSE_SEARCH_URL` and `BUNDESANZEIGER_SEARCH_URL` when set and
    /// non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(agent) = non_empty_var("SEC_USER_AGENT") {
            self.sec_user_agent = agent;
        }
        if let Some(url) = non_empty_var("BDIF_BASE_URL") {
            self.bdif_base_url = url;
        }
        if let Some(proxy) = non_empty_var("BDIF_ATTACHMENT_PROXY") {
            self.bdif_attachment_proxy = Some(proxy);
        }
        if let Some(url) = non_empty_var("LUXSE_SEARCH_URL") {
            self.luxse_search_url = url;
        }
        if let Some(url) = non_empty_var("BUNDESANZEIGER_SEARCH_URL") {
            self.bundesanzeiger_search_url = url;
        }
        self
    }

    pub fn with_qa_thresholds(mut self, qa: QaThresholds) -> Self {
        self.qa = qa;
        self
    }

    /// Replaces every source policy with [`SourcePolicy::immediate`].
    pub fn with_immediate_policies(mut self) -> Self {
        self.nport = SourcePolicy::immediate(SourceId::Nport);
        self.oam = SourcePolicy::immediate(SourceId::Oam);
        self.bdif = SourcePolicy::immediate(SourceId::Bdif);
        self.metadata = SourcePolicy::immediate(SourceId::Metadata);
        self
    }

    pub fn policy(&self, source: SourceId) -> &SourcePolicy {
        match source {
            SourceId::Nport => &self.nport,
            SourceId::Oam => &self.oam,
            SourceId::Bdif => &self.bdif,
            SourceId::Metadata => &self.metadata,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::under(resolve_fundscope_home())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}
