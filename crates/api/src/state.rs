use std::sync::Arc;

use ulip_domain::licence::LicenceService;
use ulip_domain::ports::upstream::UpstreamPort;
use ulip_domain::registry::RegistryService;
use ulip_domain::toll_tag::TollTagService;
use ulip_infra::config::AppConfig;
use ulip_infra::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: RegistryService,
    pub licence: LicenceService,
    pub toll_tags: TollTagService,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = UpstreamClient::from_settings(&config.upstream_settings())?;
        Ok(Self::with_upstream(config, Arc::new(client)))
    }

    pub fn with_upstream(config: AppConfig, upstream: Arc<dyn UpstreamPort>) -> Self {
        Self {
            config,
            registry: RegistryService::new(upstream.clone()),
            licence: LicenceService::new(upstream.clone()),
            toll_tags: TollTagService::new(upstream),
        }
    }
}
