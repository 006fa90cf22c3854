use std::sync::Arc;

use llmproxy_audit::AuditSink;
use llmproxy_cache::ResponseCache;
use llmproxy_eventbus::EventBus;
use llmproxy_store::{ProjectStore, TokenStore};
use reqwest::Client;

use crate::aggregator::CacheHitAggregator;
use crate::config::{PipelineConfig, ProviderProfile};
use crate::validator::TokenValidator;

/// Everything the request pipeline and the admin sub-router share.
pub struct AppState {
    pub tokens: Arc<dyn TokenStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub validator: TokenValidator,
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub event_bus: Arc<dyn EventBus>,
    pub audit: Arc<dyn AuditSink>,
    pub aggregator: Arc<CacheHitAggregator>,
    pub http_client: Client,
    pub provider: ProviderProfile,
    pub config: PipelineConfig,
    pub management_token: Option<String>,
}
