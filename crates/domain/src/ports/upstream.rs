use serde_json::Value;

use super::BoxFuture;
use crate::GatewayResult;

/// Upstream routes, one per federated registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubService {
    Registry,
    Licence,
    TollTagTransactions,
    TollTagDetail,
}

impl SubService {
    pub fn path(self) -> &'static str {
        match self {
            SubService::Registry => "VAHAN/01",
            SubService::Licence => "SARATHI/01",
            SubService::TollTagTransactions => "FASTAG/01",
            SubService::TollTagDetail => "FASTAG/02",
        }
    }
}

/// Authenticated, breaker-guarded POST against one upstream sub-service.
///
/// Implementations return the decoded response body untouched; envelope
/// interpretation belongs to the caller.
pub trait UpstreamPort: Send + Sync {
    fn call<'a>(
        &'a self,
        sub_service: SubService,
        body: Value,
        request_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult<Value>>;
}
