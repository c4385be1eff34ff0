use axum::extract::Query;
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::gate::{self, GateDecision};
use crate::{proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Deserialize)]
pub struct NavigationQuery {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Navigation {
    pub decision: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Tells a client whether it may open a dashboard view, and where to go if not.
pub async fn navigate(
    caller: Caller,
    Extension(state): Extension<AppState>,
    Query(query): Query<NavigationQuery>,
) -> Payload<Navigation> {
    let routes = &state.settings.routes;
    let allowed = routes.view(&query.path).ok_or_else(|| {
        Error::not_found("view", format!("No view is registered at `{}`", query.path))
    })?;

    let decision = gate::evaluate(&caller.session, allowed);
    let reason = match decision {
        GateDecision::Allow => None,
        GateDecision::DenyUnauthenticated => Some("unauthenticated"),
        GateDecision::DenyWrongRole(_) => Some("wrong_role"),
    };
    log::debug!("gate {} for {:?}: {:?}", query.path, caller.session.role(), decision);
    proceeds(Navigation {
        decision: if reason.is_none() { "allow" } else { "redirect" },
        path: query.path,
        reason,
        location: decision
            .redirect()
            .map(|target| routes.resolve(target).to_string()),
    })
}
