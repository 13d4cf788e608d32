//! AdmissionReview endpoints for NetworkPolicy.
//!
//! - `POST /validate-networking-k8s-io-v1-networkpolicy` runs the admission gate
//! - `POST /mutate-networking-k8s-io-v1-networkpolicy` allows unchanged
//!
//! A review that cannot be mapped to a policy is denied, never allowed.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, info, warn};

use npgate_core::AdmissionGate;
use npgate_core::lifecycle::LifecycleManager;

use crate::convert::{operation, policy_object};
use crate::error::ServerError;
use crate::logging_layer::logging_layer;

/// Path of the validating hook.
pub const VALIDATE_PATH: &str = "/validate-networking-k8s-io-v1-networkpolicy";

/// Path of the defaulting hook.
pub const MUTATE_PATH: &str = "/mutate-networking-k8s-io-v1-networkpolicy";

type PolicyReview = AdmissionReview<NetworkPolicy>;
type ReviewResponse = Json<AdmissionReview<DynamicObject>>;

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    /// Admission gate
    pub gate: AdmissionGate,
    /// Lifecycle manager, for in-flight tracking during shutdown
    pub lifecycle: Arc<LifecycleManager>,
}

/// Creates the webhook router.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate))
        .route(MUTATE_PATH, post(mutate))
        .layer(logging_layer())
        .with_state(state)
}

fn decode(review: PolicyReview) -> Result<AdmissionRequest<NetworkPolicy>, ServerError> {
    review
        .try_into()
        .map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
            ServerError::InvalidReview(e.to_string())
        })
}

async fn validate(
    State(state): State<WebhookState>,
    Json(review): Json<PolicyReview>,
) -> Result<ReviewResponse, ServerError> {
    let request = decode(review)?;
    let response = AdmissionResponse::from(&request);

    let Some(_guard) = state.lifecycle.track_request() else {
        warn!(name = %request.name, "Rejecting admission review during shutdown");
        return Ok(Json(
            response
                .deny("npgate is shutting down; retry the request")
                .into_review(),
        ));
    };

    let op = operation(&request.operation);
    let namespace = request.namespace.as_deref();
    let old = request
        .old_object
        .as_ref()
        .and_then(|p| policy_object(p, namespace, &request.name).ok());
    let new = match request.object.as_ref() {
        Some(p) => match policy_object(p, namespace, &request.name) {
            Ok(policy) => Some(policy),
            Err(err) if op.is_gated() => {
                warn!(name = %request.name, error = %err, "Unusable NetworkPolicy in review");
                return Ok(Json(response.deny(err.to_string()).into_review()));
            }
            Err(_) => None,
        },
        None => None,
    };

    let decision = state.gate.admit(op, old.as_ref(), new.as_ref()).await;
    let response = if decision.allowed {
        debug!(
            name = %request.name,
            namespace = namespace.unwrap_or_default(),
            operation = op.as_str(),
            reason = decision.reason.as_str(),
            "Admission allowed"
        );
        response
    } else {
        info!(
            name = %request.name,
            namespace = namespace.unwrap_or_default(),
            operation = op.as_str(),
            reason = decision.reason.as_str(),
            approval_request = decision.request_name.as_deref().unwrap_or_default(),
            "Admission denied"
        );
        response.deny(decision.message.unwrap_or_default())
    };
    Ok(Json(response.into_review()))
}

/// Nothing is defaulted; the hook exists so the webhook configuration can
/// register both paths.
async fn mutate(Json(review): Json<PolicyReview>) -> Result<ReviewResponse, ServerError> {
    let request = decode(review)?;
    debug!(
        name = %request.name,
        operation = operation(&request.operation).as_str(),
        "Defaulting NetworkPolicy"
    );
    Ok(Json(AdmissionResponse::from(&request).into_review()))
}
