//! Optional event publishing over NATS.

use serde::Serialize;

use crate::AppState;

/// Publish a JSON event when a NATS client is configured. Failures are logged
/// and swallowed; eventing never fails a request.
pub async fn publish<T: Serialize>(state: &AppState, subject: &str, event: &T) {
    let Some(nats) = &state.nats else { return };
    let payload = match serde_json::to_vec(event) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(subject, error = %e, "event serialization failed");
            return;
        }
    };
    if let Err(e) = nats.publish(subject.to_string(), payload.into()).await {
        tracing::warn!(subject, error = %e, "event publish failed");
    }
}
