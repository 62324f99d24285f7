//! A bounded-retry wrapper around [`MessageBus::send`], used by the Manager: per the spec,
//! bus errors are retried up to a budget before becoming fatal.

use backoff::{Backoff, BackoffConfig};
use maggma_bus::{BusError, MessageBus};
use serde_json::Value;
use std::ops::ControlFlow;

/// Send `payload` to `to`, retrying transient bus errors with exponential backoff up to
/// `budget` attempts before giving up and returning the last error.
pub(crate) async fn send_with_retry(
    bus: &dyn MessageBus,
    to: &str,
    payload: Value,
    budget: usize,
) -> Result<(), BusError> {
    let mut backoff = Backoff::new(&BackoffConfig::default());
    let mut attempt = 0usize;
    backoff
        .retry_with_backoff("distributed_bus_send", || {
            attempt += 1;
            let to = to.to_string();
            let payload = payload.clone();
            async move {
                match bus.send(&to, payload).await {
                    Ok(()) => ControlFlow::Break(Ok(())),
                    Err(err) if attempt >= budget.max(1) => ControlFlow::Break(Err(err)),
                    Err(err) => ControlFlow::Continue(err),
                }
            }
        })
        .await
        .expect("BackoffError is Infallible")
}
