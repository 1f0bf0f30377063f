// commands/dispatcher.rs
use super::{ValidationError, validate};
use crate::{
    broker::{Delivery, PublishError, Publisher},
    config::UpdatePolicy,
    devices::{BulbStateStore, Catalog},
    metrics,
    models::BulbId,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug)]
pub struct BulbOutcome {
    pub bulb: BulbId,
    pub result: Result<Delivery, PublishError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<BulbOutcome>,
}

impl DispatchReport {
    pub fn failed(&self) -> Vec<BulbId> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .map(|outcome| outcome.bulb)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }
}

/// Validates a control payload once, then publishes it to every target bulb and
/// records the new attributes according to the update policy.
///
/// A publish and the store update that follows it happen under one lock, so the
/// store records commands in the order they reached the broker.
pub struct Dispatcher {
    catalog: Arc<Catalog>,
    publisher: Arc<Publisher>,
    store: Arc<BulbStateStore>,
    policy: UpdatePolicy,
    order: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<Catalog>,
        publisher: Arc<Publisher>,
        store: Arc<BulbStateStore>,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            catalog,
            publisher,
            store,
            policy,
            order: Mutex::new(()),
        }
    }

    pub async fn dispatch(
        &self,
        targets: &[BulbId],
        raw: &Value,
    ) -> Result<DispatchReport, ValidationError> {
        let command = validate(raw)?;
        let mut report = DispatchReport::default();

        for &bulb in targets {
            let house = self.catalog.house_of(bulb);
            let order = self.order.lock().await;
            let result = self.publisher.publish(&command.envelope(bulb), house).await;

            let record = match &result {
                Ok(delivery) => {
                    metrics::record_published(delivery.house);
                    true
                }
                Err(err) => {
                    metrics::record_failure(err.reason());
                    warn!(bulb, error = %err, "Control instruction not delivered");
                    matches!(err, PublishError::Failed { .. }) && self.policy == UpdatePolicy::Optimistic
                }
            };
            if record {
                self.store.update(bulb, &command);
            }
            drop(order);

            report.outcomes.push(BulbOutcome { bulb, result });
        }

        info!(
            bulbs = targets.len(),
            failed = report.outcomes.iter().filter(|o| o.result.is_err()).count(),
            state = %command.state,
            brightness = command.brightness,
            "Dispatched control instruction"
        );
        Ok(report)
    }
}
