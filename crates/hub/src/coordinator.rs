//! Service coordinator (C11): fixed dependency-graph startup/shutdown and
//! health aggregation across the hub's components.
//!
//! Startup order is `database -> services -> sessions -> message-router`,
//! mirroring the dependency each later stage has on the ones before it
//! (sessions need the security/retry/cache services up, the message router
//! needs sessions to route chat traffic onto). Shutdown runs the reverse
//! order, giving each component a bounded window to stop cleanly before
//! the coordinator force-stops it and moves on — the same timeout-then-
//! proceed shape the application's own shutdown phases use.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn health_check(&self) -> Health;
}

pub struct ServiceCoordinator {
    components: Vec<Arc<dyn Component>>,
    stop_timeout: Duration,
}

impl ServiceCoordinator {
    /// Builds a coordinator over components already in dependency order
    /// (earliest-started first).
    pub fn new(components: Vec<Arc<dyn Component>>, stop_timeout: Duration) -> Self {
        Self {
            components,
            stop_timeout,
        }
    }

    pub async fn start_all(&self) -> anyhow::Result<()> {
        for component in &self.components {
            info!(component = component.name(), "starting component");
            component.start().await?;
        }
        Ok(())
    }

    /// Stops components in reverse dependency order. A component that
    /// exceeds `stop_timeout` is logged and skipped rather than blocking
    /// the remaining shutdown sequence.
    pub async fn stop_all(&self) {
        for component in self.components.iter().rev() {
            info!(component = component.name(), "stopping component");
            match tokio::time::timeout(self.stop_timeout, component.stop()).await {
                Ok(Ok(())) => info!(component = component.name(), "component stopped"),
                Ok(Err(e)) => error!(component = component.name(), error = %e, "component stop failed"),
                Err(_) => warn!(
                    component = component.name(),
                    "component stop timed out, forcing shutdown to proceed"
                ),
            }
        }
    }

    /// `unhealthy` if any component is unhealthy, `degraded` if any is
    /// degraded, else `healthy`.
    pub async fn health_check(&self) -> Health {
        let mut worst = Health::Healthy;
        for component in &self.components {
            match component.health_check().await {
                Health::Unhealthy => return Health::Unhealthy,
                Health::Degraded => worst = Health::Degraded,
                Health::Healthy => {}
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct RecordingComponent {
        name: String,
        health: Health,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Component for RecordingComponent {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self) -> anyhow::Result<()> {
            self.order.lock().await.push(format!("start:{}", self.name));
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.order.lock().await.push(format!("stop:{}", self.name));
            Ok(())
        }
        async fn health_check(&self) -> Health {
            self.health
        }
    }

    struct HangingComponent;

    #[async_trait]
    impl Component for HangingComponent {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
        async fn health_check(&self) -> Health {
            Health::Healthy
        }
    }

    #[tokio::test]
    async fn starts_forward_and_stops_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(RecordingComponent {
            name: "database".into(),
            health: Health::Healthy,
            order: order.clone(),
        });
        let b = Arc::new(RecordingComponent {
            name: "sessions".into(),
            health: Health::Healthy,
            order: order.clone(),
        });
        let coordinator = ServiceCoordinator::new(vec![a, b], Duration::from_secs(1));

        coordinator.start_all().await.unwrap();
        coordinator.stop_all().await;

        let recorded = order.lock().await.clone();
        assert_eq!(
            recorded,
            vec!["start:database", "start:sessions", "stop:sessions", "stop:database"]
        );
    }

    #[tokio::test]
    async fn health_is_unhealthy_if_any_component_unhealthy() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let healthy = Arc::new(RecordingComponent {
            name: "database".into(),
            health: Health::Healthy,
            order: order.clone(),
        });
        let unhealthy = Arc::new(RecordingComponent {
            name: "sessions".into(),
            health: Health::Unhealthy,
            order,
        });
        let coordinator = ServiceCoordinator::new(vec![healthy, unhealthy], Duration::from_secs(1));
        assert_eq!(coordinator.health_check().await, Health::Unhealthy);
    }

    #[tokio::test]
    async fn health_is_degraded_if_no_component_unhealthy_but_one_degraded() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let healthy = Arc::new(RecordingComponent {
            name: "database".into(),
            health: Health::Healthy,
            order: order.clone(),
        });
        let degraded = Arc::new(RecordingComponent {
            name: "sessions".into(),
            health: Health::Degraded,
            order,
        });
        let coordinator = ServiceCoordinator::new(vec![healthy, degraded], Duration::from_secs(1));
        assert_eq!(coordinator.health_check().await, Health::Degraded);
    }

    #[tokio::test]
    async fn a_hanging_component_is_force_stopped_after_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingAfterHang {
            calls: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl Component for CountingAfterHang {
            fn name(&self) -> &str {
                "after-hang"
            }
            async fn start(&self) -> anyhow::Result<()> {
                Ok(())
            }
            async fn stop(&self) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn health_check(&self) -> Health {
                Health::Healthy
            }
        }

        let hanging = Arc::new(HangingComponent);
        let after = Arc::new(CountingAfterHang { calls: calls.clone() });
        let coordinator = ServiceCoordinator::new(vec![after.clone(), hanging], Duration::from_millis(50));

        let started = std::time::Instant::now();
        coordinator.stop_all().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
