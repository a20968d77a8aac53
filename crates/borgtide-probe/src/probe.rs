//! `EnvironmentProbe`: evaluates every configured environment at one point in time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use borgtide_core::EnvironmentSpec;

use crate::{
    environment::Environment,
    error::Result,
    set::EnvironmentSet,
    signals::NetworkSignals,
};

/// Cheap to clone; the environment list and signal source are shared.
#[derive(Clone)]
pub struct EnvironmentProbe {
    environments: Arc<[Environment]>,
    signals: Arc<dyn NetworkSignals>,
}

impl EnvironmentProbe {
    pub fn new(environments: Vec<Environment>, signals: Arc<dyn NetworkSignals>) -> Self {
        Self {
            environments: environments.into(),
            signals,
        }
    }

    /// Compile `specs`, skipping (and logging) any with an invalid pattern.
    pub fn from_specs(specs: &[EnvironmentSpec], signals: Arc<dyn NetworkSignals>) -> Self {
        let mut environments = Vec::with_capacity(specs.len());
        for spec in specs {
            match Environment::compile(spec) {
                Ok(env) => {
                    info!(environment = %spec.name, "registered environment");
                    environments.push(env);
                }
                Err(e) => warn!(environment = %spec.name, "environment excluded: {e}"),
            }
        }
        Self::new(environments, signals)
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    /// Evaluate every environment against one consistent view of the network.
    ///
    /// Each signal is queried at most once per refresh, however many
    /// environments consult it. An `Err` means the probing machinery failed;
    /// environments that simply do not match are left out of the set.
    pub async fn refresh(&self) -> Result<EnvironmentSet> {
        let snapshot = SignalSnapshot::new(self.signals.as_ref());
        let mut valid = Vec::new();
        for env in self.environments.iter() {
            if env.evaluate(&snapshot).await? {
                valid.push(env.name().to_string());
            }
        }
        let set = EnvironmentSet::new(valid);
        info!(valid = %set, "valid environments updated");
        Ok(set)
    }

    /// Single reachability probe for a job's target host.
    pub async fn is_reachable(&self, host: &str) -> Result<bool> {
        self.signals.is_reachable(host).await
    }
}

/// Memoizes signals for the duration of one refresh.
struct SignalSnapshot<'a> {
    inner: &'a dyn NetworkSignals,
    wireless: OnceCell<Option<String>>,
    local: OnceCell<Vec<String>>,
    global: OnceCell<Option<String>>,
    reachable: Mutex<HashMap<String, bool>>,
}

impl<'a> SignalSnapshot<'a> {
    fn new(inner: &'a dyn NetworkSignals) -> Self {
        Self {
            inner,
            wireless: OnceCell::new(),
            local: OnceCell::new(),
            global: OnceCell::new(),
            reachable: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NetworkSignals for SignalSnapshot<'_> {
    async fn wireless_identity(&self) -> Result<Option<String>> {
        self.wireless
            .get_or_try_init(|| self.inner.wireless_identity())
            .await
            .cloned()
    }

    async fn local_addresses(&self) -> Result<Vec<String>> {
        self.local
            .get_or_try_init(|| self.inner.local_addresses())
            .await
            .cloned()
    }

    async fn global_address(&self) -> Result<Option<String>> {
        self.global
            .get_or_try_init(|| self.inner.global_address())
            .await
            .cloned()
    }

    async fn is_reachable(&self, host: &str) -> Result<bool> {
        let cached = self
            .reachable
            .lock()
            .expect("reachability cache poisoned")
            .get(host)
            .copied();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let answered = self.inner.is_reachable(host).await?;
        self.reachable
            .lock()
            .expect("reachability cache poisoned")
            .insert(host.to_string(), answered);
        Ok(answered)
    }
}
