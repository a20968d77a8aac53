use regex::Regex;
use tracing::debug;

use borgtide_core::EnvironmentSpec;

use crate::{
    error::{ProbeError, Result},
    signals::NetworkSignals,
};

/// A regular expression that must match the whole candidate string.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(raw: &str) -> std::result::Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{raw})$"))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// A named network context, compiled from its [`EnvironmentSpec`].
#[derive(Debug, Clone)]
pub struct Environment {
    name: String,
    ssid: Pattern,
    local_ip: Pattern,
    global_ip: Option<Pattern>,
    required_hosts: Vec<String>,
    allow_wifi: bool,
    allow_other: bool,
}

impl Environment {
    pub fn compile(spec: &EnvironmentSpec) -> Result<Self> {
        let pattern = |field: &'static str, raw: &str| {
            Pattern::new(raw).map_err(|source| ProbeError::Pattern {
                environment: spec.name.clone(),
                field,
                source,
            })
        };

        Ok(Self {
            name: spec.name.clone(),
            ssid: pattern("match_ssid", &spec.ssid_pattern)?,
            local_ip: pattern("match_ip_address", &spec.local_ip_pattern)?,
            global_ip: spec
                .global_ip_pattern
                .as_deref()
                .map(|raw| pattern("match_global_ip", raw))
                .transpose()?,
            required_hosts: spec.required_hosts.clone(),
            allow_wifi: spec.allow_wifi,
            allow_other: spec.allow_other,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_hosts(&self) -> &[String] {
        &self.required_hosts
    }

    /// On a matching wifi when wifi is allowed, or off wifi when other links are.
    pub fn wireless_gate(&self, ssid: Option<&str>) -> bool {
        match ssid {
            Some(ssid) => self.allow_wifi && self.ssid.matches(ssid),
            None => self.allow_other,
        }
    }

    pub fn local_gate(&self, addresses: &[String]) -> bool {
        addresses.iter().any(|a| self.local_ip.matches(a))
    }

    /// Passes trivially when no global pattern is configured.
    pub fn global_gate(&self, address: Option<&str>) -> bool {
        match &self.global_ip {
            None => true,
            Some(pattern) => address.is_some_and(|a| pattern.matches(a)),
        }
    }

    pub fn needs_global_address(&self) -> bool {
        self.global_ip.is_some()
    }

    /// Run the gates in order, cheapest first, stopping at the first failure.
    pub async fn evaluate(&self, signals: &dyn NetworkSignals) -> Result<bool> {
        debug!(environment = %self.name, "running environment check");

        let ssid = signals.wireless_identity().await?;
        if !self.wireless_gate(ssid.as_deref()) {
            debug!(environment = %self.name, ssid = ?ssid, "wireless gate failed");
            return Ok(false);
        }

        let addresses = signals.local_addresses().await?;
        if !self.local_gate(&addresses) {
            debug!(
                environment = %self.name,
                pattern = %self.local_ip.as_str(),
                addresses = ?addresses,
                "no local address matched"
            );
            return Ok(false);
        }

        if self.needs_global_address() {
            let global = signals.global_address().await?;
            if !self.global_gate(global.as_deref()) {
                debug!(environment = %self.name, global = ?global, "global address gate failed");
                return Ok(false);
            }
        }

        for host in &self.required_hosts {
            if !signals.is_reachable(host).await? {
                debug!(environment = %self.name, %host, "required host did not answer");
                return Ok(false);
            }
        }

        debug!(environment = %self.name, "requirements satisfied");
        Ok(true)
    }
}
