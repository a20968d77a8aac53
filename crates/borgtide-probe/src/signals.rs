//! Live network signals, queried with hard timeouts.
//!
//! Every query is bounded: a tool that hangs or a network that never answers
//! yields "no signal" rather than stalling the refresh. Only a query that
//! cannot run at all (binary missing, pipe failure) is reported as an error.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::{ProbeError, Result},
    parse,
};

/// `nmcli` gets a tighter bound than the other probes; it is polled every cycle.
const WIRELESS_TIMEOUT: Duration = Duration::from_millis(800);
const PING: &str = "ping";
/// Extra time on top of ping's own `-W` for name resolution.
const PING_SLACK: Duration = Duration::from_secs(1);

/// Read-only view of the machine's network state.
#[async_trait]
pub trait NetworkSignals: Send + Sync {
    /// SSID of the active wireless connection, `None` when not on wifi.
    async fn wireless_identity(&self) -> Result<Option<String>>;

    /// Locally bound addresses, loopback excluded.
    async fn local_addresses(&self) -> Result<Vec<String>>;

    /// Externally visible address, `None` when it could not be determined.
    async fn global_address(&self) -> Result<Option<String>>;

    /// One reachability probe (a single ICMP echo).
    async fn is_reachable(&self, host: &str) -> Result<bool>;
}

/// [`NetworkSignals`] backed by `nmcli`, `ip`, `ping` and an HTTP lookup.
pub struct SystemSignals {
    timeout: Duration,
    public_ip_url: String,
    ping_program: String,
    http: reqwest::Client,
}

impl SystemSignals {
    pub fn new(timeout: Duration, public_ip_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::infrastructure("http", e))?;
        Ok(Self {
            timeout,
            public_ip_url: public_ip_url.into(),
            ping_program: PING.to_string(),
            http,
        })
    }

    /// Use another binary with `ping`'s command line and exit codes.
    pub fn with_ping_program(mut self, program: impl Into<String>) -> Self {
        self.ping_program = program.into();
        self
    }

    /// Run `program args…` and return its stdout, or `None` on timeout.
    async fn capture(
        &self,
        signal: &'static str,
        program: &str,
        args: &[&str],
        limit: Duration,
    ) -> Result<Option<String>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::infrastructure(signal, format!("{program}: {e}")))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Ok(Err(e)) => Err(ProbeError::infrastructure(signal, e)),
            Err(_elapsed) => {
                debug!(signal, program, "probe timed out, treating as no signal");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl NetworkSignals for SystemSignals {
    async fn wireless_identity(&self) -> Result<Option<String>> {
        let out = self
            .capture(
                "wireless",
                "nmcli",
                &["-t", "-f", "active,ssid", "dev", "wifi"],
                WIRELESS_TIMEOUT.min(self.timeout),
            )
            .await?;
        Ok(out.as_deref().and_then(parse::active_ssid))
    }

    async fn local_addresses(&self) -> Result<Vec<String>> {
        let out = self
            .capture("local-address", "ip", &["addr", "show"], self.timeout)
            .await?;
        Ok(out.as_deref().map(parse::local_addresses).unwrap_or_default())
    }

    async fn global_address(&self) -> Result<Option<String>> {
        // Being offline is a valid network state, so request failures are
        // "no signal" rather than infrastructure errors.
        let response = match self.http.get(&self.public_ip_url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(url = %self.public_ip_url, "public address lookup failed: {e}");
                return Ok(None);
            }
        };
        match response.text().await {
            Ok(body) => Ok(parse::global_address(&body)),
            Err(e) => {
                debug!(url = %self.public_ip_url, "public address body unreadable: {e}");
                Ok(None)
            }
        }
    }

    async fn is_reachable(&self, host: &str) -> Result<bool> {
        let wait_secs = self.timeout.as_secs().max(1).to_string();
        let status = Command::new(&self.ping_program)
            .args(["-c", "1", "-W", wait_secs.as_str(), host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        // ping enforces -W itself; the outer bound covers DNS stalls.
        let limit = self.timeout + PING_SLACK;
        match tokio::time::timeout(limit, status).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => Err(ProbeError::infrastructure(
                "reachability",
                format!("{}: {e}", self.ping_program),
            )),
            Err(_elapsed) => {
                debug!(host, "reachability probe timed out");
                Ok(false)
            }
        }
    }
}
