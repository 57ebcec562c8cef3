//! JSON-RPC problem/trigger correlator.
//!
//! The native API splits the data the display needs across two calls:
//! `problem.get` returns active problem events keyed by a trigger object
//! id, and `trigger.get` returns trigger status plus host metadata for
//! those ids. This client issues both calls sequentially and joins the
//! results into alert records, honoring enablement rules:
//!
//! - a trigger whose own `status` marks it disabled contributes nothing;
//! - the first host whose `status` marks it *enabled* wins (not the first
//!   host in array order); a trigger with no enabled host contributes
//!   nothing;
//! - every problem matching the trigger id produces one record carrying
//!   the winning host name.
//!
//! All numeric-looking values arrive as JSON strings and are parsed as
//! such. A malformed or absent `result` in either response aborts the
//! whole correlation and yields an empty list; no partial results are
//! surfaced.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zabwatch_ingest::ZabbixJsonRpc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = ZabbixJsonRpc::builder()
//!         .endpoint("https://zabbix.example.com/api_jsonrpc.php")
//!         .token("abc123")
//!         .build();
//!
//!     for alert in api.get_alerts().await? {
//!         println!("{:?}: severity {}", alert.host, alert.severity);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use zabwatch_types::{AlertRecord, HostRef};

use crate::IngestError;

/// Client for the two-call JSON-RPC correlation.
#[derive(Debug, Clone)]
pub struct ZabbixJsonRpc {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

/// A JSON-RPC response envelope. Only the `result` member matters; its
/// absence aborts the correlation.
#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
}

/// One active problem event, extracted from the `problem.get` response.
/// Missing or non-string fields degrade to zero/false/empty defaults
/// rather than aborting the call.
#[derive(Debug, Clone, PartialEq)]
struct ProblemEvent {
    objectid: i64,
    clock: u64,
    severity: u8,
    suppressed: bool,
    description: String,
}

impl ZabbixJsonRpc {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ZabbixJsonRpcBuilder {
        ZabbixJsonRpcBuilder::default()
    }

    /// Fetch active problems, correlate them with trigger/host metadata,
    /// and return the joined alert list.
    pub async fn get_alerts(&self) -> Result<Vec<AlertRecord>, IngestError> {
        let problems_envelope = self.call(&problem_request()).await?;
        let problems = match extract_problems(&problems_envelope) {
            Some(problems) => problems,
            None => {
                warn!("problem.get response carried no result array; dropping cycle");
                return Ok(Vec::new());
            }
        };

        let object_ids: Vec<i64> = problems.iter().map(|p| p.objectid).collect();
        let triggers_envelope = self.call(&trigger_request(&object_ids)).await?;

        Ok(correlate(&problems, &triggers_envelope))
    }

    async fn call(&self, body: &Value) -> Result<RpcEnvelope, IngestError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IngestError::Auth("Invalid API token".to_string()));
        }

        if !response.status().is_success() {
            return Err(IngestError::Http(format!(
                "API returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IngestError::Parse(e.to_string()))
    }
}

/// Builder for [`ZabbixJsonRpc`].
#[derive(Debug, Default)]
pub struct ZabbixJsonRpcBuilder {
    endpoint: Option<String>,
    token: Option<String>,
    timeout: Option<Duration>,
}

impl ZabbixJsonRpcBuilder {
    /// Set the JSON-RPC endpoint (e.g. "https://zabbix.example.com/api_jsonrpc.php").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the static bearer token used for authentication.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-request timeout (default: 15 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> ZabbixJsonRpc {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(15));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        ZabbixJsonRpc {
            client,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| "http://localhost/api_jsonrpc.php".to_string()),
            token: self.token.unwrap_or_default(),
        }
    }
}

/// Body for the first call: disaster-severity problems only.
fn problem_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "problem.get",
        "params": {
            "output": ["eventid", "r_eventid", "objectid", "clock", "ns",
                       "severity", "suppressed", "name"],
            "source": 0,
            "object": 0,
            "recent": false,
            "severities": [5]
        },
        "id": 1
    })
}

/// Body for the second call: trigger status and host metadata, filtered to
/// exactly the object ids seen in the problem response.
fn trigger_request(object_ids: &[i64]) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "trigger.get",
        "params": {
            "output": ["triggerid", "status", "error", "suppressed", "flags", "value"],
            "selectHosts": ["hostid", "host", "status"],
            "triggerids": object_ids
        },
        "id": 2
    })
}

fn extract_problems(envelope: &RpcEnvelope) -> Option<Vec<ProblemEvent>> {
    let result = envelope.result.as_ref()?.as_array()?;
    let problems = result
        .iter()
        .map(|obj| ProblemEvent {
            objectid: int_field(obj, "objectid").unwrap_or(0),
            clock: int_field(obj, "clock").unwrap_or(0).max(0) as u64,
            severity: int_field(obj, "severity").unwrap_or(0).clamp(0, 0x7f) as u8,
            suppressed: int_field(obj, "suppressed").unwrap_or(0) != 0,
            description: str_field(obj, "name").unwrap_or_default(),
        })
        .collect();
    Some(problems)
}

/// Join triggers against the problem list.
///
/// Triggers are iterated in response order. The `start` index slides past
/// problems already matched at the front of the list: triggers tend to
/// arrive in roughly the order their problems were emitted, so the
/// unmatched region shrinks monotonically. That is an optimization only -
/// the scan always covers `start..len`, so arbitrary id order still joins
/// correctly.
fn correlate(problems: &[ProblemEvent], triggers: &RpcEnvelope) -> Vec<AlertRecord> {
    let mut alerts = Vec::new();

    let Some(result) = triggers.result.as_ref().and_then(Value::as_array) else {
        warn!("trigger.get response carried no result array; dropping cycle");
        return alerts;
    };

    let mut start = 0;
    for trigger in result {
        let triggerid = int_field(trigger, "triggerid").unwrap_or(-1);
        let disabled = int_field(trigger, "status").unwrap_or(0) != 0;
        if disabled {
            continue;
        }
        let Some(host) = first_enabled_host(trigger) else {
            continue;
        };
        for i in start..problems.len() {
            let problem = &problems[i];
            if problem.objectid != triggerid {
                continue;
            }
            let mut alert = AlertRecord::new(
                problem.clock,
                HostRef::Name(host.clone()),
                problem.severity,
                problem.suppressed,
            );
            if !problem.description.is_empty() {
                alert = alert.with_description(problem.description.clone());
            }
            alerts.push(alert);
            if i == start {
                start += 1;
            }
        }
    }

    alerts
}

/// First host in the trigger's host list whose status marks it enabled
/// (`status == "0"`). A trigger whose hosts are all disabled resolves to
/// no host at all.
fn first_enabled_host(trigger: &Value) -> Option<String> {
    let hosts = trigger.get("hosts")?.as_array()?;
    for host in hosts {
        let name = str_field(host, "host").unwrap_or_default();
        if int_field(host, "status") == Some(0) && !name.is_empty() {
            return Some(name);
        }
    }
    None
}

/// Numeric values are transmitted as JSON strings; anything else (absent,
/// native number, wrong type) reads as `None`.
fn int_field(obj: &Value, key: &str) -> Option<i64> {
    obj.get(key)?.as_str()?.parse().ok()
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    Some(obj.get(key)?.as_str()?.to_string())
}
