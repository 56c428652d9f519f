//! Commitment injection into MCP tool calls.
//!
//! Paid requests reach business logic as JSON-RPC 2.0 `tools/call` bodies:
//!
//! ```json
//! {"jsonrpc": "2.0", "id": 1, "method": "tools/call",
//!  "params": {"name": "sentinel.create_job", "arguments": {"...": "..."}}}
//! ```
//!
//! Before forwarding, the gateway adds `paymentCommitment` and `tapCommitment` to
//! `params.arguments`. Values the caller already supplied are never overwritten, so
//! injection is idempotent.

use serde_json::{Map, Value};
use tracing::debug;

/// JSON-RPC method of an MCP tool invocation.
pub const TOOLS_CALL: &str = "tools/call";

/// Argument key for the payment commitment.
pub const PAYMENT_COMMITMENT_KEY: &str = "paymentCommitment";

/// Argument key for the TAP commitment.
pub const TAP_COMMITMENT_KEY: &str = "tapCommitment";

/// Job tools that carry commitments by default.
pub const JOB_TOOLS: &[&str] = &["sentinel.create_job", "sentinel.checkpoint", "sentinel.settle"];

/// Commitments available for injection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commitments {
    /// Hash of the settled payment receipt.
    pub payment: Option<String>,
    /// Hash of the verified TAP header pair.
    pub tap: Option<String>,
}

impl Commitments {
    /// Returns `true` if there is nothing to inject.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.payment.is_none() && self.tap.is_none()
    }
}

/// Name of the tool a `tools/call` body invokes.
#[must_use]
pub fn tool_name(body: &Value) -> Option<&str> {
    if body.get("method").and_then(Value::as_str) != Some(TOOLS_CALL) {
        return None;
    }
    body.pointer("/params/name").and_then(Value::as_str)
}

/// Inserts the commitments into `params.arguments` of a `tools/call` body.
///
/// A key is filled only when it is absent, `null` or an empty string. Bodies with any
/// other method, or whose `params`/`arguments` are not objects, are left untouched.
/// Returns `true` if the body changed.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tap_x402::mcp::{Commitments, ensure_commitments};
///
/// let mut body = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
///                       "params": {"name": "t", "arguments": {"tapCommitment": "mine"}}});
/// let commitments = Commitments { payment: Some("p".into()), tap: Some("t".into()) };
///
/// assert!(ensure_commitments(&mut body, &commitments));
/// assert_eq!(body["params"]["arguments"]["paymentCommitment"], "p");
/// assert_eq!(body["params"]["arguments"]["tapCommitment"], "mine");
/// assert!(!ensure_commitments(&mut body, &commitments));
/// ```
pub fn ensure_commitments(body: &mut Value, commitments: &Commitments) -> bool {
    if commitments.is_empty() || body.get("method").and_then(Value::as_str) != Some(TOOLS_CALL) {
        return false;
    }
    let Some(arguments) = arguments_mut(body) else {
        return false;
    };

    let mut changed = false;
    for (key, value) in [
        (PAYMENT_COMMITMENT_KEY, commitments.payment.as_deref()),
        (TAP_COMMITMENT_KEY, commitments.tap.as_deref()),
    ] {
        let Some(value) = value else { continue };
        if is_unset(arguments.get(key)) {
            arguments.insert(key.to_owned(), Value::String(value.to_owned()));
            changed = true;
        }
    }
    changed
}

/// [`ensure_commitments`] restricted to `tools/call` bodies whose tool name is in
/// `tools`.
pub fn inject_for_tools(body: &mut Value, tools: &[&str], commitments: &Commitments) -> bool {
    let Some(name) = tool_name(body) else {
        return false;
    };
    if !tools.contains(&name) {
        debug!(tool = name, "tool not eligible for commitments");
        return false;
    }
    ensure_commitments(body, commitments)
}

fn arguments_mut(body: &mut Value) -> Option<&mut Map<String, Value>> {
    let root = body.as_object_mut()?;
    let params = root.entry("params").or_insert_with(|| Value::Object(Map::new()));
    if params.is_null() {
        *params = Value::Object(Map::new());
    }
    let arguments = params.as_object_mut()?.entry("arguments").or_insert(Value::Null);
    if arguments.is_null() {
        *arguments = Value::Object(Map::new());
    }
    arguments.as_object_mut()
}

fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}
