//! Signature base construction.
//!
//! The signature base is the string that is actually signed. The verifier rebuilds it
//! from the inbound request URL, so the values here never come from client-supplied
//! body fields.

use std::collections::BTreeMap;

use url::Url;

use crate::{
    error::{BridgeError, Result},
    tap::params::{COMPONENT_AUTHORITY, COMPONENT_PATH, SIGNATURE_LABEL},
};

/// Values of the covered components for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// `host[:port]`, the port only when it differs from the scheme default.
    pub authority: Option<String>,
    /// Path including `?query` when the query is non-empty.
    pub path: Option<String>,
    /// Values for extension components, keyed by component name.
    pub extra: BTreeMap<String, String>,
}

impl RequestContext {
    /// Context with the two mandatory components set.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn new(authority: impl Into<String>, path: impl Into<String>) -> Self {
        Self { authority: Some(authority.into()), path: Some(path.into()), extra: BTreeMap::new() }
    }

    /// Derives authority and path from an absolute request URL.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::IncompleteContext`] if the URL cannot be parsed or has no host.
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::tap::RequestContext;
    ///
    /// let ctx = RequestContext::from_url("https://api.example.com:8443/mcp/execute?x=1")?;
    /// assert_eq!(ctx.authority.as_deref(), Some("api.example.com:8443"));
    /// assert_eq!(ctx.path.as_deref(), Some("/mcp/execute?x=1"));
    /// # Ok::<(), tap_x402::BridgeError>(())
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|_| BridgeError::IncompleteContext(COMPONENT_AUTHORITY))?;
        let host = parsed.host_str().ok_or(BridgeError::IncompleteContext(COMPONENT_AUTHORITY))?;

        // `Url::port` is already `None` for the scheme's default port.
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let path = match parsed.query() {
            Some(query) if !query.is_empty() => format!("{}?{query}", parsed.path()),
            _ => parsed.path().to_owned(),
        };

        Ok(Self::new(authority, path))
    }

    /// Adds a value for an extension component.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_component(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    fn value_of(&self, component: &str) -> Option<&str> {
        match component {
            COMPONENT_AUTHORITY => self.authority.as_deref(),
            COMPONENT_PATH => self.path.as_deref(),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

/// Builds the signature base for `components` over `ctx`.
///
/// One `"<component>": <value>` line is emitted per requested component, followed by the
/// `"@signature-params"` line carrying `signature_input` with its `sig2=` label removed.
/// Extension components without a value in `ctx` are skipped.
///
/// # Errors
///
/// Returns [`BridgeError::IncompleteContext`] if `ctx` lacks `@authority` or `@path`.
///
/// # Examples
///
/// ```
/// use tap_x402::tap::{RequestContext, build_signature_base};
///
/// let ctx = RequestContext::new("api.example.com", "/mcp");
/// let base = build_signature_base(
///     &["@authority", "@path"],
///     &ctx,
///     r#"sig2=("@authority" "@path"); created=1"#,
/// )?;
/// assert_eq!(
///     base,
///     "\"@authority\": api.example.com\n\"@path\": /mcp\n\"@signature-params\": (\"@authority\" \"@path\"); created=1"
/// );
/// # Ok::<(), tap_x402::BridgeError>(())
/// ```
pub fn build_signature_base<S: AsRef<str>>(
    components: &[S],
    ctx: &RequestContext,
    signature_input: &str,
) -> Result<String> {
    if ctx.authority.as_deref().is_none_or(str::is_empty) {
        return Err(BridgeError::IncompleteContext(COMPONENT_AUTHORITY));
    }
    if ctx.path.as_deref().is_none_or(str::is_empty) {
        return Err(BridgeError::IncompleteContext(COMPONENT_PATH));
    }

    let mut lines: Vec<String> = Vec::with_capacity(components.len() + 1);
    for component in components {
        let name = component.as_ref();
        if let Some(value) = ctx.value_of(name) {
            lines.push(format!("\"{name}\": {value}"));
        }
    }

    let header = signature_input.trim();
    let params = header
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|rest| rest.strip_prefix('='))
        .unwrap_or(header);
    lines.push(format!("\"@signature-params\": {params}"));

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"sig2=("@authority" "@path"); created=1; nonce="n""#;

    #[test]
    fn test_from_url_drops_default_port() {
        let ctx = RequestContext::from_url("https://api.example.com:443/mcp/execute").unwrap();
        assert_eq!(ctx.authority.as_deref(), Some("api.example.com"));
        assert_eq!(ctx.path.as_deref(), Some("/mcp/execute"));
    }

    #[test]
    fn test_from_url_keeps_query() {
        let ctx = RequestContext::from_url("http://localhost:3000/tools?name=a&b=2").unwrap();
        assert_eq!(ctx.authority.as_deref(), Some("localhost:3000"));
        assert_eq!(ctx.path.as_deref(), Some("/tools?name=a&b=2"));
    }

    #[test]
    fn test_from_url_empty_query_ignored() {
        let ctx = RequestContext::from_url("https://api.example.com/mcp?").unwrap();
        assert_eq!(ctx.path.as_deref(), Some("/mcp"));
    }

    #[test]
    fn test_from_url_rejects_relative() {
        assert!(matches!(
            RequestContext::from_url("/mcp/execute"),
            Err(BridgeError::IncompleteContext(_))
        ));
    }

    #[test]
    fn test_base_layout() {
        let ctx = RequestContext::new("api.example.com", "/mcp/execute");
        let base = build_signature_base(&["@authority", "@path"], &ctx, HEADER).unwrap();
        let lines: Vec<&str> = base.lines().collect();
        assert_eq!(lines, [
            "\"@authority\": api.example.com",
            "\"@path\": /mcp/execute",
            "\"@signature-params\": (\"@authority\" \"@path\"); created=1; nonce=\"n\"",
        ]);
    }

    #[test]
    fn test_unresolvable_extension_component_is_omitted() {
        let ctx = RequestContext::new("a.example", "/p");
        let base =
            build_signature_base(&["@authority", "content-type", "@path"], &ctx, HEADER).unwrap();
        assert!(!base.contains("content-type"));
        assert_eq!(base.lines().count(), 3);
    }

    #[test]
    fn test_resolvable_extension_component_is_emitted_in_order() {
        let ctx = RequestContext::new("a.example", "/p").with_component("x-job", "42");
        let base = build_signature_base(&["x-job", "@authority", "@path"], &ctx, HEADER).unwrap();
        assert!(base.starts_with("\"x-job\": 42\n\"@authority\": a.example\n"));
    }

    #[test]
    fn test_missing_authority_or_path_fails() {
        let no_path = RequestContext { path: None, ..RequestContext::new("a.example", "/p") };
        assert!(matches!(
            build_signature_base(&["@authority", "@path"], &no_path, HEADER),
            Err(BridgeError::IncompleteContext("@path"))
        ));

        let no_authority = RequestContext { authority: None, ..RequestContext::new("a", "/p") };
        assert!(matches!(
            build_signature_base(&["@authority", "@path"], &no_authority, HEADER),
            Err(BridgeError::IncompleteContext("@authority"))
        ));
    }
}
