//! `Signature-Input` header codec.
//!
//! The TAP profile emits a single labelled signature, `sig2`, covering `@authority`
//! and `@path`:
//!
//! ```text
//! sig2=("@authority" "@path"); created=1700000000; expires=1700000300; keyId="k1"; alg="ed25519"; nonce="…"; tag="agent-auth"
//! ```
//!
//! Parsing is a small hand-written tokenizer over that grammar. Input is bounded by
//! [`MAX_SIGNATURE_INPUT_LEN`], unknown attributes are kept (and ignored by the
//! verifier), and any label other than `sig2` is rejected.

use std::{
    fmt::{self, Write as _},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{BridgeError, Result},
    tap::Algorithm,
};

/// Label of the single signature carried by TAP requests.
pub const SIGNATURE_LABEL: &str = "sig2";

/// Upper bound on the `Signature-Input` header length accepted by the parser.
pub const MAX_SIGNATURE_INPUT_LEN: usize = 4096;

/// Default signature lifetime in seconds.
pub const DEFAULT_TTL_SECS: u32 = 300;

/// Default `tag` attribute.
pub const DEFAULT_TAG: &str = "agent-auth";

/// Derived component for the request authority (host and non-default port).
pub const COMPONENT_AUTHORITY: &str = "@authority";

/// Derived component for the request path including the query string.
pub const COMPONENT_PATH: &str = "@path";

/// Number of random bytes in a generated nonce.
const NONCE_BYTES: usize = 12;

/// Structured-field integers carry at most 15 digits.
const MAX_INTEGER_DIGITS: usize = 15;

/// Parameters used to produce one TAP signature.
///
/// `expires` is derived as `created + ttl_secs` unless set explicitly.
/// A caller that supplies its own `nonce` is responsible for its uniqueness within the
/// replay window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningParameters {
    /// Request authority (`host[:port]`).
    pub authority: String,
    /// Request path including query string.
    pub path: String,
    /// Identifier the verifier uses to resolve the public key.
    pub key_id: String,
    /// Signature algorithm.
    pub algorithm: Algorithm,
    /// Lifetime used to derive `expires`.
    pub ttl_secs: u32,
    /// Interaction tag.
    pub tag: String,
    /// Replay-protection nonce.
    pub nonce: String,
    /// Creation time, unix seconds.
    pub created: u64,
    /// Explicit expiry, unix seconds. Overrides `created + ttl_secs` when set.
    pub expires: Option<u64>,
}

impl SigningParameters {
    /// Creates parameters stamped with the current time, the default TTL and tag,
    /// and a fresh random nonce.
    ///
    /// # Examples
    ///
    /// ```
    /// use tap_x402::tap::{Algorithm, SigningParameters};
    ///
    /// let params = SigningParameters::new("api.example.com", "/mcp/execute", "k1", Algorithm::Ed25519)
    ///     .with_ttl_secs(120);
    /// assert_eq!(params.expires_at(), params.created + 120);
    /// assert_eq!(params.nonce.len(), 24);
    /// ```
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn new(
        authority: impl Into<String>,
        path: impl Into<String>,
        key_id: impl Into<String>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            authority: authority.into(),
            path: path.into(),
            key_id: key_id.into(),
            algorithm,
            ttl_secs: DEFAULT_TTL_SECS,
            tag: DEFAULT_TAG.to_owned(),
            nonce: random_nonce(),
            created: unix_now_secs(),
            expires: None,
        }
    }

    /// Sets the lifetime used to derive `expires`.
    #[must_use]
    pub const fn with_ttl_secs(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Sets the interaction tag.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Replaces the generated nonce.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub const fn with_created(mut self, created: u64) -> Self {
        self.created = created;
        self
    }

    /// Sets an explicit expiry instead of `created + ttl_secs`.
    #[must_use]
    pub const fn with_expires(mut self, expires: u64) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Effective expiry in unix seconds.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.expires.unwrap_or_else(|| self.created.saturating_add(u64::from(self.ttl_secs)))
    }

    /// Structured form of the header these parameters produce.
    #[must_use]
    pub fn to_signature_input(&self) -> SignatureInput {
        SignatureInput {
            components: vec![COMPONENT_AUTHORITY.to_owned(), COMPONENT_PATH.to_owned()],
            attributes: vec![
                ("created".to_owned(), AttributeValue::Integer(saturating_i64(self.created))),
                (
                    "expires".to_owned(),
                    AttributeValue::Integer(saturating_i64(self.expires_at())),
                ),
                ("keyId".to_owned(), AttributeValue::String(self.key_id.clone())),
                ("alg".to_owned(), AttributeValue::String(self.algorithm.as_str().to_owned())),
                ("nonce".to_owned(), AttributeValue::String(self.nonce.clone())),
                ("tag".to_owned(), AttributeValue::String(self.tag.clone())),
            ],
        }
    }
}

/// Value of one `Signature-Input` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Bare integer, e.g. `created=1700000000`.
    Integer(i64),
    /// Quoted string, e.g. `keyId="k1"`.
    String(String),
    /// Bare token, e.g. `flag=on`. Tolerated for extension attributes.
    Token(String),
}

impl AttributeValue {
    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::String(_) | Self::Token(_) => None,
        }
    }

    /// Returns the textual value of a string or token.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Token(value) => Some(value),
            Self::Integer(_) => None,
        }
    }
}

/// Parsed `Signature-Input` header.
///
/// Component order and attribute order are preserved so that [`fmt::Display`]
/// reproduces a header equivalent to the one parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    /// Covered components, without quotes.
    pub components: Vec<String>,
    /// Attributes in header order.
    pub attributes: Vec<(String, AttributeValue)>,
}

impl SignatureInput {
    /// Looks up an attribute by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    /// `created` attribute.
    #[must_use]
    pub fn created(&self) -> Option<i64> {
        self.get("created").and_then(AttributeValue::as_integer)
    }

    /// `expires` attribute.
    #[must_use]
    pub fn expires(&self) -> Option<i64> {
        self.get("expires").and_then(AttributeValue::as_integer)
    }

    /// `keyId` attribute, falling back to the RFC 9421 spelling `keyid`.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.get("keyId").or_else(|| self.get("keyid")).and_then(AttributeValue::as_text)
    }

    /// `alg` attribute as written by the client.
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.get("alg").and_then(AttributeValue::as_text)
    }

    /// `nonce` attribute.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.get("nonce").and_then(AttributeValue::as_text)
    }

    /// `tag` attribute.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.get("tag").and_then(AttributeValue::as_text)
    }

    /// Returns `true` if `component` is covered by the signature.
    #[must_use]
    pub fn covers(&self, component: &str) -> bool {
        self.components.iter().any(|c| c == component)
    }
}

impl fmt::Display for SignatureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SIGNATURE_LABEL}=(")?;
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write_quoted(f, component)?;
        }
        f.write_char(')')?;
        for (key, value) in &self.attributes {
            write!(f, "; {key}=")?;
            match value {
                AttributeValue::Integer(n) => write!(f, "{n}")?,
                AttributeValue::String(s) => write_quoted(f, s)?,
                AttributeValue::Token(t) => f.write_str(t)?,
            }
        }
        Ok(())
    }
}

/// Formats the `Signature-Input` header for `params`.
///
/// Output is a pure function of `params`.
///
/// # Examples
///
/// ```
/// use tap_x402::tap::{Algorithm, SigningParameters, build_signature_input};
///
/// let params = SigningParameters::new("api.example.com", "/mcp", "k1", Algorithm::Ed25519)
///     .with_created(1_700_000_000)
///     .with_nonce("abc123");
///
/// assert_eq!(
///     build_signature_input(&params),
///     "sig2=(\"@authority\" \"@path\"); created=1700000000; expires=1700000300; \
///      keyId=\"k1\"; alg=\"ed25519\"; nonce=\"abc123\"; tag=\"agent-auth\""
/// );
/// ```
#[must_use]
pub fn build_signature_input(params: &SigningParameters) -> String {
    params.to_signature_input().to_string()
}

/// Parses a `Signature-Input` header.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedHeader`] if the header is too long, is not labelled
/// `sig2`, lacks the parenthesised component list, contains an unterminated or invalid
/// quoted string, or repeats an attribute.
///
/// # Examples
///
/// ```
/// use tap_x402::tap::parse_signature_input;
///
/// let parsed = parse_signature_input(
///     r#"sig2=("@authority" "@path"); created=10; keyId="k1"; alg="ed25519"; nonce="n""#,
/// )?;
/// assert_eq!(parsed.components, ["@authority", "@path"]);
/// assert_eq!(parsed.key_id(), Some("k1"));
/// assert_eq!(parsed.created(), Some(10));
/// # Ok::<(), tap_x402::BridgeError>(())
/// ```
pub fn parse_signature_input(header: &str) -> Result<SignatureInput> {
    let header = header.trim();
    if header.len() > MAX_SIGNATURE_INPUT_LEN {
        return Err(malformed(format!("header exceeds {MAX_SIGNATURE_INPUT_LEN} bytes")));
    }

    let rest = header
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|r| r.strip_prefix('='))
        .ok_or_else(|| malformed(format!("expected `{SIGNATURE_LABEL}=` label")))?;

    let mut cursor = Cursor::new(rest);
    let components = cursor.inner_list()?;

    let mut attributes: Vec<(String, AttributeValue)> = Vec::new();
    loop {
        cursor.skip_ws();
        if cursor.is_empty() {
            break;
        }
        cursor.expect(b';', "`;` between attributes")?;
        cursor.skip_ws();
        let key = cursor.key()?;
        cursor.expect(b'=', "`=` after attribute name")?;
        let value = cursor.value()?;
        if attributes.iter().any(|(k, _)| k == key) {
            return Err(malformed(format!("duplicate attribute `{key}`")));
        }
        attributes.push((key.to_owned(), value));
    }

    Ok(SignatureInput { components, attributes })
}

/// Generates a fresh nonce: 12 random bytes, hex-encoded.
#[must_use]
pub fn random_nonce() -> String {
    hex::encode(rand::random::<[u8; NONCE_BYTES]>())
}

/// Current unix time in seconds (zero if the clock is before the epoch).
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn malformed(message: String) -> BridgeError {
    BridgeError::MalformedHeader(message)
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in value.chars() {
        if c == '"' || c == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('"')
}

/// Byte cursor over the part of the header following `sig2=`.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, what: &str) -> Result<()> {
        if self.bump() == Some(byte) {
            Ok(())
        } else {
            Err(malformed(format!("expected {what} at offset {}", self.pos.saturating_sub(1))))
        }
    }

    /// `( "a" "b" ... )`
    fn inner_list(&mut self) -> Result<Vec<String>> {
        self.expect(b'(', "`(` opening the component list")?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(b'"') => items.push(self.quoted()?),
                Some(_) => return Err(malformed("component names must be quoted".to_owned())),
                None => return Err(malformed("unterminated component list".to_owned())),
            }
        }
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect(b'"', "`\"`")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(escaped @ (b'"' | b'\\')) => out.push(char::from(escaped)),
                    _ => return Err(malformed("invalid escape in quoted string".to_owned())),
                },
                Some(b @ 0x20..=0x7e) => out.push(char::from(b)),
                Some(_) => {
                    return Err(malformed("non-printable character in quoted string".to_owned()));
                }
                None => return Err(malformed("unterminated quoted string".to_owned())),
            }
        }
    }

    fn key(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'*'))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(malformed(format!("expected attribute name at offset {start}")));
        }
        Ok(&self.src[start..self.pos])
    }

    fn value(&mut self) -> Result<AttributeValue> {
        match self.peek() {
            Some(b'"') => self.quoted().map(AttributeValue::String),
            Some(b) if b.is_ascii_digit() || b == b'-' => self.integer().map(AttributeValue::Integer),
            Some(b) if b.is_ascii_alphabetic() || b == b'*' => Ok(AttributeValue::Token(self.token())),
            _ => Err(malformed(format!("expected attribute value at offset {}", self.pos))),
        }
    }

    fn integer(&mut self) -> Result<i64> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = self.pos - digits_start;
        if digits == 0 || digits > MAX_INTEGER_DIGITS {
            return Err(malformed(format!("invalid integer at offset {start}")));
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| malformed(format!("invalid integer at offset {start}")))
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~:/".contains(&b))
        {
            self.pos += 1;
        }
        self.src[start..self.pos].to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_params() -> SigningParameters {
        SigningParameters::new("api.example.com", "/mcp/execute", "k1", Algorithm::Ed25519)
            .with_created(1_700_000_000)
            .with_nonce("0011aabb")
    }

    #[test]
    fn test_build_signature_input_format() {
        let header = build_signature_input(&fixed_params());
        assert_eq!(
            header,
            "sig2=(\"@authority\" \"@path\"); created=1700000000; expires=1700000300; \
             keyId=\"k1\"; alg=\"ed25519\"; nonce=\"0011aabb\"; tag=\"agent-auth\""
        );
    }

    #[test]
    fn test_explicit_expires_overrides_ttl() {
        let params = fixed_params().with_ttl_secs(60).with_expires(1_700_000_010);
        assert_eq!(params.expires_at(), 1_700_000_010);
        assert!(build_signature_input(&params).contains("expires=1700000010"));
    }

    #[test]
    fn test_parse_recovers_parameters() {
        let params = fixed_params().with_tag("agent-payer-auth");
        let parsed = parse_signature_input(&build_signature_input(&params)).unwrap();

        assert_eq!(parsed.components, [COMPONENT_AUTHORITY, COMPONENT_PATH]);
        assert_eq!(parsed.created(), Some(1_700_000_000));
        assert_eq!(parsed.expires(), Some(1_700_000_300));
        assert_eq!(parsed.key_id(), Some("k1"));
        assert_eq!(parsed.algorithm(), Some("ed25519"));
        assert_eq!(parsed.nonce(), Some("0011aabb"));
        assert_eq!(parsed.tag(), Some("agent-payer-auth"));
    }

    #[test]
    fn test_display_round_trips_parsed_header() {
        let header = build_signature_input(&fixed_params());
        let parsed = parse_signature_input(&header).unwrap();
        assert_eq!(parsed.to_string(), header);
    }

    #[test]
    fn test_parse_tolerates_unknown_attributes_and_whitespace() {
        let parsed = parse_signature_input(
            "sig2=( \"@authority\"  \"@path\" \"content-type\" );created=5;x-ext=on;\tnonce=\"n\"; \
             weight=-3",
        )
        .unwrap();
        assert_eq!(parsed.components.len(), 3);
        assert_eq!(parsed.get("x-ext"), Some(&AttributeValue::Token("on".to_owned())));
        assert_eq!(parsed.get("weight"), Some(&AttributeValue::Integer(-3)));
        assert_eq!(parsed.nonce(), Some("n"));
        assert_eq!(parsed.key_id(), None);
    }

    #[test]
    fn test_parse_accepts_lowercase_keyid() {
        let parsed = parse_signature_input("sig2=(\"@path\"); keyid=\"legacy\"").unwrap();
        assert_eq!(parsed.key_id(), Some("legacy"));
    }

    #[test]
    fn test_quoted_values_escape_round_trip() {
        let params = fixed_params().with_tag(r#"a "quoted" \ tag"#);
        let header = build_signature_input(&params);
        assert!(header.contains(r#"tag="a \"quoted\" \\ tag""#));
        let parsed = parse_signature_input(&header).unwrap();
        assert_eq!(parsed.tag(), Some(r#"a "quoted" \ tag"#));
    }

    #[test]
    fn test_parse_rejects_other_labels() {
        let err = parse_signature_input("sig1=(\"@path\"); created=1").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedHeader(_)));
    }

    #[test]
    fn test_parse_rejects_missing_component_list() {
        assert!(parse_signature_input("sig2=created=1").is_err());
        assert!(parse_signature_input("sig2=(\"@path\"").is_err());
        assert!(parse_signature_input("sig2=(@path)").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_attributes() {
        assert!(parse_signature_input("sig2=(\"@path\"); nonce=\"open").is_err());
        assert!(parse_signature_input("sig2=(\"@path\"); =5").is_err());
        assert!(parse_signature_input("sig2=(\"@path\") created=5").is_err());
        assert!(parse_signature_input("sig2=(\"@path\"); created=1234567890123456").is_err());
        assert!(parse_signature_input("sig2=(\"@path\"); nonce=\"a\"; nonce=\"b\"").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_header() {
        let header = format!("sig2=(\"@path\"); nonce=\"{}\"", "a".repeat(MAX_SIGNATURE_INPUT_LEN));
        assert!(parse_signature_input(&header).is_err());
    }

    #[test]
    fn test_random_nonce_is_hex_and_unique() {
        let a = random_nonce();
        let b = random_nonce();
        assert_eq!(a.len(), NONCE_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
