//! Basic and Digest authentication (RFC 2617) for RTSP requests.
//!
//! The server challenges with a 401 and a `WWW-Authenticate` header:
//!
//! ```text
//! WWW-Authenticate: Digest realm="GeoVision", nonce="b923b84614fc11c7"
//! ```
//!
//! Digest answers use MD5:
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:HA2)                           (no qop)
//! response = MD5(HA1:nonce:nc:cnonce:qop:HA2)             (qop=auth)
//! ```
//!
//! [`AuthContext`] keeps the last challenge so later requests can carry a
//! fresh `Authorization` header without waiting for another 401.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rand::RngExt;

/// Authentication scheme used for `Authorization` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    None,
    Basic,
    Digest,
}

/// Username/password pair, plus the realm once one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Realm the credentials apply to. Learned from the first challenge
    /// when not configured.
    pub domain: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
            domain: None,
        }
    }
}

/// A parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Scheme token as sent (`Digest`, `Basic`, ...).
    pub scheme: String,
    params: Vec<(String, String)>,
}

impl Challenge {
    /// Parse `Scheme k=v, k="quoted, value", ...`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.find(char::is_whitespace) {
            Some(pos) => (&header[..pos], &header[pos..]),
            None => (header, ""),
        };
        if scheme.is_empty() {
            return None;
        }
        Some(Challenge {
            scheme: scheme.to_string(),
            params: parse_params(rest),
        })
    }

    /// The scheme this client knows how to answer, if any.
    pub fn auth_scheme(&self) -> AuthScheme {
        if self.scheme.eq_ignore_ascii_case("digest") {
            AuthScheme::Digest
        } else if self.scheme.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else {
            AuthScheme::None
        }
    }

    /// Parameter value with quotes removed (names compare case-insensitively).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Split `k=v` pairs on commas outside of quotes.
fn parse_params(s: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    let mut push = |item: &str| {
        if let Some((k, v)) = item.split_once('=') {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            params.push((k.trim().to_string(), v.to_string()));
        }
    };

    for c in s.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                push(&current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push(&current);
    params
}

/// Cached Digest challenge, reused for pre-emptive `Authorization` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestState {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    /// Number of requests answered with the current nonce.
    pub nonce_count: u32,
}

impl DigestState {
    fn from_challenge(challenge: &Challenge, realm: String) -> Self {
        // Servers may offer "auth,auth-int"; only the body-less variant is
        // worth preferring.
        let qop = challenge.param("qop").map(|q| {
            if q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")) {
                "auth".to_string()
            } else {
                q.split(',').next().unwrap_or(q).trim().to_string()
            }
        });
        let nonce_count = challenge
            .param("nc")
            .and_then(|nc| u32::from_str_radix(nc, 16).ok())
            .unwrap_or(0);

        DigestState {
            realm,
            nonce: challenge.param("nonce").unwrap_or_default().to_string(),
            opaque: challenge.param("opaque").map(str::to_string),
            qop,
            algorithm: challenge.param("algorithm").map(str::to_string),
            nonce_count,
        }
    }
}

/// Per-client authentication state: the configured credentials, the scheme
/// in use, and the last Digest challenge.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    credentials: Option<Credentials>,
    scheme: AuthScheme,
    digest: Option<DigestState>,
}

impl AuthContext {
    pub fn new(credentials: Option<Credentials>, scheme: AuthScheme) -> Self {
        AuthContext {
            credentials,
            scheme,
            digest: None,
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn digest(&self) -> Option<&DigestState> {
        self.digest.as_ref()
    }

    /// Forget the cached challenge (on disconnect). Credentials stay.
    pub fn reset(&mut self) {
        self.digest = None;
    }

    /// `Authorization` value for a request sent before any challenge, if
    /// the scheme is already known.
    pub fn preemptive(&mut self, method: &str, uri: &str, body: Option<&str>) -> Option<String> {
        let creds = self.credentials.as_ref()?;
        match self.scheme {
            AuthScheme::None => None,
            AuthScheme::Basic => Some(basic_authorization(creds)),
            AuthScheme::Digest => {
                let digest = self.digest.as_mut()?;
                Some(digest_authorization(creds, digest, method, uri, body))
            }
        }
    }

    /// Answer a `WWW-Authenticate` challenge.
    ///
    /// Updates the scheme, realm and cached Digest parameters and returns the
    /// `Authorization` value to retry with, or `None` when there are no
    /// credentials or the scheme is unknown.
    pub fn answer(
        &mut self,
        www_authenticate: &str,
        method: &str,
        uri: &str,
        body: Option<&str>,
    ) -> Option<String> {
        let challenge = Challenge::parse(www_authenticate)?;
        let creds = self.credentials.as_mut()?;

        let scheme = challenge.auth_scheme();
        if scheme == AuthScheme::None {
            tracing::warn!(scheme = %challenge.scheme, "unsupported authentication scheme");
            return None;
        }

        if creds.domain.is_none()
            && let Some(realm) = challenge.param("realm")
        {
            creds.domain = Some(realm.to_string());
        }

        self.scheme = scheme;
        match scheme {
            AuthScheme::Basic => Some(basic_authorization(creds)),
            AuthScheme::Digest => {
                let realm = creds.domain.clone().unwrap_or_default();
                let digest = self
                    .digest
                    .insert(DigestState::from_challenge(&challenge, realm));
                Some(digest_authorization(creds, digest, method, uri, body))
            }
            AuthScheme::None => None,
        }
    }
}

/// `Basic base64(user:pass)`.
pub fn basic_authorization(creds: &Credentials) -> String {
    let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
    format!("Basic {}", token)
}

/// Compute a Digest `Authorization` header value and advance the nonce count.
pub fn digest_authorization(
    creds: &Credentials,
    state: &mut DigestState,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> String {
    let cnonce = format!("{:016x}", rand::rng().random::<u64>());

    let mut ha1 = md5_hex(&format!(
        "{}:{}:{}",
        creds.username, state.realm, creds.password
    ));
    if state
        .algorithm
        .as_deref()
        .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
    {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, state.nonce, cnonce));
    }

    let ha2 = match state.qop.as_deref() {
        Some(q) if q.eq_ignore_ascii_case("auth-int") => md5_hex(&format!(
            "{}:{}:{}",
            method,
            uri,
            md5_hex(body.unwrap_or_default())
        )),
        _ => md5_hex(&format!("{}:{}", method, uri)),
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        creds.username, state.realm, state.nonce, uri
    );

    let response = match state.qop.clone() {
        Some(qop) => {
            state.nonce_count = state.nonce_count.wrapping_add(1);
            let nc = format!("{:08x}", state.nonce_count);
            let response = md5_hex(&format!(
                "{}:{}:{}:{}:{}:{}",
                ha1, state.nonce, nc, cnonce, qop, ha2
            ));
            header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce));
            response
        }
        None => md5_hex(&format!("{}:{}:{}", ha1, state.nonce, ha2)),
    };

    header.push_str(&format!(", response=\"{}\"", response));
    if let Some(algorithm) = &state.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    if let Some(opaque) = &state.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    header
}

/// Lowercase hex MD5 of the input.
fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("Mufasa", "Circle Of Life")
    }

    #[test]
    fn md5_hex_known_values() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn challenge_params_with_quoted_commas() {
        let c = Challenge::parse(r#"Digest realm="a, b", nonce="n1", qop="auth,auth-int", stale=FALSE"#)
            .unwrap();
        assert_eq!(c.auth_scheme(), AuthScheme::Digest);
        assert_eq!(c.param("realm"), Some("a, b"));
        assert_eq!(c.param("NONCE"), Some("n1"));
        assert_eq!(c.param("qop"), Some("auth,auth-int"));
        assert_eq!(c.param("stale"), Some("FALSE"));
        assert_eq!(c.param("opaque"), None);
    }

    #[test]
    fn basic_header() {
        let c = Credentials::new("Aladdin", "open sesame");
        assert_eq!(basic_authorization(&c), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn digest_without_qop_matches_rfc2069_formula() {
        let mut state = DigestState {
            realm: "testrealm@host.com".to_string(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            opaque: None,
            qop: None,
            algorithm: None,
            nonce_count: 0,
        };
        let header = digest_authorization(&creds(), &mut state, "GET", "/dir/index.html", None);

        let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = md5_hex("GET:/dir/index.html");
        let expected = md5_hex(&format!("{}:{}:{}", ha1, state.nonce, ha2));
        assert!(header.starts_with("Digest username=\"Mufasa\""));
        assert!(header.contains(&format!("response=\"{}\"", expected)));
        assert!(!header.contains("qop="));
        assert_eq!(state.nonce_count, 0);
    }

    #[test]
    fn digest_with_qop_counts_nonces() {
        let mut ctx = AuthContext::new(Some(creds()), AuthScheme::None);
        let first = ctx
            .answer(
                r#"Digest realm="cam", nonce="abc", qop="auth", opaque="op""#,
                "DESCRIBE",
                "rtsp://cam/live",
                None,
            )
            .unwrap();
        assert!(first.contains("realm=\"cam\""));
        assert!(first.contains("nonce=\"abc\""));
        assert!(first.contains("nc=00000001"));
        assert!(first.contains("opaque=\"op\""));
        assert_eq!(ctx.scheme(), AuthScheme::Digest);
        assert_eq!(ctx.credentials().unwrap().domain.as_deref(), Some("cam"));

        let second = ctx.preemptive("SETUP", "rtsp://cam/live/track1", None).unwrap();
        assert!(second.contains("nc=00000002"));
        assert!(second.contains("uri=\"rtsp://cam/live/track1\""));
    }

    #[test]
    fn configured_domain_wins_over_challenge_realm() {
        let mut c = creds();
        c.domain = Some("configured".to_string());
        let mut ctx = AuthContext::new(Some(c), AuthScheme::None);
        let header = ctx
            .answer(r#"Digest realm="other", nonce="n""#, "OPTIONS", "*", None)
            .unwrap();
        assert!(header.contains("realm=\"configured\""));
    }

    #[test]
    fn no_answer_without_credentials_or_for_unknown_scheme() {
        let mut none = AuthContext::default();
        assert!(none.answer(r#"Basic realm="x""#, "OPTIONS", "*", None).is_none());

        let mut ctx = AuthContext::new(Some(creds()), AuthScheme::None);
        assert!(ctx.answer("Bearer realm=\"x\"", "OPTIONS", "*", None).is_none());
        assert!(ctx.preemptive("OPTIONS", "*", None).is_none());
    }
}
