use crate::sd::config::{AuthConfig, AuthMode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Credential check behind the HTTP Basic gate.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, user: &str, password: &str) -> bool;

    /// `false` lets every request through without asking for credentials.
    fn requires_credentials(&self) -> bool {
        true
    }
}

pub fn provider_from_config(cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    match cfg.mode {
        AuthMode::Basic => Ok(Arc::new(PasswordList::parse(&cfg.users)?)),
        AuthMode::Pam => pam_provider(cfg),
        AuthMode::None => Ok(Arc::new(NoAuth)),
    }
}

#[cfg(feature = "pam")]
fn pam_provider(cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    Ok(Arc::new(PamAuth::new(&cfg.pam_service, &cfg.users)))
}

#[cfg(not(feature = "pam"))]
fn pam_provider(_cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    anyhow::bail!("auth.mode is pam but sysdweb was built without the `pam` feature")
}

/// Accepts everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn authenticate(&self, _user: &str, _password: &str) -> bool {
        true
    }

    fn requires_credentials(&self) -> bool {
        false
    }
}

/// `user:secret` pairs from the config. A secret starting with `$2a$`, `$2b$` or `$2y$` is a
/// bcrypt hash; anything else is compared as plain text.
pub struct PasswordList {
    users: HashMap<String, Secret>,
    cache: Mutex<AuthCache>,
}

enum Secret {
    Plain(String),
    Bcrypt(String),
}

impl PasswordList {
    pub fn parse(entries: &[String]) -> anyhow::Result<Self> {
        let mut users = HashMap::new();
        for entry in entries {
            let t = entry.trim();
            if t.is_empty() {
                continue;
            }
            let (user, secret) = t
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid auth.users entry (missing ':')"))?;
            let user = user.trim();
            anyhow::ensure!(!user.is_empty(), "invalid auth.users entry (empty user name)");
            anyhow::ensure!(!secret.is_empty(), "invalid auth.users entry for {user:?} (empty password)");
            let secret = if ["$2a$", "$2b$", "$2y$"].iter().any(|p| secret.starts_with(p)) {
                // htpasswd -B emits $2y$; normalize once so we don't allocate per request.
                Secret::Bcrypt(secret.replace("$2y$", "$2b$"))
            } else {
                Secret::Plain(secret.to_string())
            };
            users.insert(user.to_string(), secret);
        }
        anyhow::ensure!(!users.is_empty(), "no users configured for basic auth");
        Ok(Self {
            users,
            cache: Mutex::new(AuthCache::new()),
        })
    }
}

impl AuthProvider for PasswordList {
    fn authenticate(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            None => false,
            Some(Secret::Plain(expected)) => expected == password,
            Some(Secret::Bcrypt(hash)) => {
                if let Ok(c) = self.cache.lock() {
                    if c.is_cached_ok(user, hash, password) {
                        return true;
                    }
                }
                if !bcrypt::verify(password, hash).unwrap_or(false) {
                    return false;
                }
                if let Ok(mut c) = self.cache.lock() {
                    c.put_ok(user.to_string(), hash.clone(), password.to_string());
                }
                true
            }
        }
    }
}

/// Successful bcrypt verifications, one per user, so each request does not pay the hash cost.
/// Failures are never cached.
struct AuthCache {
    entries: HashMap<String, (String /* hash */, String /* pass */)>,
    order: VecDeque<String>,
}

impl AuthCache {
    const MAX_ENTRIES: usize = 256;

    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn is_cached_ok(&self, user: &str, hash: &str, pass: &str) -> bool {
        matches!(self.entries.get(user), Some((h, p)) if h == hash && p == pass)
    }

    fn put_ok(&mut self, user: String, hash: String, pass: String) {
        if !self.entries.contains_key(&user) {
            self.order.push_back(user.clone());
        }
        self.entries.insert(user, (hash, pass));
        while self.entries.len() > Self::MAX_ENTRIES {
            let Some(k) = self.order.pop_front() else { break };
            self.entries.remove(&k);
        }
    }
}

/// PAM login check. When `allowed` is non-empty, users outside it are refused before PAM runs.
#[cfg(feature = "pam")]
pub struct PamAuth {
    service: String,
    allowed: HashSet<String>,
}

#[cfg(feature = "pam")]
impl PamAuth {
    pub fn new(service: &str, allowed: &[String]) -> Self {
        Self {
            service: service.to_string(),
            allowed: allowed_users(allowed),
        }
    }
}

#[cfg(feature = "pam")]
impl AuthProvider for PamAuth {
    fn authenticate(&self, user: &str, password: &str) -> bool {
        if !self.allowed.is_empty() && !self.allowed.contains(user) {
            return false;
        }
        let mut auth = match pam::Authenticator::with_password(&self.service) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(component = "auth", service = %self.service, error = %e, "pam init failed");
                return false;
            }
        };
        auth.get_handler().set_credentials(user, password);
        auth.authenticate().is_ok()
    }
}

/// User names from `auth.users`; `user:...` entries contribute their user part.
pub fn allowed_users(entries: &[String]) -> HashSet<String> {
    entries
        .iter()
        .map(|e| e.split_once(':').map_or(e.as_str(), |(u, _)| u).trim().to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Split an `Authorization: Basic ...` header value into user and password.
pub fn parse_basic_header(value: &str) -> Result<(String, String), &'static str> {
    let s = value.trim();
    let Some(b64) = s.strip_prefix("Basic ").or_else(|| s.strip_prefix("basic ")) else {
        return Err("expected Basic authorization");
    };
    let decoded = BASE64
        .decode(b64.trim().as_bytes())
        .map_err(|_| "invalid base64 in Authorization")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "invalid utf8 in Authorization")?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or("invalid basic auth payload")?;
    Ok((user.to_string(), pass.to_string()))
}
