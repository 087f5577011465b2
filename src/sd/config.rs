use crate::sd::registry::{ServiceConfig, ServiceRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct SysdwebConfig {
    /// Which systemd instance to talk to: the system manager or the invoking user's.
    pub scope: Scope,
    pub host: String,
    pub port: u16,
    /// Optional URL prefix the whole app is mounted under, e.g. `/sysdweb`.
    pub root: Option<String>,
    /// Directory holding `css/`, `fonts/`, `img/` and `js/`.
    pub static_dir: PathBuf,
    /// Default tracing filter; `RUST_LOG` wins when set.
    pub log_level: String,
    pub auth: AuthConfig,
    pub services: Vec<ServiceConfig>,
}

impl SysdwebConfig {
    pub fn registry(&self) -> anyhow::Result<ServiceRegistry> {
        ServiceRegistry::new(self.services.iter().cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `user:password` list from the config file.
    Basic,
    /// PAM, optionally restricted to the listed user names.
    Pam,
    /// No authentication at all.
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// `basic`: `user:password` (or `user:<bcrypt hash>`) entries. `pam`: allowed user names.
    pub users: Vec<String>,
    pub pam_service: String,
}

// -------- YAML file schema (strict) --------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    global: Option<GlobalConfigFile>,
    auth: AuthConfigFile,
    #[serde(default)]
    services: IndexMap<String, ServiceConfigFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct GlobalConfigFile {
    #[serde(default)]
    scope: Scope,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    static_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthConfigFile {
    mode: AuthMode,
    #[serde(default, deserialize_with = "deserialize_users")]
    users: Vec<String>,
    #[serde(default = "default_pam_service")]
    pam_service: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    unit: String,
    #[serde(default)]
    title: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8085
}
fn default_static_dir() -> PathBuf {
    "/usr/share/sysdweb/static".into()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_pam_service() -> String {
    "login".to_string()
}

/// Accept either a YAML list or a single comma-separated string (`"alice:pw, bob:pw"`).
fn deserialize_users<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let v = serde_yaml::Value::deserialize(deserializer)?;
    let raw: Vec<String> = match v {
        serde_yaml::Value::Null => vec![],
        serde_yaml::Value::String(s) => s.split(',').map(str::to_string).collect(),
        serde_yaml::Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                serde_yaml::Value::String(s) => Ok(s),
                other => Err(D::Error::custom(format!("auth.users entries must be strings, got {other:?}"))),
            })
            .collect::<Result<Vec<String>, D::Error>>()?,
        _ => {
            return Err(D::Error::custom(
                "auth.users must be a list or a comma-separated string",
            ))
        }
    };
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

pub fn load_config(config_path: &Path) -> anyhow::Result<SysdwebConfig> {
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", config_path.display()))?;
    let file_cfg: ConfigFile = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", config_path.display()))?;

    let mut cfg = SysdwebConfig {
        scope: Scope::System,
        host: default_host(),
        port: default_port(),
        root: None,
        static_dir: default_static_dir(),
        log_level: default_log_level(),
        auth: AuthConfig {
            mode: file_cfg.auth.mode,
            users: file_cfg.auth.users,
            pam_service: file_cfg.auth.pam_service,
        },
        services: Vec::with_capacity(file_cfg.services.len()),
    };

    if let Some(gl) = file_cfg.global {
        cfg.scope = gl.scope;
        cfg.host = gl.host.trim().to_string();
        cfg.port = gl.port;
        cfg.root = gl.root.map(|r| r.trim().to_string());
        if let Some(dir) = gl.static_dir {
            cfg.static_dir = dir;
        }
        cfg.log_level = gl.log_level;
    }
    anyhow::ensure!(!cfg.host.is_empty(), "global.host must not be empty");

    if let Some(root) = cfg.root.as_deref() {
        anyhow::ensure!(root.starts_with('/'), "global.root must start with '/': {root:?}");
        anyhow::ensure!(
            root.len() > 1 && !root.ends_with('/'),
            "global.root must not end with '/' (omit it to serve at /): {root:?}"
        );
        anyhow::ensure!(
            root.chars().all(|c| c.is_ascii_alphanumeric() || "/-_.~".contains(c)),
            "global.root may only contain letters, digits, '/', '-', '_', '.' and '~': {root:?}"
        );
    }

    match cfg.auth.mode {
        AuthMode::Basic => {
            anyhow::ensure!(
                !cfg.auth.users.is_empty(),
                "auth.mode is basic but auth.users is empty"
            );
            for entry in &cfg.auth.users {
                let (user, pass) = entry
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid auth.users entry (missing ':'): {:?}", redact(entry)))?;
                anyhow::ensure!(!user.trim().is_empty(), "invalid auth.users entry (empty user name)");
                anyhow::ensure!(!pass.is_empty(), "invalid auth.users entry for {:?} (empty password)", user.trim());
            }
        }
        AuthMode::Pam => {
            anyhow::ensure!(
                cfg!(feature = "pam"),
                "auth.mode is pam but sysdweb was built without the `pam` feature"
            );
            anyhow::ensure!(!cfg.auth.pam_service.trim().is_empty(), "auth.pam_service must not be empty");
        }
        AuthMode::None => {}
    }

    for (name, svc) in file_cfg.services {
        let title = svc
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| name.clone());
        cfg.services.push(ServiceConfig {
            name,
            unit: svc.unit.trim().to_string(),
            title,
        });
    }
    anyhow::ensure!(!cfg.services.is_empty(), "no services configured (services is empty)");
    // Runs the registry invariants now so a bad file fails at startup.
    cfg.registry()?;

    // Resolve relative paths against the config file directory.
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    if cfg.static_dir.is_relative() {
        cfg.static_dir = base.join(&cfg.static_dir);
    }

    Ok(cfg)
}

fn redact(entry: &str) -> String {
    match entry.split_once(':') {
        Some((user, _)) => format!("{user}:***"),
        None => entry.chars().take(1).chain("***".chars()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> anyhow::Result<SysdwebConfig> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysdweb.yaml");
        std::fs::write(&path, yaml).unwrap();
        load_config(&path)
    }

    #[test]
    fn test_full_config() {
        let cfg = load(
            r#"
global:
  scope: user
  host: 0.0.0.0
  port: 9000
  root: /sysdweb
  static_dir: static
  log_level: debug
auth:
  mode: basic
  users: ["alice:secret", "bob:hunter2"]
services:
  web:
    unit: nginx.service
    title: Nginx
  db:
    unit: postgresql.service
"#,
        )
        .unwrap();
        assert_eq!(cfg.scope, Scope::User);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.root.as_deref(), Some("/sysdweb"));
        assert!(cfg.static_dir.is_absolute());
        assert!(cfg.static_dir.ends_with("static"));
        assert_eq!(cfg.auth.mode, AuthMode::Basic);
        assert_eq!(cfg.auth.users, vec!["alice:secret", "bob:hunter2"]);
        let names: Vec<&str> = cfg.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);
        assert_eq!(cfg.services[1].title, "db");
    }

    #[test]
    fn test_defaults() {
        let cfg = load("auth:\n  mode: none\nservices:\n  web:\n    unit: nginx.service\n").unwrap();
        assert_eq!(cfg.scope, Scope::System);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8085);
        assert_eq!(cfg.root, None);
        assert_eq!(cfg.static_dir, PathBuf::from("/usr/share/sysdweb/static"));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.auth.pam_service, "login");
    }

    #[test]
    fn test_users_as_comma_separated_string() {
        let cfg = load(
            "auth:\n  mode: basic\n  users: 'u:p, v:q'\nservices:\n  web:\n    unit: nginx.service\n",
        )
        .unwrap();
        assert_eq!(cfg.auth.users, vec!["u:p", "v:q"]);
    }

    #[test]
    fn test_basic_without_users_is_rejected() {
        let err = load("auth:\n  mode: basic\nservices:\n  web:\n    unit: nginx.service\n").unwrap_err();
        assert!(err.to_string().contains("auth.users is empty"));
    }

    #[test]
    fn test_basic_entry_without_colon_is_rejected() {
        let err = load("auth:\n  mode: basic\n  users: [alice]\nservices:\n  web:\n    unit: nginx.service\n")
            .unwrap_err();
        assert!(err.to_string().contains("missing ':'"));
    }

    #[test]
    fn test_no_services_is_rejected() {
        let err = load("auth:\n  mode: none\n").unwrap_err();
        assert!(err.to_string().contains("no services configured"));
    }

    #[test]
    fn test_empty_unit_is_rejected() {
        assert!(load("auth:\n  mode: none\nservices:\n  web:\n    unit: ''\n").is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(load("auth:\n  mode: none\n  realm: x\nservices:\n  web:\n    unit: nginx.service\n").is_err());
        assert!(load("auth:\n  mode: ldap\nservices:\n  web:\n    unit: nginx.service\n").is_err());
    }

    #[test]
    fn test_root_must_be_absolute_without_trailing_slash() {
        let base = "auth:\n  mode: none\nservices:\n  web:\n    unit: nginx.service\n";
        assert!(load(&format!("global:\n  root: sysdweb\n{base}")).is_err());
        assert!(load(&format!("global:\n  root: /sysdweb/\n{base}")).is_err());
        assert!(load(&format!("global:\n  root: /\n{base}")).is_err());
        assert!(load(&format!("global:\n  root: \"/a\\\"b\"\n{base}")).is_err());
    }

    #[cfg(not(feature = "pam"))]
    #[test]
    fn test_pam_requires_feature() {
        let err = load("auth:\n  mode: pam\nservices:\n  web:\n    unit: nginx.service\n").unwrap_err();
        assert!(err.to_string().contains("`pam` feature"));
    }
}
