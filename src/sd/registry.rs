use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

/// One dashboard entry: the name used in URLs, the systemd unit it drives and its display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub unit: String,
    pub title: String,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            title: title.into(),
        }
    }
}

/// Ordered, immutable set of configured services. Iteration order is display order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, ServiceConfig>,
}

impl ServiceRegistry {
    pub fn new(services: impl IntoIterator<Item = ServiceConfig>) -> anyhow::Result<Self> {
        let mut out: IndexMap<String, ServiceConfig> = IndexMap::new();
        // canonical -> original, so `Web` and `web` cannot both exist.
        let mut seen: HashMap<String, String> = HashMap::new();
        for svc in services {
            anyhow::ensure!(!svc.name.trim().is_empty(), "service name must not be empty");
            anyhow::ensure!(
                svc.name.trim() == svc.name,
                "service name must not have leading/trailing whitespace: {:?}",
                svc.name
            );
            anyhow::ensure!(
                !svc.name.contains('/'),
                "service name must not contain '/': {:?}",
                svc.name
            );
            anyhow::ensure!(
                !svc.unit.trim().is_empty(),
                "services.{}.unit must not be empty",
                svc.name
            );
            let canon = svc.name.to_ascii_lowercase();
            if let Some(prev) = seen.insert(canon.clone(), svc.name.clone()) {
                anyhow::bail!(
                    "duplicate service name (case-insensitive) {canon:?} for services {prev:?} and {:?}",
                    svc.name
                );
            }
            out.insert(svc.name.clone(), svc);
        }
        Ok(Self { services: out })
    }

    pub fn get(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
