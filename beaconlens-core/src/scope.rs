//! Interfaces to the external collaborators: the domain registry and the
//! scope resolver.
//!
//! Neither system is implemented here. The traits are the seams; the
//! `Config*` types are adapters that serve both from `config.toml` so a
//! single-node deployment works without the external services.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Domain, DomainId};
use std::collections::{BTreeSet, HashMap};

/// Read-only `(domainId, domainName, isActive)` lookups.
pub trait DomainRegistry: Send + Sync {
    /// Look up a domain by its name (case-insensitive).
    fn find_by_name(&self, name: &str) -> Option<Domain>;

    /// Look up a domain by id.
    fn find_by_id(&self, id: DomainId) -> Option<Domain>;
}

/// The set of domains a caller may query. Opaque allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    domains: BTreeSet<DomainId>,
}

impl Scope {
    pub fn new(domains: impl IntoIterator<Item = DomainId>) -> Self {
        Self {
            domains: domains.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: DomainId) -> bool {
        self.domains.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.domains.iter().copied()
    }

    /// Intersect with a single requested domain.
    ///
    /// A domain outside the scope yields an empty scope, never a wider one.
    pub fn narrow_to(&self, id: DomainId) -> Scope {
        if self.contains(id) {
            Scope::new([id])
        } else {
            Scope::default()
        }
    }
}

/// Resolves a caller credential into a [`Scope`].
pub trait ScopeResolver: Send + Sync {
    /// `Err(Unauthorized)` for a missing or unknown credential,
    /// `Err(NoAccessibleDomains)` when the credential owns no domain.
    fn resolve(&self, credential: Option<&str>) -> Result<Scope>;
}

/// Domain registry served from the `[[domains]]` config table.
#[derive(Debug, Clone, Default)]
pub struct ConfigDomainRegistry {
    by_id: HashMap<DomainId, Domain>,
    by_name: HashMap<String, DomainId>,
}

impl ConfigDomainRegistry {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.domains.iter().map(|d| Domain {
            domain_id: d.id,
            domain_name: d.name.clone(),
            is_active: d.active,
        }))
    }

    pub fn new(domains: impl IntoIterator<Item = Domain>) -> Self {
        let mut registry = Self::default();
        for domain in domains {
            registry
                .by_name
                .insert(domain.domain_name.to_ascii_lowercase(), domain.domain_id);
            registry.by_id.insert(domain.domain_id, domain);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl DomainRegistry for ConfigDomainRegistry {
    fn find_by_name(&self, name: &str) -> Option<Domain> {
        let id = self.by_name.get(&name.trim().to_ascii_lowercase())?;
        self.by_id.get(id).cloned()
    }

    fn find_by_id(&self, id: DomainId) -> Option<Domain> {
        self.by_id.get(&id).cloned()
    }
}

/// Scope resolver served from the `[[api_keys]]` config table.
#[derive(Debug, Clone, Default)]
pub struct ConfigScopeResolver {
    keys: HashMap<String, Scope>,
}

impl ConfigScopeResolver {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .api_keys
                .iter()
                .map(|k| (k.key.clone(), k.domains.clone())),
        )
    }

    pub fn new(entries: impl IntoIterator<Item = (String, Vec<DomainId>)>) -> Self {
        Self {
            keys: entries
                .into_iter()
                .map(|(key, domains)| (key, Scope::new(domains)))
                .collect(),
        }
    }
}

impl ScopeResolver for ConfigScopeResolver {
    fn resolve(&self, credential: Option<&str>) -> Result<Scope> {
        let key = credential
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(Error::Unauthorized)?;
        let scope = self.keys.get(key).ok_or(Error::Unauthorized)?;
        if scope.is_empty() {
            return Err(Error::NoAccessibleDomains);
        }
        Ok(scope.clone())
    }
}
