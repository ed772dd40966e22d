//! In-process registry of authorized apps.

use crate::apps::manifest::{AppManifest, AppManifestError, AppScope};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Registered app snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredApp {
    pub manifest: AppManifest,
    pub scopes: BTreeSet<AppScope>,
}

impl RegisteredApp {
    pub fn allows(&self, scope: AppScope) -> bool {
        self.scopes.contains(&scope)
    }
}

/// Registry keyed by trimmed app id.
#[derive(Debug, Default)]
pub struct AppRegistry {
    entries: BTreeMap<String, RegisteredApp>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from config manifests, failing on the first bad one.
    pub fn from_manifests(manifests: &[AppManifest]) -> Result<Self, AppRegistryError> {
        let mut registry = Self::new();
        for manifest in manifests {
            registry.register(manifest.clone())?;
        }
        Ok(registry)
    }

    /// Registers one app after manifest validation.
    pub fn register(&mut self, manifest: AppManifest) -> Result<(), AppRegistryError> {
        manifest
            .validate()
            .map_err(AppRegistryError::InvalidManifest)?;
        let id = manifest.id.trim().to_string();
        if self.entries.contains_key(&id) {
            return Err(AppRegistryError::DuplicateAppId(id));
        }

        let scopes = manifest.granted_scopes();
        self.entries.insert(id, RegisteredApp { manifest, scopes });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, app_id: &str) -> Option<&RegisteredApp> {
        self.entries.get(app_id.trim())
    }

    /// Checks that `app_id` is registered and granted `scope`.
    pub fn authorize(&self, app_id: &str, scope: AppScope) -> Result<(), AppRegistryError> {
        let app_id = app_id.trim();
        let Some(entry) = self.get(app_id) else {
            return Err(AppRegistryError::UnknownApp(app_id.to_string()));
        };
        if !entry.allows(scope) {
            return Err(AppRegistryError::ScopeDenied {
                app_id: app_id.to_string(),
                scope,
            });
        }
        Ok(())
    }

    /// Scope gate used by engine entry points.
    ///
    /// An empty registry accepts every caller. Otherwise the caller must
    /// name a registered app holding `scope`.
    pub fn check(&self, app_id: Option<&str>, scope: AppScope) -> Result<(), AppRegistryError> {
        if self.is_empty() {
            return Ok(());
        }
        match app_id {
            Some(app_id) if !app_id.trim().is_empty() => self.authorize(app_id, scope),
            _ => Err(AppRegistryError::MissingAppId(scope)),
        }
    }
}

/// Registration and authorization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppRegistryError {
    InvalidManifest(AppManifestError),
    DuplicateAppId(String),
    UnknownApp(String),
    MissingAppId(AppScope),
    ScopeDenied { app_id: String, scope: AppScope },
}

impl Display for AppRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid app manifest: {err}"),
            Self::DuplicateAppId(value) => write!(f, "app id already registered: {value}"),
            Self::UnknownApp(value) => write!(f, "app is not registered: {value}"),
            Self::MissingAppId(scope) => {
                write!(f, "an app id is required for scope `{scope}`")
            }
            Self::ScopeDenied { app_id, scope } => {
                write!(f, "app `{app_id}` is not granted scope `{scope}`")
            }
        }
    }
}

impl Error for AppRegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppRegistry, AppRegistryError};
    use crate::apps::manifest::{AppManifest, AppScope};

    fn manifest(id: &str, scopes: &[&str]) -> AppManifest {
        AppManifest {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
        }
    }

    #[test]
    fn rejects_duplicate_app_id() {
        let mut registry = AppRegistry::new();
        registry
            .register(manifest("reader.app", &["submit"]))
            .expect("first registration should succeed");
        let err = registry
            .register(manifest("reader.app", &["prompt"]))
            .expect_err("duplicate registration must fail");
        assert!(matches!(err, AppRegistryError::DuplicateAppId(_)));
    }

    #[test]
    fn empty_registry_accepts_everyone() {
        let registry = AppRegistry::new();
        assert!(registry.check(None, AppScope::Submit).is_ok());
        assert!(registry.check(Some("any.app"), AppScope::Feedback).is_ok());
    }

    #[test]
    fn populated_registry_enforces_scopes() {
        let registry = AppRegistry::from_manifests(&[manifest("reader.app", &["submit"])])
            .expect("registry should build");

        assert!(registry.check(Some("reader.app"), AppScope::Submit).is_ok());
        assert_eq!(
            registry.check(Some("reader.app"), AppScope::Prompt),
            Err(AppRegistryError::ScopeDenied {
                app_id: "reader.app".to_string(),
                scope: AppScope::Prompt,
            })
        );
        assert_eq!(
            registry.check(Some("other.app"), AppScope::Submit),
            Err(AppRegistryError::UnknownApp("other.app".to_string()))
        );
        assert_eq!(
            registry.check(None, AppScope::Submit),
            Err(AppRegistryError::MissingAppId(AppScope::Submit))
        );
    }

    #[test]
    fn padded_app_ids_resolve_to_the_registered_entry() {
        let registry = AppRegistry::from_manifests(&[
            manifest(" reader.app ", &["submit", "prompt"]),
            manifest("chat.app", &["feedback"]),
        ])
        .expect("registry should build");

        let reader = registry.get("  reader.app").expect("trimmed lookup");
        assert!(reader.allows(AppScope::Prompt));
        assert!(!reader.allows(AppScope::Feedback));
        assert!(registry.check(Some("reader.app "), AppScope::Submit).is_ok());
        assert_eq!(registry.len(), 2);
    }
}
