//! Credential resolution for the embedding provider.
//!
//! The pipeline never reads API keys from ambient global state. A
//! [`CredentialResolver`] is passed in, [`ProviderSettings::resolve`] turns
//! it into an immutable settings value once, and [`SettingsCache`] keeps that
//! value until [`SettingsCache::invalidate`] signals a configuration change.
//!
//! Resolved names:
//!
//! | Name | Fallback |
//! |------|----------|
//! | `embedding.api_key_env` (default `OPENAI_API_KEY`) | none; missing is fatal |
//! | `EMBEDDING_MODEL` | `embedding.model` |
//! | `EMBEDDING_DIMENSIONS` | `embedding.dims` |

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use context_embed_core::PipelineError;

use crate::config::{Config, EmbeddingConfig};

/// Source of named credentials and settings.
pub trait CredentialResolver: Send + Sync {
    /// Look up `name`, returning `default` when it is not set.
    fn get_credential(&self, name: &str, default: Option<&str>) -> Option<String>;
}

/// Reads credentials from the process environment.
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn get_credential(&self, name: &str, default: Option<&str>) -> Option<String> {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => Some(v),
            _ => default.map(str::to_string),
        }
    }
}

/// Fixed credential table, e.g. the `[credentials]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn get_credential(&self, name: &str, default: Option<&str>) -> Option<String> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| default.map(str::to_string))
    }
}

/// Tries each resolver in order; the first hit wins.
pub struct LayeredCredentials {
    layers: Vec<Box<dyn CredentialResolver>>,
}

impl LayeredCredentials {
    pub fn new(layers: Vec<Box<dyn CredentialResolver>>) -> Self {
        Self { layers }
    }

    /// Environment first, then the config's `[credentials]` table.
    pub fn from_config(config: &Config) -> Self {
        Self::new(vec![
            Box::new(EnvCredentials),
            Box::new(StaticCredentials::new(config.credentials.clone())),
        ])
    }
}

impl CredentialResolver for LayeredCredentials {
    fn get_credential(&self, name: &str, default: Option<&str>) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get_credential(name, None))
            .or_else(|| default.map(str::to_string))
    }
}

/// Immutable provider settings resolved once per configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: String,
    pub dims: usize,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish()
    }
}

impl ProviderSettings {
    pub fn resolve(
        resolver: &dyn CredentialResolver,
        config: &EmbeddingConfig,
    ) -> Result<Self, PipelineError> {
        let api_key = resolver
            .get_credential(&config.api_key_env, None)
            .ok_or_else(|| {
                PipelineError::Config(format!("{} is not set", config.api_key_env))
            })?;

        let model = resolver
            .get_credential("EMBEDDING_MODEL", config.model.as_deref())
            .ok_or_else(|| {
                PipelineError::Config(
                    "embedding model is not configured (set embedding.model or EMBEDDING_MODEL)"
                        .into(),
                )
            })?;
        let dims = resolve_dims(resolver, config)?;

        Ok(Self {
            api_key,
            model,
            dims,
        })
    }
}

/// Embedding dimension from `EMBEDDING_DIMENSIONS`, else `embedding.dims`.
pub fn resolve_dims(
    resolver: &dyn CredentialResolver,
    config: &EmbeddingConfig,
) -> Result<usize, PipelineError> {
    let dims_default = config.dims.map(|d| d.to_string());
    let dims = resolver
        .get_credential("EMBEDDING_DIMENSIONS", dims_default.as_deref())
        .ok_or_else(|| {
            PipelineError::Config(
                "embedding dims are not configured (set embedding.dims or EMBEDDING_DIMENSIONS)"
                    .into(),
            )
        })?;
    let dims: usize = dims.trim().parse().map_err(|_| {
        PipelineError::Config(format!("EMBEDDING_DIMENSIONS is not a number: {}", dims))
    })?;
    if dims == 0 {
        return Err(PipelineError::Config("embedding dims must be > 0".into()));
    }
    Ok(dims)
}

/// Caches resolved [`ProviderSettings`] until explicitly invalidated.
///
/// Shared by the provider backend, which reads it on every request.
pub struct SettingsCache {
    resolver: Arc<dyn CredentialResolver>,
    config: EmbeddingConfig,
    cached: RwLock<Option<Arc<ProviderSettings>>>,
}

impl SettingsCache {
    pub fn new(resolver: Arc<dyn CredentialResolver>, config: EmbeddingConfig) -> Self {
        Self {
            resolver,
            config,
            cached: RwLock::new(None),
        }
    }

    /// Resolved settings, resolving on first use.
    pub fn get(&self) -> Result<Arc<ProviderSettings>, PipelineError> {
        if let Ok(guard) = self.cached.read() {
            if let Some(settings) = guard.as_ref() {
                return Ok(Arc::clone(settings));
            }
        }

        let settings = Arc::new(ProviderSettings::resolve(self.resolver.as_ref(), &self.config)?);
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(Arc::clone(&settings));
        }
        Ok(settings)
    }

    /// Drop the cached settings; the next [`get`](Self::get) re-resolves.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn embedding_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let err = ProviderSettings::resolve(&StaticCredentials::default(), &embedding_config())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn resolver_overrides_config_model_and_dims() {
        let creds = StaticCredentials::default()
            .with("OPENAI_API_KEY", "sk-test")
            .with("EMBEDDING_MODEL", "text-embedding-3-large")
            .with("EMBEDDING_DIMENSIONS", "3072");
        let settings = ProviderSettings::resolve(&creds, &embedding_config()).unwrap();
        assert_eq!(settings.model, "text-embedding-3-large");
        assert_eq!(settings.dims, 3072);
        assert!(!format!("{:?}", settings).contains("sk-test"));
    }

    #[test]
    fn model_and_dims_may_come_from_resolver_alone() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        let bare = StaticCredentials::default().with("OPENAI_API_KEY", "sk-test");
        let err = ProviderSettings::resolve(&bare, &config).unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_MODEL"));
        assert!(resolve_dims(&bare, &config)
            .unwrap_err()
            .to_string()
            .contains("EMBEDDING_DIMENSIONS"));

        let creds = bare
            .with("EMBEDDING_MODEL", "nomic-embed-text")
            .with("EMBEDDING_DIMENSIONS", "768");
        let settings = ProviderSettings::resolve(&creds, &config).unwrap();
        assert_eq!(settings.model, "nomic-embed-text");
        assert_eq!(settings.dims, 768);
    }

    #[test]
    fn layered_first_hit_wins() {
        let layered = LayeredCredentials::new(vec![
            Box::new(StaticCredentials::default().with("A", "first")),
            Box::new(StaticCredentials::default().with("A", "second").with("B", "b")),
        ]);
        assert_eq!(layered.get_credential("A", None).as_deref(), Some("first"));
        assert_eq!(layered.get_credential("B", None).as_deref(), Some("b"));
        assert_eq!(layered.get_credential("C", Some("d")).as_deref(), Some("d"));
    }

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
    }

    impl CredentialResolver for CountingResolver {
        fn get_credential(&self, name: &str, default: Option<&str>) -> Option<String> {
            if name == "OPENAI_API_KEY" {
                self.calls.fetch_add(1, Ordering::SeqCst);
                return Some("sk-test".into());
            }
            default.map(str::to_string)
        }
    }

    #[test]
    fn cache_resolves_once_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SettingsCache::new(
            Arc::new(CountingResolver {
                calls: Arc::clone(&calls),
            }),
            embedding_config(),
        );

        cache.get().unwrap();
        cache.get().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cache.get().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
