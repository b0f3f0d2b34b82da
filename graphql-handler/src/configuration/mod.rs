//! Server settings, read from YAML and described by a JSON schema.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use bytesize::ByteSize;
use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cache::DEFAULT_APQ_CACHE_CAPACITY;
use crate::cache::DEFAULT_QUERY_CACHE_CAPACITY;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(#[from] serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of a [`Server`](crate::Server).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Parsed document cache
    pub query_cache: QueryCacheConfig,

    /// Automatic persisted queries
    pub persisted_queries: PersistedQueriesConfig,

    /// Operation complexity limits
    pub complexity: ComplexityConfig,

    /// Schema introspection
    pub introspection: IntrospectionConfig,

    /// `multipart/form-data` uploads
    pub multipart: MultipartConfig,

    /// Apollo tracing response extension
    pub apollo_tracing: ApolloTracingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct QueryCacheConfig {
    /// Maximum number of parsed documents kept; 0 disables the cache
    pub capacity: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUERY_CACHE_CAPACITY.get(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct PersistedQueriesConfig {
    pub enabled: bool,
    /// Maximum number of hash to query mappings kept
    pub capacity: usize,
}

impl Default for PersistedQueriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_APQ_CACHE_CAPACITY.get(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct ComplexityConfig {
    /// Reject operations whose complexity is above this value
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct IntrospectionConfig {
    pub enabled: bool,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct MultipartConfig {
    /// Maximum size of a whole multipart body
    #[schemars(with = "String")]
    pub max_upload_size: ByteSize,

    /// Files larger than this are written to a temporary file
    #[schemars(with = "String")]
    pub max_memory: ByteSize,

    /// Directory for those files, the system temporary directory when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_upload_size: ByteSize::mib(32),
            max_memory: ByteSize::mib(32),
            temp_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct ApolloTracingConfig {
    pub enabled: bool,
}

impl Configuration {
    /// Parses YAML configuration and checks the values serde cannot.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if self.persisted_queries.enabled && self.persisted_queries.capacity == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "persisted_queries.capacity",
                error: "must be greater than 0 when persisted queries are enabled".to_string(),
            });
        }
        if self.multipart.max_memory > self.multipart.max_upload_size {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "multipart.max_memory",
                error: format!(
                    "{} is larger than multipart.max_upload_size {}",
                    self.multipart.max_memory, self.multipart.max_upload_size
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn query_cache_capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.query_cache.capacity)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml(s)
    }
}

/// JSON schema of the configuration file.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings.into_generator().into_root_schema_for::<Configuration>()
}
