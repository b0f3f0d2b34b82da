//!  (A)utomatic (P)ersisted (Q)ueries.
//!
//!  Clients send the SHA-256 of their query in `extensions.persistedQuery` and only send the
//!  query text when the server does not know the hash yet.
//!
//!  For more information on APQ see:
//!  <https://www.apollographql.com/docs/apollo-server/performance/apq/>

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;

use crate::cache::QueryCache;
use crate::error::PERSISTED_QUERY_NOT_FOUND;
use crate::execution::ExecutableSchema;
use crate::executor::HandlerExtension;
use crate::graphql;
use crate::operation::OperationContext;
use crate::operation::RawParams;
use crate::operation::Stats;

const NOT_FOUND_MESSAGE: &str = "PersistedQueryNotFound";

/// The `persistedQuery` request extension.
#[derive(Deserialize, Clone, Debug)]
struct PersistedQuery {
    version: i64,
    #[serde(rename = "sha256Hash")]
    sha256hash: String,
}

/// What the persisted query extension saw for one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApqStats {
    /// The hash the client sent.
    pub hash: String,
    /// Whether the query text came with the hash rather than from the cache.
    pub sent_query: bool,
}

impl ApqStats {
    pub fn get(context: &OperationContext) -> Option<&ApqStats> {
        context.stats.extension::<ApqStats>()
    }
}

/// Resolves queries from their hash, remembering every hash and query pair it validates.
#[derive(Clone)]
pub struct AutomaticPersistedQuery {
    cache: Arc<dyn QueryCache<String>>,
}

impl AutomaticPersistedQuery {
    pub fn new(cache: Arc<dyn QueryCache<String>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HandlerExtension for AutomaticPersistedQuery {
    fn name(&self) -> &'static str {
        "AutomaticPersistedQuery"
    }

    async fn mutate_operation_parameters(
        &self,
        params: &mut RawParams,
        stats: &mut Stats,
    ) -> Result<(), graphql::Error> {
        let Some(extension) = params.extensions.get("persistedQuery") else {
            return Ok(());
        };
        let persisted_query = serde_json_bytes::from_value::<PersistedQuery>(extension.clone())
            .map_err(|_| {
                graphql::Error::builder()
                    .message("invalid APQ extension data")
                    .build()
            })?;
        if persisted_query.version != 1 {
            return Err(graphql::Error::builder()
                .message("unsupported APQ version")
                .build());
        }

        let sent_query = match &params.query {
            Some(query) => {
                if !query_matches_hash(query, &persisted_query.sha256hash) {
                    tracing::warn!("apq: graphql request doesn't match provided sha256Hash");
                    return Err(graphql::Error::builder()
                        .message("provided sha does not match query")
                        .build());
                }
                true
            }
            None => match self.cache.get(&persisted_query.sha256hash).await {
                Some(query) => {
                    tracing::trace!("apq: cache hit");
                    params.query = Some(query);
                    false
                }
                None => {
                    tracing::trace!("apq: cache miss");
                    return Err(graphql::Error::builder()
                        .message(NOT_FOUND_MESSAGE)
                        .extension_code(PERSISTED_QUERY_NOT_FOUND)
                        .build());
                }
            },
        };
        stats.set_extension(ApqStats {
            hash: persisted_query.sha256hash,
            sent_query,
        });
        Ok(())
    }

    async fn mutate_operation_context(
        &self,
        _schema: &dyn ExecutableSchema,
        context: &mut OperationContext,
    ) -> Result<(), graphql::Error> {
        if let Some(stats) = ApqStats::get(context) {
            if stats.sent_query {
                tracing::trace!("apq: cache insert");
                self.cache
                    .add(stats.hash.clone(), context.raw_query.clone())
                    .await;
            }
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of `query`.
pub fn query_hash(query: &str) -> String {
    let mut digest = Sha256::new();
    digest.update(query.as_bytes());
    hex::encode(digest.finalize())
}

fn query_matches_hash(query: &str, hash: &str) -> bool {
    query_hash(query).eq_ignore_ascii_case(hash)
}
