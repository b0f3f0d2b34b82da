//! Extensions shipped with the handler.

pub mod apollo_tracing;
pub mod apq;
pub mod complexity;
pub mod introspection;

pub use self::apollo_tracing::ApolloTracing;
pub use self::apq::ApqStats;
pub use self::apq::AutomaticPersistedQuery;
pub use self::complexity::ComplexityLimit;
pub use self::complexity::ComplexityStats;
pub use self::introspection::Introspection;
