//! Serves GraphQL over HTTP for an executable schema.
//!
//! A [`Server`] picks a transport for each request, builds the operation through the
//! [`Executor`] and runs the operation, response and field middleware around resolvers.

#![warn(unreachable_pub)]

pub mod cache;
pub mod client;
pub mod configuration;
pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graphql;
pub mod json_ext;
pub mod middleware;
pub mod operation;
pub mod plugins;
mod server;
pub mod transport;
pub mod upload;

#[cfg(test)]
mod testing;

pub use configuration::Configuration;
pub use context::Context;
pub use execution::ExecutableSchema;
pub use execution::FieldContext;
pub use execution::JsonObject;
pub use execution::ObjectResolver;
pub use execution::ResolvedValue;
pub use executor::Executor;
pub use executor::HandlerExtension;
pub use server::Server;
pub use server::ServerError;
