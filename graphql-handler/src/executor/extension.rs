use async_trait::async_trait;
use tower::BoxError;

use crate::execution::ExecutableSchema;
use crate::graphql;
use crate::middleware::FieldMiddleware;
use crate::middleware::OperationMiddleware;
use crate::middleware::ResponseMiddleware;
use crate::operation::OperationContext;
use crate::operation::RawParams;
use crate::operation::Stats;

/// Hooks into building and dispatching operations.
///
/// Every hook has a no-op default; an extension implements only the stages it cares about.
/// Hooks of different extensions run in the order the extensions were installed.
#[async_trait]
pub trait HandlerExtension: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        get_type_of(self)
    }

    /// Checks the extension can work with `schema`, called once when it is installed.
    fn validate(&self, _schema: &dyn ExecutableSchema) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs before the query is parsed, may rewrite the request parameters.
    async fn mutate_operation_parameters(
        &self,
        _params: &mut RawParams,
        _stats: &mut Stats,
    ) -> Result<(), graphql::Error> {
        Ok(())
    }

    /// Runs once the operation is selected and its variables coerced.
    async fn mutate_operation_context(
        &self,
        _schema: &dyn ExecutableSchema,
        _context: &mut OperationContext,
    ) -> Result<(), graphql::Error> {
        Ok(())
    }

    fn operation_middleware(&self) -> Option<OperationMiddleware> {
        None
    }

    fn response_middleware(&self) -> Option<ResponseMiddleware> {
        None
    }

    fn field_middleware(&self) -> Option<FieldMiddleware> {
        None
    }
}

fn get_type_of<T: ?Sized>(_: &T) -> &'static str {
    std::any::type_name::<T>()
}
