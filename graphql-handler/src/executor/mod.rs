//! Builds operation contexts out of request parameters and dispatches them.

use std::any::Any;
use std::sync::Arc;
use std::time::SystemTime;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::validation::Valid;
use parking_lot::Mutex;

pub use self::extension::HandlerExtension;
pub use self::response::ErrorPresenter;
pub use self::response::RecoverFunc;
pub use self::response::ResponseContext;
pub use self::response::ResponseHandler;
pub use self::response::ResponseProducer;
pub use self::response::default_error_presenter;
pub use self::response::default_recover_func;
use self::response::respond;
use crate::cache::NoCache;
use crate::cache::QueryCache;
use crate::error::DocumentErrors;
use crate::error::PERSISTED_QUERY_NOT_SUPPORTED;
use crate::error::validation_error;
use crate::execution::ExecutableSchema;
use crate::execution::FieldContext;
use crate::execution::engine;
use crate::execution::input_coercion::coerce_variable_values;
use crate::graphql;
use crate::middleware::Chain;
use crate::middleware::FieldMiddleware;
use crate::middleware::FieldResult;
use crate::middleware::OperationMiddleware;
use crate::middleware::ResponseMiddleware;
use crate::operation::CachedDocument;
use crate::operation::OperationContext;
use crate::operation::OperationError;
use crate::operation::RawParams;
use crate::operation::TraceTiming;
use crate::plugins::apq::ApqStats;

mod extension;
mod response;

/// Turns request parameters into responses for one executable schema.
pub struct Executor {
    schema: Arc<dyn ExecutableSchema>,
    extensions: Vec<Arc<dyn HandlerExtension>>,
    operation_middleware: Chain<Arc<OperationContext>, ResponseHandler>,
    response_middleware: Chain<Arc<ResponseContext>, graphql::Response>,
    field_middleware: Chain<Arc<FieldContext>, FieldResult>,
    error_presenter: ErrorPresenter,
    recover_func: RecoverFunc,
    query_cache: Arc<dyn QueryCache<CachedDocument>>,
}

impl Executor {
    pub fn new(schema: Arc<dyn ExecutableSchema>) -> Self {
        Self {
            schema,
            extensions: Vec::new(),
            operation_middleware: Chain::default(),
            response_middleware: Chain::default(),
            field_middleware: Chain::default(),
            error_presenter: default_error_presenter(),
            recover_func: default_recover_func(),
            query_cache: Arc::new(NoCache),
        }
    }

    pub fn schema(&self) -> &Arc<dyn ExecutableSchema> {
        &self.schema
    }

    /// Installs `extension`, its middleware run inside every middleware registered before.
    pub fn use_extension(
        &mut self,
        extension: Arc<dyn HandlerExtension>,
    ) -> Result<(), tower::BoxError> {
        extension.validate(self.schema.as_ref())?;
        if let Some(middleware) = extension.operation_middleware() {
            self.operation_middleware.push(middleware);
        }
        if let Some(middleware) = extension.response_middleware() {
            self.response_middleware.push(middleware);
        }
        if let Some(middleware) = extension.field_middleware() {
            self.field_middleware.push(middleware);
        }
        tracing::debug!(extension = extension.name(), "installed extension");
        self.extensions.push(extension);
        Ok(())
    }

    pub fn around_operations(&mut self, middleware: OperationMiddleware) {
        self.operation_middleware.push(middleware);
    }

    pub fn around_responses(&mut self, middleware: ResponseMiddleware) {
        self.response_middleware.push(middleware);
    }

    pub fn around_fields(&mut self, middleware: FieldMiddleware) {
        self.field_middleware.push(middleware);
    }

    pub fn set_error_presenter(&mut self, presenter: ErrorPresenter) {
        self.error_presenter = presenter;
    }

    pub fn set_recover_func(&mut self, recover_func: RecoverFunc) {
        self.recover_func = recover_func;
    }

    pub fn set_query_cache(&mut self, cache: Arc<dyn QueryCache<CachedDocument>>) {
        self.query_cache = cache;
    }

    /// Parses, validates and prepares the operation `params` describe.
    ///
    /// On failure the partially built context is returned with the errors so response
    /// middleware still observe the request.
    pub async fn create_operation_context(
        &self,
        mut params: RawParams,
    ) -> Result<OperationContext, Box<OperationError>> {
        let mut context = OperationContext::new(&params);
        for extension in &self.extensions {
            if let Err(error) = extension
                .mutate_operation_parameters(&mut params, &mut context.stats)
                .await
            {
                return Err(OperationError::new(context, vec![error]));
            }
        }
        context.raw_query = params.query.clone().unwrap_or_default();
        context.operation_name = params.operation_name.clone();

        let Some(query) = params.query.as_deref() else {
            let error = if params.extensions.contains_key("persistedQuery") {
                graphql::Error::builder()
                    .message("persisted queries are not supported")
                    .extension_code(PERSISTED_QUERY_NOT_SUPPORTED)
                    .build()
            } else {
                validation_error("no operation provided")
            };
            return Err(OperationError::new(context, vec![error]));
        };

        let cache_key = match context.stats.extension::<ApqStats>() {
            Some(apq) => format!("apq|{}", apq.hash),
            None => query.to_string(),
        };
        let document = match self.parse_query(&mut context, &cache_key, query).await {
            Ok(document) => document,
            Err(errors) => return Err(OperationError::new(context, errors)),
        };
        context.document = Some(document.clone());

        let operation = match select_operation(&document, params.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(error) => return Err(OperationError::new(context, vec![error])),
        };
        context.variables =
            match coerce_variable_values(self.schema.schema(), &operation, &params.variables) {
                Ok(variables) => variables,
                Err(error) => return Err(OperationError::new(context, vec![error])),
            };
        context.operation = Some(operation);
        context.stats.validation.end = SystemTime::now();

        for extension in &self.extensions {
            if let Err(error) = extension
                .mutate_operation_context(self.schema.as_ref(), &mut context)
                .await
            {
                return Err(OperationError::new(context, vec![error]));
            }
        }
        Ok(context)
    }

    async fn parse_query(
        &self,
        context: &mut OperationContext,
        cache_key: &str,
        query: &str,
    ) -> Result<CachedDocument, Vec<graphql::Error>> {
        context.stats.parsing = TraceTiming::now();
        if let Some(document) = self.query_cache.get(cache_key).await {
            tracing::trace!("query cache hit");
            let now = SystemTime::now();
            context.stats.parsing.end = now;
            context.stats.validation = TraceTiming {
                start: now,
                end: now,
            };
            return Ok(document);
        }

        let span = tracing::info_span!("parse_query");
        let document = span.in_scope(|| {
            let ast = ast::Document::parse(query, "query.graphql")
                .map_err(|invalid| DocumentErrors::parse(&invalid.errors).into_errors())?;
            context.stats.parsing.end = SystemTime::now();
            context.stats.validation = TraceTiming::now();

            let has_operation = ast
                .definitions
                .iter()
                .any(|definition| matches!(definition, ast::Definition::OperationDefinition(_)));
            if !has_operation {
                return Err(vec![validation_error("no operation provided")]);
            }
            ast.to_executable_validate(self.schema.schema())
                .map_err(|invalid| DocumentErrors::validation(&invalid.errors).into_errors())
        })?;

        let document: CachedDocument = Arc::new(document);
        self.query_cache
            .add(cache_key.to_string(), document.clone())
            .await;
        Ok(document)
    }

    /// Runs the operation middleware; the returned producer runs field execution.
    pub async fn dispatch_operation(&self, context: OperationContext) -> ResponseProducer {
        let context = Arc::new(context);
        let reached = Arc::new(Mutex::new(None));

        let schema = self.schema.clone();
        let field_middleware = self.field_middleware.clone();
        let endpoint_reached = reached.clone();
        let handler = self
            .operation_middleware
            .run(context.clone(), move |context: Arc<OperationContext>| async move {
                *endpoint_reached.lock() = Some(context);
                ResponseHandler::new(move |response| exec(schema, field_middleware, response))
            })
            .await;

        let operation = reached.lock().take().unwrap_or(context);
        ResponseProducer {
            operation,
            handler,
            response_middleware: self.response_middleware.clone(),
            presenter: self.error_presenter.clone(),
            recover_func: self.recover_func.clone(),
        }
    }

    /// Answers a request that failed before dispatch, through the response middleware.
    pub async fn dispatch_error(
        &self,
        context: OperationContext,
        errors: Vec<graphql::Error>,
    ) -> graphql::Response {
        let response = Arc::new(ResponseContext::new(
            Arc::new(context),
            self.error_presenter.clone(),
            self.recover_func.clone(),
        ));
        for error in errors {
            response.add_error(None, Box::new(error));
        }
        let handler = ResponseHandler::from_response(graphql::Response::default());
        respond(response, &self.response_middleware, handler).await
    }

    /// Builds the error for a panic caught outside of any operation.
    pub fn present_recovered_error(&self, payload: Box<dyn Any + Send>) -> graphql::Error {
        (self.error_presenter)(None, None, (self.recover_func)(None, payload))
    }
}

/// Picks the operation to run, by name or as the only one of the document.
fn select_operation(
    document: &Valid<ExecutableDocument>,
    name: Option<&str>,
) -> Result<Node<Operation>, graphql::Error> {
    let operations = &document.operations;
    if let Some(name) = name {
        return operations
            .named
            .get(name)
            .cloned()
            .ok_or_else(|| validation_error(format!("operation {name} not found")));
    }
    let mut all = operations.anonymous.iter().chain(operations.named.values());
    match (all.next(), all.next()) {
        (Some(operation), None) => Ok(operation.clone()),
        (None, _) => Err(validation_error("no operation provided")),
        (Some(_), Some(_)) => Err(validation_error("operation name required")),
    }
}

async fn exec(
    schema: Arc<dyn ExecutableSchema>,
    field_middleware: Chain<Arc<FieldContext>, FieldResult>,
    response: Arc<ResponseContext>,
) -> graphql::Response {
    let (Some(document), Some(operation)) = (
        response.operation.document.clone(),
        response.operation.operation.clone(),
    ) else {
        return graphql::Response::from_errors(vec![validation_error("no operation provided")]);
    };
    let root = match operation.operation_type {
        OperationType::Query => schema.query_root(),
        OperationType::Mutation => match schema.mutation_root() {
            Some(root) => root,
            None => return graphql::Response::error_message("mutations are not supported"),
        },
        OperationType::Subscription => {
            return graphql::Response::error_message("subscriptions are not supported");
        }
    };
    let data =
        engine::execute_operation(schema, field_middleware, response, document, operation, root)
            .await;
    graphql::Response::builder().data(data).build()
}
