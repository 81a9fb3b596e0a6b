//! The functions-module interface.
//!
//! A module is the unit the developer ships: a set of handlers resolved by
//! entry-point name, plus the trigger definitions the supervisor's static
//! analysis recorded for them. Handlers receive an [`InvokeContext`] carrying
//! the intercepted SDK surfaces — that context is the only sanctioned way a
//! function reaches the managed backend from inside the harness.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::RwLock;
use serde_json::Value;

use stratus_core::error::FunctionError;
use stratus_core::trigger::TriggerDefinition;
use stratus_intercept::DynObject;

use crate::env::EnvContext;

/// One HTTP request handed to an HTTPS function.
///
/// The raw body is buffered in full before any structured parsing, so
/// signature-verification use cases always see the exact bytes received.
#[derive(Debug, Clone)]
pub struct HttpsRequest {
    /// Request method.
    pub method: Method,
    /// Request path as received.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// The complete, unparsed body.
    pub raw_body: Bytes,
    /// The body parsed as JSON, when the content type says it is JSON.
    pub body: Option<Value>,
}

/// The response an HTTPS function produces.
#[derive(Debug, Clone)]
pub struct HttpsResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpsResponse {
    /// A `200 OK` response with a plain body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A `200 OK` response with a JSON body.
    pub fn json(value: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(value.to_string()),
        }
    }

    /// Replace the status code.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

/// Where a function's log lines go.
pub trait LogSink: Send + Sync {
    /// Write one log line.
    fn line(&self, message: &str);
}

/// Default sink: stderr, where it cannot corrupt the status stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrLog;

impl LogSink for StderrLog {
    fn line(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// The function-visible logging handle.
///
/// The dispatcher scopes a redirect around every handler run so log lines
/// become `USER` events; when the scope ends the previous sink is restored,
/// error or not.
#[derive(Clone)]
pub struct Console {
    sink: Arc<RwLock<Arc<dyn LogSink>>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// A console writing to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Arc::new(RwLock::new(Arc::new(StderrLog))),
        }
    }

    /// Write one line through the current sink.
    pub fn log(&self, message: &str) {
        self.sink.read().line(message);
    }

    /// Swap the sink, restoring the previous one when the guard drops.
    #[must_use]
    pub fn redirect(&self, sink: Arc<dyn LogSink>) -> ConsoleRedirect {
        let previous = std::mem::replace(&mut *self.sink.write(), sink);
        ConsoleRedirect {
            console: self.clone(),
            previous: Some(previous),
        }
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Console(..)")
    }
}

/// Scope guard restoring a console's previous sink.
pub struct ConsoleRedirect {
    console: Console,
    previous: Option<Arc<dyn LogSink>>,
}

impl Drop for ConsoleRedirect {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.console.sink.write() = previous;
        }
    }
}

/// Everything a handler may touch while it runs.
pub struct InvokeContext {
    /// The intercepted admin SDK namespace.
    pub admin: Arc<dyn DynObject>,
    /// The runtime-config surface.
    pub config: Arc<dyn DynObject>,
    /// The outbound transport namespace.
    pub transports: Arc<dyn DynObject>,
    /// The function's logging handle.
    pub console: Console,
    /// Immutable environment of this invocation.
    pub env: Arc<EnvContext>,
}

impl std::fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeContext").finish_non_exhaustive()
    }
}

/// An HTTP-invoked function.
#[async_trait]
pub trait HttpsFunction: Send + Sync {
    /// Serve the one request of this invocation.
    async fn handle(
        &self,
        ctx: Arc<InvokeContext>,
        req: HttpsRequest,
    ) -> Result<HttpsResponse, FunctionError>;
}

/// An event-invoked function.
#[async_trait]
pub trait BackgroundFunction: Send + Sync {
    /// Process the decoded event payload.
    async fn handle(&self, ctx: Arc<InvokeContext>, payload: Value) -> Result<(), FunctionError>;
}

/// A resolved handler of either kind.
#[derive(Clone)]
pub enum Handler {
    /// HTTP-invoked.
    Https(Arc<dyn HttpsFunction>),
    /// Event-invoked.
    Background(Arc<dyn BackgroundFunction>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Https(_) => f.write_str("Handler::Https(..)"),
            Self::Background(_) => f.write_str("Handler::Background(..)"),
        }
    }
}

/// The handler stored at one entry point.
///
/// The functions SDK's HTTP registration path wraps the developer's handler
/// for deployment; when it does, it stashes the original next to the wrapper
/// so the harness can invoke the unwrapped function and keep asynchronous
/// failures catchable. [`effective`](Self::effective) prefers the stash.
#[derive(Clone, Debug)]
pub struct HandlerSlot {
    /// The handler as exported.
    pub handler: Handler,
    /// The original unwrapped handler, when the registration path recorded one.
    pub raw: Option<Handler>,
}

impl HandlerSlot {
    /// A slot with no recorded original.
    #[must_use]
    pub fn plain(handler: Handler) -> Self {
        Self { handler, raw: None }
    }

    /// A slot whose registration path stashed the unwrapped original.
    #[must_use]
    pub fn wrapped(handler: Handler, raw: Handler) -> Self {
        Self {
            handler,
            raw: Some(raw),
        }
    }

    /// The handler the harness should invoke.
    #[must_use]
    pub fn effective(&self) -> &Handler {
        self.raw.as_ref().unwrap_or(&self.handler)
    }
}

/// The unit the loader produces: trigger definitions plus handler lookup.
pub trait FunctionsModule: Send + Sync {
    /// The trigger definitions recorded for this module.
    fn triggers(&self) -> Vec<TriggerDefinition>;

    /// Resolve a handler by its entry-point path.
    fn resolve(&self, entry_point: &str) -> Option<HandlerSlot>;
}

/// In-memory [`FunctionsModule`] assembled by hand.
///
/// The building block for tests and for embedders that register handlers
/// directly instead of shipping a compiled module.
#[derive(Default)]
pub struct StaticModule {
    definitions: Vec<TriggerDefinition>,
    handlers: HashMap<String, HandlerSlot>,
}

impl StaticModule {
    /// Start an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger and its handler.
    #[must_use]
    pub fn define(mut self, definition: TriggerDefinition, slot: HandlerSlot) -> Self {
        self.handlers
            .insert(definition.entry_point.clone(), slot);
        self.definitions.push(definition);
        self
    }
}

impl FunctionsModule for StaticModule {
    fn triggers(&self) -> Vec<TriggerDefinition> {
        self.definitions.clone()
    }

    fn resolve(&self, entry_point: &str) -> Option<HandlerSlot> {
        self.handlers.get(entry_point).cloned()
    }
}

struct BackgroundFn<F>(F);

#[async_trait]
impl<F> BackgroundFunction for BackgroundFn<F>
where
    F: Fn(Arc<InvokeContext>, Value) -> Result<(), FunctionError> + Send + Sync,
{
    async fn handle(&self, ctx: Arc<InvokeContext>, payload: Value) -> Result<(), FunctionError> {
        (self.0)(ctx, payload)
    }
}

/// A background handler from a plain closure.
pub fn background_handler<F>(f: F) -> Handler
where
    F: Fn(Arc<InvokeContext>, Value) -> Result<(), FunctionError> + Send + Sync + 'static,
{
    Handler::Background(Arc::new(BackgroundFn(f)))
}

struct HttpsFn<F>(F);

#[async_trait]
impl<F> HttpsFunction for HttpsFn<F>
where
    F: Fn(Arc<InvokeContext>, HttpsRequest) -> Result<HttpsResponse, FunctionError> + Send + Sync,
{
    async fn handle(
        &self,
        ctx: Arc<InvokeContext>,
        req: HttpsRequest,
    ) -> Result<HttpsResponse, FunctionError> {
        (self.0)(ctx, req)
    }
}

/// An HTTPS handler from a plain closure.
pub fn https_handler<F>(f: F) -> Handler
where
    F: Fn(Arc<InvokeContext>, HttpsRequest) -> Result<HttpsResponse, FunctionError>
        + Send
        + Sync
        + 'static,
{
    Handler::Https(Arc::new(HttpsFn(f)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stratus_core::trigger::TriggerKind;

    use super::*;

    fn definition(name: &str, entry_point: &str) -> TriggerDefinition {
        TriggerDefinition {
            name: name.into(),
            entry_point: entry_point.into(),
            kind: TriggerKind::Https,
            timeout: None,
            regions: vec![],
            available_memory: None,
        }
    }

    #[test]
    fn static_module_resolves_by_entry_point() {
        let module = StaticModule::new().define(
            definition("fn", "handlers.fn"),
            HandlerSlot::plain(https_handler(|_ctx, _req| Ok(HttpsResponse::ok("hi")))),
        );

        assert!(module.resolve("handlers.fn").is_some());
        assert!(module.resolve("handlers.other").is_none());
        assert_eq!(module.triggers().len(), 1);
    }

    #[test]
    fn slot_prefers_the_stashed_original() {
        let wrapped = https_handler(|_ctx, _req| Ok(HttpsResponse::ok("wrapped")));
        let raw = background_handler(|_ctx, _payload| Ok(()));
        let slot = HandlerSlot::wrapped(wrapped, raw);

        assert!(matches!(slot.effective(), Handler::Background(_)));
    }

    #[test]
    fn console_redirect_restores_on_drop() {
        struct Capture(Arc<parking_lot::Mutex<Vec<String>>>);
        impl LogSink for Capture {
            fn line(&self, message: &str) {
                self.0.lock().push(message.to_owned());
            }
        }

        let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let console = Console::new();
        {
            let _guard = console.redirect(Arc::new(Capture(Arc::clone(&lines))));
            console.log("inside");
        }
        console.log("outside");

        assert_eq!(*lines.lock(), vec!["inside".to_owned()]);
    }
}
