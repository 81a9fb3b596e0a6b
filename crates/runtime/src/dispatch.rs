//! The one-shot invocation dispatcher.
//!
//! A state machine that runs exactly once per process: verify the project,
//! prepare the environment, install the interception surfaces, load the
//! module, then either serve one HTTP request on a private listener or
//! invoke the handler directly with the event payload. A heartbeat counts
//! whole seconds for the final summary; when the timeout feature is on, a
//! watchdog forcibly ends the process if the handler overstays.
//!
//! Setup failures exit clean; resolution and invocation failures are
//! reported `FATAL` before the process goes down, so the supervisor always
//! has something better than an opaque crash to show.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use stratus_core::bundle::{Feature, InvocationBundle};
use stratus_core::error::{FunctionError, InvocationError};
use stratus_core::event::{EventSink, StatusEvent};

use crate::env::EnvContext;
use crate::legacy;
use crate::loader::{ModuleProvider, Trigger, TriggerMap, resolution_detective};
use crate::module::{
    BackgroundFunction, Console, HttpsFunction, HttpsRequest, HttpsResponse, Handler,
    InvokeContext, LogSink,
};
use crate::sdk::SdkHarness;
use crate::verify::verify_project;

/// Largest request body the ephemeral listener accepts.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// How a dispatcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Dependency verification refused the project; nothing was run.
    SetupRefused,
    /// The bundle named no trigger; the load itself was the diagnostic.
    DiagnosticOnly,
    /// The bundle named a trigger the module does not define.
    TriggerNotFound,
    /// The invocation ran to completion.
    Completed {
        /// Whole seconds the invocation took, at least one.
        seconds: u64,
    },
    /// The module failed to load or the handler failed.
    Failed,
}

impl DispatchOutcome {
    /// The process exit code this outcome maps to.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::SetupRefused | Self::DiagnosticOnly | Self::Completed { .. } => 0,
            Self::TriggerNotFound | Self::Failed => 1,
        }
    }
}

/// Ends the process when the watchdog fires.
///
/// Injected so the forced termination is observable in tests; production
/// uses [`ProcessExit`].
pub trait Terminate: Send + Sync {
    /// Terminate the process with the given exit code.
    fn terminate(&self, code: i32);
}

/// The production terminator: immediate process exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Counts whole seconds since dispatch began.
///
/// Used only for the final summary event. The counting task is aborted when
/// the heartbeat drops.
pub struct Heartbeat {
    seconds: Arc<AtomicU64>,
    handle: tokio::task::JoinHandle<()>,
}

impl Heartbeat {
    /// Start counting.
    #[must_use]
    pub fn start() -> Self {
        let seconds = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seconds);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        Self { seconds, handle }
    }

    /// Whole seconds elapsed so far.
    #[must_use]
    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The invocation timeout timer.
///
/// Armed before dispatch, disarmed on every exit path — explicitly on
/// completion, through `Drop` otherwise. Expiry runs the injected action
/// exactly once.
pub struct Watchdog {
    token: CancellationToken,
}

impl Watchdog {
    /// Arm the timer.
    pub fn arm<F>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let armed = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = armed.cancelled() => {}
                () = tokio::time::sleep(timeout) => on_expire(),
            }
        });
        Self { token }
    }

    /// Disarm the timer.
    pub fn disarm(&self) {
        self.token.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("{0}")]
    Internal(String),
}

/// Redirect target turning function log lines into `USER` events.
struct EventLog {
    sink: Arc<dyn EventSink>,
}

impl LogSink for EventLog {
    fn line(&self, message: &str) {
        self.sink.emit(&StatusEvent::user("function-log", message));
    }
}

/// Run a handler future with the console redirected into the event stream.
///
/// The handler runs as its own task so a panic surfaces as a catchable
/// failure instead of tearing the dispatcher down. The previous console
/// sink is restored before the result propagates, error or not.
async fn run_guarded<T, F>(
    ctx: &Arc<InvokeContext>,
    sink: &Arc<dyn EventSink>,
    future: F,
) -> Result<T, InvocationError>
where
    F: Future<Output = Result<T, FunctionError>> + Send + 'static,
    T: Send + 'static,
{
    let redirect = ctx.console.redirect(Arc::new(EventLog {
        sink: Arc::clone(sink),
    }));
    let result = match tokio::spawn(future).await {
        Ok(output) => output.map_err(InvocationError::from),
        Err(join_error) if join_error.is_panic() => {
            Err(InvocationError::Panic(join_error.to_string()))
        }
        Err(join_error) => Err(InvocationError::Panic(format!(
            "handler task ended abnormally: {join_error}"
        ))),
    };
    drop(redirect);
    result
}

/// Per-process state of the ephemeral HTTP listener.
struct HttpsShared {
    handler: Arc<dyn HttpsFunction>,
    ctx: Arc<InvokeContext>,
    sink: Arc<dyn EventSink>,
    done: Mutex<Option<oneshot::Sender<()>>>,
    outcome: Mutex<Option<Result<(), InvocationError>>>,
}

fn to_response(res: HttpsResponse) -> Response {
    let mut builder = Response::builder().status(res.status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(res.headers);
    }
    builder
        .body(Body::from(res.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_invocation(State(shared): State<Arc<HttpsShared>>, request: Request) -> Response {
    shared
        .sink
        .emit(&StatusEvent::debug("runtime-status", "Ephemeral listener used."));

    let (parts, body) = request.into_parts();
    // Buffer the complete raw body before any structured parsing; signature
    // verification downstream needs the exact bytes.
    let raw_body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    shared.sink.emit(&StatusEvent::debug(
        "runtime-status",
        format!("Request body: {} bytes", raw_body.len()),
    ));

    let is_json = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    let parsed = if is_json {
        serde_json::from_slice(&raw_body).ok()
    } else {
        None
    };

    let req = HttpsRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_owned(),
        headers: parts.headers.clone(),
        raw_body,
        body: parsed,
    };

    let handler = Arc::clone(&shared.handler);
    let ctx = Arc::clone(&shared.ctx);
    let result = run_guarded(&shared.ctx, &shared.sink, async move {
        handler.handle(ctx, req).await
    })
    .await;

    let response = match &result {
        Ok(res) => to_response(res.clone()),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    *shared.outcome.lock() = Some(result.map(|_| ()));
    if let Some(done) = shared.done.lock().take() {
        let _ = done.send(());
    }
    response
}

/// Runs one invocation from bundle to summary.
pub struct Dispatcher {
    bundle: InvocationBundle,
    sink: Arc<dyn EventSink>,
    provider: Arc<dyn ModuleProvider>,
    terminator: Arc<dyn Terminate>,
}

impl Dispatcher {
    /// Assemble a dispatcher for one bundle.
    pub fn new(
        bundle: InvocationBundle,
        sink: Arc<dyn EventSink>,
        provider: Arc<dyn ModuleProvider>,
        terminator: Arc<dyn Terminate>,
    ) -> Self {
        Self {
            bundle,
            sink,
            provider,
            terminator,
        }
    }

    /// Drive the invocation to a terminal state.
    pub async fn run(&self) -> DispatchOutcome {
        let bundle = &self.bundle;
        self.sink.emit(
            &StatusEvent::debug("runtime-status", "Functions runtime initialized.").with_data(
                json!({
                    "cwd": bundle.cwd.display().to_string(),
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            ),
        );
        if let Some(trigger_id) = &bundle.trigger_id {
            self.sink.emit(&StatusEvent::info(
                "runtime-status",
                format!("Beginning execution of \"{trigger_id}\""),
            ));
        }
        self.sink.emit(
            &StatusEvent::debug("runtime-status", "Disabled runtime features.").with_data(json!({
                "disabledFeatures": &bundle.disabled_features,
            })),
        );

        if verify_project(&bundle.cwd, self.sink.as_ref()).is_err() {
            // Something bad would happen at runtime; leave before any user
            // code is reachable.
            self.sink.emit(&StatusEvent::info(
                "runtime-status",
                "The functions project could not be verified (see above); leaving.",
            ));
            return DispatchOutcome::SetupRefused;
        }

        let env = EnvContext::prepare(bundle, bundle.feature_enabled(Feature::ProtectEnv));
        let sdk = SdkHarness::install(bundle, &env, &self.sink);

        let module = match self.provider.load() {
            Ok(module) => module,
            Err(err) => {
                resolution_detective(&bundle.cwd, &err.to_string(), self.sink.as_ref());
                self.sink.emit(&StatusEvent::fatal(
                    "runtime-status",
                    format!("Functions module failed to load: {err}"),
                ));
                return DispatchOutcome::Failed;
            }
        };

        let definitions = module.triggers();
        let triggers = TriggerMap::from_definitions(definitions.clone(), &module);
        self.sink.emit(
            &StatusEvent::system("triggers-parsed", "")
                .with_data(json!({"triggerDefinitions": definitions})),
        );

        let Some(trigger_id) = bundle.trigger_id.clone() else {
            // A bundle without a trigger id is a pure load/compile check;
            // there is nothing to invoke.
            return DispatchOutcome::DiagnosticOnly;
        };

        let Some(trigger) = triggers.get(&trigger_id) else {
            self.sink.emit(&StatusEvent::fatal(
                "runtime-status",
                format!("Could not find trigger \"{trigger_id}\" in your functions module."),
            ));
            return DispatchOutcome::TriggerNotFound;
        };
        self.sink.emit(
            &StatusEvent::debug("runtime-status", "")
                .with_data(json!({"definition": &trigger.definition})),
        );

        let handler = match trigger.handler() {
            Ok(handler) => handler,
            Err(err) => {
                self.sink
                    .emit(&StatusEvent::fatal("runtime-status", err.to_string()));
                return DispatchOutcome::Failed;
            }
        };

        let mode = if trigger.definition.is_https() {
            "HTTPS"
        } else {
            "BACKGROUND"
        };
        self.sink.emit(&StatusEvent::debug(
            "runtime-status",
            format!("Running {trigger_id} in mode {mode}"),
        ));

        sdk.ensure_default_app(&self.sink);

        let ctx = Arc::new(InvokeContext {
            admin: Arc::clone(&sdk.admin),
            config: Arc::clone(&sdk.config),
            transports: Arc::clone(&sdk.transports),
            console: Console::new(),
            env: Arc::clone(&env),
        });

        let heartbeat = Heartbeat::start();
        let watchdog = if bundle.feature_enabled(Feature::Timeout) {
            let sink = Arc::clone(&self.sink);
            let terminator = Arc::clone(&self.terminator);
            let timeout = Duration::from_millis(trigger.timeout_ms());
            let timeout_secs = trigger.timeout_ms() / 1000;
            Some(Watchdog::arm(timeout, move || {
                sink.emit(&StatusEvent::warn(
                    "runtime-status",
                    format!(
                        "Your function timed out after ~{timeout_secs}s. Configure the \
                         timeout in the trigger's deployment options."
                    ),
                ));
                terminator.terminate(1);
            }))
        } else {
            None
        };

        let result = match (trigger.definition.is_https(), handler) {
            (true, Handler::Https(https)) => self.serve_https(https, &ctx).await,
            (false, Handler::Background(background)) => {
                self.run_background(trigger, background, &ctx).await
            }
            _ => Err(RunError::Internal(format!(
                "trigger '{trigger_id}' resolved to a handler of the wrong kind"
            ))),
        };

        if let Some(watchdog) = &watchdog {
            watchdog.disarm();
        }
        let seconds = heartbeat.seconds().max(1);
        drop(heartbeat);

        match result {
            Ok(()) => {
                self.sink.emit(
                    &StatusEvent::info(
                        "runtime-status",
                        format!("Finished \"{trigger_id}\" in ~{seconds}s"),
                    )
                    .with_data(json!({"seconds": seconds})),
                );
                DispatchOutcome::Completed { seconds }
            }
            Err(RunError::Invocation(err)) => {
                self.sink
                    .emit(&StatusEvent::fatal("runtime-error", err.to_string()));
                DispatchOutcome::Failed
            }
            Err(RunError::Internal(message)) => {
                self.sink.emit(&StatusEvent::fatal("runtime-error", message));
                DispatchOutcome::Failed
            }
        }
    }

    async fn run_background(
        &self,
        trigger: &Trigger,
        handler: Arc<dyn BackgroundFunction>,
        ctx: &Arc<InvokeContext>,
    ) -> Result<(), RunError> {
        self.sink
            .emit(&StatusEvent::system("runtime-status", "ready"));

        let payload = self.bundle.payload.clone().unwrap_or(Value::Null);
        let payload = legacy::prepare_payload(
            trigger.definition.service().as_deref(),
            payload,
            self.sink.as_ref(),
        );
        self.sink.emit(&StatusEvent::debug(
            "runtime-status",
            format!("Invoking background function with payload: {payload}"),
        ));

        let ctx_for_handler = Arc::clone(ctx);
        run_guarded(ctx, &self.sink, async move {
            handler.handle(ctx_for_handler, payload).await
        })
        .await?;
        Ok(())
    }

    async fn serve_https(
        &self,
        handler: Arc<dyn HttpsFunction>,
        ctx: &Arc<InvokeContext>,
    ) -> Result<(), RunError> {
        let socket_path = invocation_socket_path();
        // A stale socket from a crashed twin would fail the bind.
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .map_err(|err| RunError::Internal(format!("ephemeral listener bind failed: {err}")))?;

        let (done_tx, done_rx) = oneshot::channel();
        let shared = Arc::new(HttpsShared {
            handler,
            ctx: Arc::clone(ctx),
            sink: Arc::clone(&self.sink),
            done: Mutex::new(Some(done_tx)),
            outcome: Mutex::new(None),
        });

        let project = &self.bundle.project_id;
        let trigger_id = self.bundle.trigger_id.as_deref().unwrap_or_default();
        let router = Router::new()
            .route(&format!("/{project}/{trigger_id}"), any(handle_invocation))
            .route(
                &format!("/{project}/{trigger_id}/{{*rest}}"),
                any(handle_invocation),
            )
            .route(
                &format!("/{project}/{{region}}/{trigger_id}"),
                any(handle_invocation),
            )
            .route(
                &format!("/{project}/{{region}}/{trigger_id}/{{*rest}}"),
                any(handle_invocation),
            )
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(Arc::clone(&shared));

        self.sink.emit(
            &StatusEvent::system("runtime-status", "ready")
                .with_data(json!({"socketPath": socket_path.display().to_string()})),
        );

        let serve_result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = done_rx.await;
            })
            .await;
        let _ = std::fs::remove_file(&socket_path);
        serve_result
            .map_err(|err| RunError::Internal(format!("ephemeral listener failed: {err}")))?;

        match shared.outcome.lock().take() {
            Some(result) => result.map_err(RunError::from),
            // The listener resolved without an invocation outcome; nothing
            // failed, nothing ran.
            None => Ok(()),
        }
    }
}

/// Private, per-process listener path, not a routable port.
fn invocation_socket_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("stratus_invocation_{}.sock", std::process::id()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(DispatchOutcome::SetupRefused.exit_code(), 0);
        assert_eq!(DispatchOutcome::DiagnosticOnly.exit_code(), 0);
        assert_eq!(DispatchOutcome::Completed { seconds: 3 }.exit_code(), 0);
        assert_eq!(DispatchOutcome::TriggerNotFound.exit_code(), 1);
        assert_eq!(DispatchOutcome::Failed.exit_code(), 1);
    }

    #[tokio::test]
    async fn watchdog_fires_after_timeout() {
        let fired = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&fired);
        let _watchdog = Watchdog::arm(Duration::from_millis(10), move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disarmed_watchdog_never_fires() {
        let fired = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&fired);
        let watchdog = Watchdog::arm(Duration::from_millis(10), move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        watchdog.disarm();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_watchdog_never_fires() {
        let fired = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&fired);
        {
            let _watchdog = Watchdog::arm(Duration::from_millis(10), move || {
                observed.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn heartbeat_counts_whole_seconds() {
        tokio::time::pause();
        let heartbeat = Heartbeat::start();
        // Let the counting task park on its first pending tick.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(2_500)).await;
        // Let the counting task observe the advanced clock.
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(heartbeat.seconds(), 2);
    }
}
