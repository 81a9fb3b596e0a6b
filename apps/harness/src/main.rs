//! The per-invocation harness process.
//!
//! Spawned by the supervising emulator server with the serialized bundle as
//! the first argument and, optionally, an inline module unit as the second.
//! Everything the supervisor learns comes through the status stream on
//! stdout; internal diagnostics go to stderr.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use stratus_core::bundle::InvocationBundle;
use stratus_core::event::{EventSink, StatusEvent};
use stratus_runtime::dispatch::{Dispatcher, ProcessExit};
use stratus_runtime::loader::{DirectoryProvider, InlineUnitProvider, ModuleProvider};
use stratus_runtime::reporter::LineReporter;

#[derive(Debug, Parser)]
#[command(name = "stratus-harness", version, about)]
struct Args {
    /// Serialized invocation bundle.
    bundle: Option<String>,

    /// Serialized inline module unit, loaded in place of the project's
    /// built module when present.
    inline_unit: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let sink: Arc<dyn EventSink> = Arc::new(LineReporter::stdout());

    let raw_bundle = args.bundle.unwrap_or_else(|| "{}".to_owned());
    let bundle = match InvocationBundle::decode(&raw_bundle) {
        Ok(bundle) => bundle,
        Err(err) => {
            // A bundle we cannot read is a setup failure: report and leave
            // cleanly, nothing was ever going to run.
            sink.emit(&StatusEvent::system("malformed-bundle", err.to_string()));
            return ExitCode::SUCCESS;
        }
    };

    let provider: Arc<dyn ModuleProvider> = match args.inline_unit.as_deref() {
        Some(raw) => match InlineUnitProvider::from_json(raw) {
            Ok(provider) => Arc::new(provider),
            Err(err) => {
                sink.emit(&StatusEvent::fatal("runtime-status", err.to_string()));
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(DirectoryProvider::new(bundle.cwd.clone())),
    };

    let dispatcher = Dispatcher::new(bundle, sink, provider, Arc::new(ProcessExit));
    let outcome = dispatcher.run().await;
    tracing::debug!(?outcome, "invocation finished");
    ExitCode::from(outcome.exit_code() as u8)
}
