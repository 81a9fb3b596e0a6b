#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Core
//!
//! Data model for the Stratus invocation harness — the process the emulator
//! server spawns once per function invocation.
//!
//! This crate holds the types that cross crate boundaries; it contains no
//! behavior beyond decoding and derivation:
//!
//! - [`InvocationBundle`] — the immutable startup payload describing one invocation
//! - [`Feature`] — runtime features, enabled by default and disabled per bundle
//! - [`TriggerDefinition`] and [`TriggerKind`] — static descriptors of one function
//! - [`StatusEvent`] and [`EventSink`] — the structured harness → supervisor stream
//! - Error taxonomy: [`SetupError`], [`ResolutionError`], [`InvocationError`]

pub mod bundle;
pub mod error;
pub mod event;
pub mod trigger;

pub use bundle::{EmulatedPorts, Feature, InvocationBundle};
pub use error::{FunctionError, InvocationError, ResolutionError, SetupError};
pub use event::{CollectorSink, EventSink, Level, NullSink, StatusEvent};
pub use trigger::{
    DEFAULT_REGION, DOCSTORE_SERVICE, EventTrigger, MANAGED_API_DOMAIN, MemoryTier, TimeoutSpec,
    TriggerDefinition, TriggerKind,
};
