//! Common imports for vizeval usage.
//!
//! ```
//! use vizeval::prelude::*;
//! ```

pub use crate::adapter::RigProvider;
pub use crate::errors::Error;

pub use vizeval_client::{Evaluator, EvaluatorRegistry, VizevalClient};

pub use vizeval_gate::{
    ChatMessage, CompletionProvider, CompletionRequest, EvaluationService, GateConfig, GateError,
    GatedProvider, GatedResponse, GenerationParams, GenerationResult, Orchestrator,
    ResultEnvelope, TemperatureRamp,
};
