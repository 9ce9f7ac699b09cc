//! Evaluator identifiers and the registry of identifiers the service accepts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::VizevalError;

/// Scoring policy applied by the evaluation service.
///
/// The built-in variants are always recognized. `Custom` identifiers are
/// only valid once registered in an [`EvaluatorRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Evaluator {
    /// Medical and health content.
    #[default]
    Medical,
    /// Legal content.
    Juridical,
    /// Test evaluator returning random scores.
    Dummy,
    /// Identifier added through [`EvaluatorRegistry::register`].
    Custom(String),
}

impl Evaluator {
    /// Wire identifier sent to the service.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Medical => "medical",
            Self::Juridical => "juridical",
            Self::Dummy => "dummy",
            Self::Custom(id) => id,
        }
    }

    /// Whether this is one of the built-in variants.
    #[must_use]
    pub const fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl From<String> for Evaluator {
    fn from(id: String) -> Self {
        match id.as_str() {
            "medical" => Self::Medical,
            "juridical" => Self::Juridical,
            "dummy" => Self::Dummy,
            _ => Self::Custom(id),
        }
    }
}

impl From<&str> for Evaluator {
    fn from(id: &str) -> Self {
        Self::from(id.to_string())
    }
}

impl From<Evaluator> for String {
    fn from(evaluator: Evaluator) -> Self {
        match evaluator {
            Evaluator::Custom(id) => id,
            builtin => builtin.id().to_string(),
        }
    }
}

/// Defaults and description attached to an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorInfo {
    /// Threshold recommended for this evaluator.
    pub default_threshold: f64,
    /// Short description of what the evaluator grades.
    pub description: String,
    /// Aspects the evaluator focuses on.
    pub focus: Vec<String>,
}

impl EvaluatorInfo {
    /// Creates an info entry.
    #[must_use]
    pub fn new(default_threshold: f64, description: impl Into<String>, focus: &[&str]) -> Self {
        Self {
            default_threshold,
            description: description.into(),
            focus: focus.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

/// Set of evaluator identifiers recognized by the service.
#[derive(Debug, Clone)]
pub struct EvaluatorRegistry {
    entries: BTreeMap<String, EvaluatorInfo>,
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EvaluatorRegistry {
    /// Registry holding only the built-in evaluators.
    #[must_use]
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Evaluator::Medical.id().to_string(),
            EvaluatorInfo::new(
                0.8,
                "Specialized evaluation of medical and health content",
                &[
                    "medical hallucinations",
                    "factually incorrect information",
                    "dangerous medical advice",
                ],
            ),
        );
        entries.insert(
            Evaluator::Juridical.id().to_string(),
            EvaluatorInfo::new(
                0.7,
                "Specialized evaluation of legal content",
                &["legal accuracy", "case law", "statute interpretation"],
            ),
        );
        entries.insert(
            Evaluator::Dummy.id().to_string(),
            EvaluatorInfo::new(
                0.5,
                "Test evaluator with random scoring",
                &["testing", "development"],
            ),
        );
        Self { entries }
    }

    /// Registers an identifier and returns the evaluator it resolves to.
    ///
    /// Registering a built-in identifier replaces its info.
    pub fn register(&mut self, id: impl Into<String>, info: EvaluatorInfo) -> Evaluator {
        let id = id.into();
        self.entries.insert(id.clone(), info);
        Evaluator::from(id)
    }

    /// Resolves a raw identifier.
    pub fn resolve(&self, id: &str) -> Result<Evaluator, VizevalError> {
        if self.entries.contains_key(id) {
            Ok(Evaluator::from(id))
        } else {
            Err(self.unknown(id))
        }
    }

    /// Whether the evaluator may be sent to the service.
    #[must_use]
    pub fn recognizes(&self, evaluator: &Evaluator) -> bool {
        self.entries.contains_key(evaluator.id())
    }

    /// Fails with [`VizevalError::UnknownEvaluator`] if the evaluator is not registered.
    pub fn ensure(&self, evaluator: &Evaluator) -> Result<(), VizevalError> {
        if self.recognizes(evaluator) {
            Ok(())
        } else {
            Err(self.unknown(evaluator.id()))
        }
    }

    /// Info for a registered evaluator.
    #[must_use]
    pub fn info(&self, evaluator: &Evaluator) -> Option<&EvaluatorInfo> {
        self.entries.get(evaluator.id())
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Registered evaluators with their info, in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (Evaluator, &EvaluatorInfo)> {
        self.entries
            .iter()
            .map(|(id, info)| (Evaluator::from(id.as_str()), info))
    }

    fn unknown(&self, id: &str) -> VizevalError {
        VizevalError::UnknownEvaluator {
            id: id.to_string(),
            available: self.ids().collect::<Vec<_>>().join(", "),
        }
    }
}
