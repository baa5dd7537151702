// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aspects and Synthetic Identity (C7)
//!
//! An [`Aspect`] declares a cross-cutting concern that expands into
//! identity-preserving side-effect steps at one or more target positions.
//! Expansion itself (producing the synthetic [`StepInstance`]s and wiring
//! them into the step list) is a runner concern implemented in
//! `pipeline-runtime`; this module fixes the declaration shape and the
//! [`SyntheticId`] format every synthetic step is named with.

use crate::step::StepId;

/// Where, relative to its target step, a synthetic step is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    BeforeStep,
    AfterStep,
}

/// Which steps an aspect targets. `Steps` is accepted but coerced to
/// `Global` with a warning (§4.7, §9 Open Question - STEPS-scoped aspects
/// remain deferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Steps,
}

impl Scope {
    /// Normalizes `Steps` to `Global`, returning whether a warning should be
    /// logged for the coercion.
    pub fn normalize(self) -> (Self, bool) {
        match self {
            Self::Global => (Self::Global, false),
            Self::Steps => (Self::Global, true),
        }
    }
}

/// Stable identifier for an aspect, as named in `AspectId.Type` synthetic
/// ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AspectId(pub String);

impl AspectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AspectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared cross-cutting concern.
#[derive(Debug, Clone)]
pub struct Aspect {
    pub id: AspectId,
    /// The synthetic step type this aspect materializes, e.g. `"Metrics"`,
    /// `"Tracing"`, `"Persistence"`.
    pub synthetic_type: String,
    pub position: Position,
    pub scope: Scope,
    /// Explicit target steps when `scope` narrows to specific steps (used
    /// only after `Scope::normalize`'s coercion is accounted for by the
    /// caller; `Global` aspects target every step in the pipeline).
    pub targets: Vec<StepId>,
}

impl Aspect {
    pub fn new(id: impl Into<String>, synthetic_type: impl Into<String>, position: Position, scope: Scope) -> Self {
        Self {
            id: AspectId::new(id),
            synthetic_type: synthetic_type.into(),
            position,
            scope,
            targets: Vec::new(),
        }
    }

    pub fn with_targets(mut self, targets: Vec<StepId>) -> Self {
        self.targets = targets;
        self
    }
}

/// Disambiguation suffix applied when multiple synthetic instances share the
/// same `(AspectId, Type)` (I5, §4.7). Order is significant: `Before` sorts
/// before `After`, which sorts before `Around`, which sorts before any
/// numeric index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyntheticSuffix {
    Before,
    After,
    Around,
    Index(usize),
}

impl std::fmt::Display for SyntheticSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "@before"),
            Self::After => write!(f, "@after"),
            Self::Around => write!(f, "@around"),
            Self::Index(i) => write!(f, "@{i}"),
        }
    }
}

/// Canonical identifier for a synthetic step: `"<AspectId>.<Type>"`,
/// optionally suffixed to disambiguate multiple instances (I5).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyntheticId {
    canonical: String,
    suffix: Option<SyntheticSuffix>,
}

impl SyntheticId {
    pub fn new(aspect_id: &AspectId, synthetic_type: &str) -> Self {
        Self {
            canonical: format!("{aspect_id}.{synthetic_type}"),
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: SyntheticSuffix) -> Self {
        self.suffix = Some(suffix);
        self
    }

    /// The unsuffixed `"<AspectId>.<Type>"` form, used to look up whether
    /// exactly one instance exists (I5).
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The fully-qualified id as it appears in mapping files and telemetry,
    /// e.g. `"metrics.Tracing@before"` or just `"metrics.Tracing"` when
    /// unambiguous.
    pub fn qualified(&self) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}{}", self.canonical, suffix),
            None => self.canonical.clone(),
        }
    }
}

impl std::fmt::Display for SyntheticId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_ordering_matches_disambiguation_order() {
        let mut suffixes = vec![
            SyntheticSuffix::Index(1),
            SyntheticSuffix::Around,
            SyntheticSuffix::Before,
            SyntheticSuffix::After,
            SyntheticSuffix::Index(0),
        ];
        suffixes.sort();
        assert_eq!(
            suffixes,
            vec![
                SyntheticSuffix::Before,
                SyntheticSuffix::After,
                SyntheticSuffix::Around,
                SyntheticSuffix::Index(0),
                SyntheticSuffix::Index(1),
            ]
        );
    }

    #[test]
    fn qualified_id_appends_suffix() {
        let aspect = AspectId::new("metrics");
        let id = SyntheticId::new(&aspect, "Tracing").with_suffix(SyntheticSuffix::Before);
        assert_eq!(id.qualified(), "metrics.Tracing@before");
        assert_eq!(id.canonical(), "metrics.Tracing");
    }
}
