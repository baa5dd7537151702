// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Placement Resolver (C8, §4.8)
//!
//! Parses the runtime mapping document (§6: `pipeline.runtime.yaml`) into
//! [`RuntimeMapping`], resolves every known step and synthetic id to a
//! module and runtime, and validates the result against the eight
//! deterministic `RUNTIME_MAP_*` error codes. A missing mapping file falls
//! back to [`RuntimeMapping::default`] (MODULAR layout, AUTO validation,
//! per-step module default, plugin synthetic default) rather than failing -
//! the resolver is meant to degrade gracefully for a single-module
//! deployment that never declared a mapping at all.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use pipeline_runtime_domain::aspect::SyntheticId;
use pipeline_runtime_domain::error::{PipelineError, ResolverErrorCode};
use pipeline_runtime_domain::mapping::{
    CallLocality, Defaults, Layout, ModuleDefault, Placement, RuntimeMapping, SyntheticModuleDefault, SyntheticPlacement, Validation,
};
use pipeline_runtime_domain::step::StepId;

#[derive(Debug, Deserialize)]
struct RawDoc {
    version: u32,
    #[serde(default)]
    layout: Layout,
    #[serde(default)]
    validation: Validation,
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    runtimes: HashMap<String, RawRuntimeEntry>,
    #[serde(default)]
    modules: HashMap<String, RawModuleEntry>,
    #[serde(default, deserialize_with = "deserialize_unique_steps")]
    steps: HashMap<String, RawPlacementEntry>,
    #[serde(default, deserialize_with = "deserialize_unique_synthetics")]
    synthetics: HashMap<String, RawPlacementEntry>,
}

/// Rejects a YAML mapping section that repeats the same key, which
/// `serde_yaml`'s default map deserialization otherwise silently collapses
/// to its last occurrence. The error message embeds
/// [`pipeline_runtime_domain::error::DUPLICATE_STEP_MARKER`] so
/// `From<serde_yaml::Error>` can route the failure to
/// `ResolverErrorCode::DuplicateStep`.
fn deserialize_unique_map<'de, D>(deserializer: D, section: &'static str) -> Result<HashMap<String, RawPlacementEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct UniqueMapVisitor {
        section: &'static str,
    }

    impl<'de> serde::de::Visitor<'de> for UniqueMapVisitor {
        type Value = HashMap<String, RawPlacementEntry>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "a map of unique ids to placement entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut out = HashMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, RawPlacementEntry>()? {
                if out.insert(key.clone(), value).is_some() {
                    return Err(serde::de::Error::custom(format!(
                        "{} '{key}' in '{}'",
                        pipeline_runtime_domain::error::DUPLICATE_STEP_MARKER,
                        self.section
                    )));
                }
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(UniqueMapVisitor { section })
}

fn deserialize_unique_steps<'de, D>(deserializer: D) -> Result<HashMap<String, RawPlacementEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_unique_map(deserializer, "steps")
}

fn deserialize_unique_synthetics<'de, D>(deserializer: D) -> Result<HashMap<String, RawPlacementEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_unique_map(deserializer, "synthetics")
}

#[derive(Debug, Deserialize)]
struct RawDefaults {
    #[serde(default = "default_runtime_name")]
    runtime: String,
    #[serde(default = "default_module_policy")]
    module: String,
    #[serde(default)]
    synthetic: RawSyntheticDefault,
}

impl Default for RawDefaults {
    fn default() -> Self {
        Self {
            runtime: default_runtime_name(),
            module: default_module_policy(),
            synthetic: RawSyntheticDefault::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSyntheticDefault {
    #[serde(default = "default_synthetic_module_policy")]
    module: String,
}

impl Default for RawSyntheticDefault {
    fn default() -> Self {
        Self {
            module: default_synthetic_module_policy(),
        }
    }
}

fn default_runtime_name() -> String {
    "default".to_string()
}
fn default_module_policy() -> String {
    "per-step".to_string()
}
fn default_synthetic_module_policy() -> String {
    "plugin".to_string()
}

#[derive(Debug, Deserialize)]
struct RawRuntimeEntry {
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModuleEntry {
    runtime: String,
}

#[derive(Debug, Deserialize)]
struct RawPlacementEntry {
    module: String,
}

/// Parses a runtime mapping document's text into the domain data model.
/// Syntax errors and unknown enum strings surface as a `Configuration`
/// error; resolution-phase validation happens later, in [`Resolver::resolve`].
pub fn parse_mapping(text: &str) -> Result<RuntimeMapping, PipelineError> {
    let raw: RawDoc = serde_yaml::from_str(text)?;

    let defaults = Defaults {
        runtime: raw.defaults.runtime,
        module: ModuleDefault::parse(&raw.defaults.module),
        synthetic_module: SyntheticModuleDefault::parse(&raw.defaults.synthetic.module),
    };

    Ok(RuntimeMapping {
        version: raw.version,
        layout: raw.layout,
        validation: raw.validation,
        defaults,
        runtimes: raw.runtimes.into_keys().collect(),
        modules: raw.modules.into_iter().map(|(k, v)| (k, v.runtime)).collect(),
        steps: raw.steps.into_iter().map(|(k, v)| (StepId::new(k), v.module)).collect(),
        synthetics: raw.synthetics.into_iter().map(|(k, v)| (k, v.module)).collect(),
    })
}

/// Loads the mapping at `path`, falling back to [`RuntimeMapping::default`]
/// when `path` is `None` or doesn't exist.
pub fn load_mapping(path: Option<&Path>) -> Result<RuntimeMapping, PipelineError> {
    match path {
        Some(p) if p.is_file() => {
            let text = std::fs::read_to_string(p)?;
            parse_mapping(&text)
        }
        _ => Ok(RuntimeMapping::default()),
    }
}

/// The fully resolved topology: every known step's and synthetic's
/// placement, in the order they were given to [`Resolver::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    pub steps: Vec<(StepId, Placement)>,
    pub synthetics: Vec<SyntheticPlacement>,
}

/// Resolves and validates a [`RuntimeMapping`] against a known set of step
/// and synthetic ids.
pub struct Resolver {
    mapping: RuntimeMapping,
}

impl Resolver {
    pub fn new(mapping: RuntimeMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &RuntimeMapping {
        &self.mapping
    }

    fn runtime_for_module(&self, module: &str) -> Result<String, PipelineError> {
        match self.mapping.modules.get(module) {
            Some(runtime) => {
                if !self.mapping.runtimes.contains(runtime) {
                    return Err(PipelineError::resolver(
                        ResolverErrorCode::UnknownRuntime,
                        format!("module '{module}' references undeclared runtime '{runtime}'"),
                    ));
                }
                Ok(runtime.clone())
            }
            None => Ok(self.mapping.defaults.runtime.clone()),
        }
    }

    fn module_for_step(&self, step: &StepId) -> String {
        match self.mapping.steps.get(step) {
            Some(module) => module.clone(),
            None => match &self.mapping.defaults.module {
                ModuleDefault::PerStep => step.as_str().to_string(),
                ModuleDefault::Shared => self.mapping.modules.keys().next().cloned().unwrap_or_else(|| "shared".to_string()),
                ModuleDefault::Named(name) => name.clone(),
            },
        }
    }

    fn module_for_synthetic(&self, id: &str) -> String {
        match self.mapping.synthetics.get(id) {
            Some(module) => module.clone(),
            None => match &self.mapping.defaults.synthetic_module {
                SyntheticModuleDefault::Plugin => "plugin".to_string(),
                SyntheticModuleDefault::PerStep => id.to_string(),
                SyntheticModuleDefault::Named(name) => name.clone(),
            },
        }
    }

    /// Resolves every step in `known_steps` (in order) and every synthetic in
    /// `known_synthetics` to a [`Placement`], then validates the result.
    pub fn resolve(&self, known_steps: &[StepId], known_synthetics: &[SyntheticId]) -> Result<ResolvedTopology, PipelineError> {
        let known_step_set: HashSet<&StepId> = known_steps.iter().collect();
        for step in self.mapping.steps.keys() {
            if !known_step_set.contains(step) {
                return Err(PipelineError::resolver(
                    ResolverErrorCode::UnknownStep,
                    format!("runtime mapping references unknown step '{step}'"),
                ));
            }
        }

        for module in self.mapping.steps.values().chain(self.mapping.synthetics.values()) {
            if !self.mapping.modules.contains_key(module) {
                return Err(PipelineError::resolver(
                    ResolverErrorCode::UnknownModule,
                    format!("entry references undeclared module '{module}'"),
                ));
            }
        }

        let mut placements: Vec<Placement> = Vec::with_capacity(known_steps.len());
        for step in known_steps {
            let module = self.module_for_step(step);
            let runtime = self.runtime_for_module(&module)?;
            placements.push(Placement {
                module,
                runtime,
                locality: CallLocality::InProcess,
            });
        }
        // Locality is relative to the next step in the chain: a hop to a
        // different module is network-bound, a hop within the same module
        // is in-process. The last step has no following hop.
        for i in 0..placements.len().saturating_sub(1) {
            let same_module = placements[i].module == placements[i + 1].module;
            placements[i].locality = if same_module { CallLocality::InProcess } else { CallLocality::NetworkBound };
        }
        let steps: Vec<(StepId, Placement)> = known_steps.iter().cloned().zip(placements).collect();

        if self.mapping.validation == Validation::Strict {
            for step in known_steps {
                if !self.mapping.steps.contains_key(step) {
                    return Err(PipelineError::resolver(
                        ResolverErrorCode::MissingStep,
                        format!("step '{step}' has no explicit placement under STRICT validation"),
                    ));
                }
            }
        }

        let mut canonical_counts: HashMap<&str, usize> = HashMap::new();
        for id in known_synthetics {
            *canonical_counts.entry(id.canonical()).or_insert(0) += 1;
        }

        let mut synthetics = Vec::with_capacity(known_synthetics.len());
        for id in known_synthetics {
            if canonical_counts[id.canonical()] > 1 && id.qualified() == id.canonical() {
                return Err(PipelineError::resolver(
                    ResolverErrorCode::SyntheticAmbiguous,
                    format!("synthetic id '{}' is ambiguous: multiple instances share this canonical id", id.canonical()),
                ));
            }
            let module = self.module_for_synthetic(&id.qualified());
            let runtime = self.runtime_for_module(&module)?;
            synthetics.push(SyntheticPlacement {
                id: id.clone(),
                placement: Placement {
                    module,
                    runtime,
                    locality: CallLocality::InProcess,
                },
            });
        }

        match self.mapping.layout {
            Layout::Monolith => {
                let modules: HashSet<&str> = steps
                    .iter()
                    .map(|(_, p)| p.module.as_str())
                    .chain(synthetics.iter().map(|s| s.placement.module.as_str()))
                    .collect();
                if modules.len() > 1 {
                    let mut names: Vec<&str> = modules.into_iter().collect();
                    names.sort_unstable();
                    return Err(PipelineError::resolver(
                        ResolverErrorCode::MonolithSplit,
                        format!("MONOLITH layout requires a single module, found: {}", names.join(", ")),
                    ));
                }
            }
            Layout::PipelineRuntime => {
                let runtimes: HashSet<&str> = steps.iter().map(|(_, p)| p.runtime.as_str()).collect();
                if runtimes.len() > 1 {
                    let mut names: Vec<&str> = runtimes.into_iter().collect();
                    names.sort_unstable();
                    return Err(PipelineError::resolver(
                        ResolverErrorCode::PipelineSplit,
                        format!("PIPELINE_RUNTIME layout requires a single runtime, found: {}", names.join(", ")),
                    ));
                }
            }
            Layout::Modular => {}
        }

        Ok(ResolvedTopology { steps, synthetics })
    }
}

/// Walks upward from `start_dir` to the nearest ancestor that declares
/// `aggregator_marker` (a build-config file naming that directory as the
/// aggregator root), then looks for exactly one `pipeline.runtime.yaml` or
/// `.yml` in that directory or its `config/` subdirectory. More than one
/// match is a fatal configuration error naming both paths.
pub fn locate_mapping_file(start_dir: &Path, aggregator_marker: &str) -> Result<Option<PathBuf>, PipelineError> {
    let mut dir = start_dir;
    loop {
        if dir.join(aggregator_marker).is_file() {
            return find_unique_mapping_file(dir);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Ok(None),
        }
    }
}

fn find_unique_mapping_file(dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let mut candidates = Vec::new();
    for base in [dir.to_path_buf(), dir.join("config")] {
        for name in ["pipeline.runtime.yaml", "pipeline.runtime.yml"] {
            let candidate = base.join(name);
            if candidate.is_file() {
                candidates.push(candidate);
            }
        }
    }
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates.remove(0))),
        _ => Err(PipelineError::configuration(format!(
            "multiple runtime mapping files found: {}",
            candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_runtime_domain::aspect::AspectId;

    #[test]
    fn missing_mapping_falls_back_to_defaults() {
        let mapping = load_mapping(None).unwrap();
        assert_eq!(mapping.layout, Layout::Modular);
        assert_eq!(mapping.validation, Validation::Auto);
    }

    #[test]
    fn parses_minimal_document() {
        let mapping = parse_mapping(
            r#"
            version: 1
            layout: modular
            validation: auto
            "#,
        )
        .unwrap();
        assert_eq!(mapping.version, 1);
        assert_eq!(mapping.layout, Layout::Modular);
    }

    #[test]
    fn per_step_default_names_module_after_step() {
        let resolver = Resolver::new(RuntimeMapping::default());
        let steps = vec![StepId::new("ingest"), StepId::new("transform")];
        let topology = resolver.resolve(&steps, &[]).unwrap();
        assert_eq!(topology.steps[0].1.module, "ingest");
        assert_eq!(topology.steps[1].1.module, "transform");
    }

    #[test]
    fn unknown_step_in_mapping_is_an_error() {
        let mut mapping = RuntimeMapping::default();
        mapping.steps.insert(StepId::new("ghost"), "m1".to_string());
        let resolver = Resolver::new(mapping);
        let result = resolver.resolve(&[StepId::new("real")], &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::UnknownStep, .. })
        ));
    }

    #[test]
    fn monolith_layout_rejects_split_placement() {
        let mut mapping = RuntimeMapping::default();
        mapping.layout = Layout::Monolith;
        mapping.runtimes.push("default".to_string());
        mapping.modules.insert("m1".to_string(), "default".to_string());
        mapping.modules.insert("m2".to_string(), "default".to_string());
        mapping.steps.insert(StepId::new("a"), "m1".to_string());
        mapping.steps.insert(StepId::new("b"), "m2".to_string());
        let resolver = Resolver::new(mapping);
        let result = resolver.resolve(&[StepId::new("a"), StepId::new("b")], &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::MonolithSplit, .. })
        ));
    }

    #[test]
    fn unknown_module_is_rejected_even_when_modules_section_is_absent() {
        let mut mapping = RuntimeMapping::default();
        mapping.steps.insert(StepId::new("a"), "bogus-module".to_string());
        let resolver = Resolver::new(mapping);
        let result = resolver.resolve(&[StepId::new("a")], &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::UnknownModule, .. })
        ));
    }

    #[test]
    fn unknown_runtime_is_rejected_even_when_runtimes_section_is_absent() {
        let mut mapping = RuntimeMapping::default();
        mapping.modules.insert("m1".to_string(), "bogus-runtime".to_string());
        mapping.steps.insert(StepId::new("a"), "m1".to_string());
        let resolver = Resolver::new(mapping);
        let result = resolver.resolve(&[StepId::new("a")], &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::UnknownRuntime, .. })
        ));
    }

    #[test]
    fn duplicate_step_key_in_yaml_is_rejected() {
        let result = parse_mapping(
            r#"
            version: 1
            steps:
              a: { module: m1 }
              a: { module: m2 }
            "#,
        );
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::DuplicateStep, .. })
        ));
    }

    #[test]
    fn ambiguous_synthetic_without_suffix_is_rejected() {
        let resolver = Resolver::new(RuntimeMapping::default());
        let aspect_id = AspectId::new("metrics");
        let duplicate = vec![SyntheticId::new(&aspect_id, "Tracing"), SyntheticId::new(&aspect_id, "Tracing")];
        let result = resolver.resolve(&[], &duplicate);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::SyntheticAmbiguous, .. })
        ));
    }

    #[test]
    fn strict_validation_requires_explicit_placement() {
        let mut mapping = RuntimeMapping::default();
        mapping.validation = Validation::Strict;
        let resolver = Resolver::new(mapping);
        let result = resolver.resolve(&[StepId::new("a")], &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolverValidation { code: ResolverErrorCode::MissingStep, .. })
        ));
    }
}
