// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cache Policy, Status, and Backend Contract
//!
//! This module defines the pure data model for the cache read/write layer
//! (C3): the policy a step is governed by, the per-invocation status it
//! observes, the key type, the persisted envelope, and the backend SPI an
//! infrastructure adapter implements. Key derivation strategies and the
//! read-through/write-through algorithm itself live in `pipeline-runtime`
//! (they need an async backend and a registry of strategies, which is an
//! infrastructure concern); this crate only fixes the vocabulary every
//! collaborator must agree on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Governs whether the cache is read/written and whether a miss is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachePolicy {
    ReturnCached,
    RequireCache,
    SkipIfPresent,
    CacheOnly,
    BypassCache,
}

impl CachePolicy {
    /// Maps a configuration string to a policy. Unknown strings default to
    /// `CACHE_ONLY` - the step still runs and its result is cached, which is
    /// the least surprising fallback for a typo'd policy name - and the
    /// caller is expected to log a warning (the domain crate has no logger;
    /// see `pipeline_runtime::infrastructure::logging`).
    pub fn from_config(value: &str) -> (Self, bool) {
        match value.trim() {
            "RETURN_CACHED" | "return_cached" => (Self::ReturnCached, true),
            "REQUIRE_CACHE" | "require_cache" => (Self::RequireCache, true),
            "SKIP_IF_PRESENT" | "skip_if_present" => (Self::SkipIfPresent, true),
            "CACHE_ONLY" | "cache_only" => (Self::CacheOnly, true),
            "BYPASS_CACHE" | "bypass_cache" => (Self::BypassCache, true),
            _ => (Self::CacheOnly, false),
        }
    }

    /// Whether the read-through contract should attempt a lookup at all
    /// (step 2 of §4.3).
    pub fn attempts_read(&self) -> bool {
        matches!(self, Self::ReturnCached | Self::RequireCache)
    }
}

/// Per-invocation observable recorded by the `CacheStatusHolder` in the
/// active context scope (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheStatus {
    Hit,
    Miss,
    Write,
    Bypass,
    None,
}

/// A string key, optionally prefixed by `versionTag + ":"` (P6). The prefix
/// is applied once, at resolution time, never re-applied on read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the effective key from a trimmed base key and an optional
    /// version tag. Returns `None` if the trimmed base key is blank -
    /// "not resolved" per §4.3.
    pub fn resolve(base_key: &str, version_tag: Option<&str>) -> Option<Self> {
        let trimmed = base_key.trim();
        if trimmed.is_empty() {
            return None;
        }
        let key = match version_tag.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => format!("{tag}:{trimmed}"),
            None => trimmed.to_string(),
        };
        Some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declares the target type a step's cache key should be derived for. Key
/// strategies that support this target are tried first (§4.3); if none
/// yields a non-blank key, all strategies are tried in priority order.
pub trait CacheKeyTarget {
    fn cache_key_target(&self) -> &'static str;
}

/// Wire encoding of a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Protobuf,
}

/// The persisted envelope: a fully-qualified type name (for parser
/// selection on read), the payload, and its encoding. Protobuf payloads are
/// base64 of the binary form when the envelope itself is serialized as JSON;
/// JSON payloads are UTF-8 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(rename = "type")]
    pub type_name: String,
    pub payload: String,
    pub encoding: Encoding,
}

impl CacheEnvelope {
    pub fn json(type_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            payload: payload.into(),
            encoding: Encoding::Json,
        }
    }

    pub fn protobuf(type_name: impl Into<String>, binary: &[u8]) -> Self {
        use base64::Engine;
        Self {
            type_name: type_name.into(),
            payload: base64::engine::general_purpose::STANDARD.encode(binary),
            encoding: Encoding::Protobuf,
        }
    }
}

/// The SPI an infrastructure adapter implements to back the cache layer
/// (§6). All backend faults are the caller's responsibility to log and
/// swallow; this trait itself just surfaces `Result` so a backend can report
/// them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEnvelope>, PipelineError>;
    async fn exists(&self, key: &CacheKey) -> Result<bool, PipelineError>;
    async fn cache(
        &self,
        key: &CacheKey,
        value: CacheEnvelope,
        ttl: Option<std::time::Duration>,
    ) -> Result<CacheEnvelope, PipelineError>;
    async fn invalidate(&self, key: &CacheKey) -> Result<bool, PipelineError>;
    async fn invalidate_by_prefix(&self, prefix: &str) -> Result<u64, PipelineError>;
}
