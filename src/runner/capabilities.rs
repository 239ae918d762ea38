//! Capability dependencies and skip conditions
//!
//! Tests can `provide` capabilities that other tests `assume`. Provider
//! tests run first; a capability is verified when every provider passes
//! and failed as soon as one provider fails. Consumers of unverified or
//! failed capabilities are skipped, so observation tests don't produce
//! noise when the mechanism they observe with is itself broken.

use std::collections::{HashMap, HashSet};

/// State of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    /// Not yet tested
    Unverified,
    /// All providers passed
    Verified,
    /// At least one provider failed
    Failed,
}

#[derive(Debug)]
struct Capability {
    state: CapabilityState,
    providers: Vec<String>,
    passed_providers: HashSet<String>,
    failed_provider: Option<String>,
}

impl Capability {
    fn new() -> Self {
        Self {
            state: CapabilityState::Unverified,
            providers: Vec::new(),
            passed_providers: HashSet::new(),
            failed_provider: None,
        }
    }
}

/// Tracks capability providers and consumers across the whole run
#[derive(Debug, Default)]
pub struct CapabilityManager {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test as a provider of a capability
    pub fn register_provider(&mut self, capability: &str, test_id: &str) {
        self.capabilities
            .entry(capability.to_string())
            .or_insert_with(Capability::new)
            .providers
            .push(test_id.to_string());
    }

    /// Record a provider pass; the capability is verified once every
    /// provider has passed
    pub fn mark_passed(&mut self, capability: &str, test_id: &str) {
        if let Some(cap) = self.capabilities.get_mut(capability) {
            cap.passed_providers.insert(test_id.to_string());
            if cap.state != CapabilityState::Failed
                && cap.passed_providers.len() == cap.providers.len()
            {
                cap.state = CapabilityState::Verified;
            }
        }
    }

    /// Record a provider failure; the capability fails immediately
    pub fn mark_failed(&mut self, capability: &str, test_id: &str) {
        if let Some(cap) = self.capabilities.get_mut(capability) {
            cap.state = CapabilityState::Failed;
            if cap.failed_provider.is_none() {
                cap.failed_provider = Some(test_id.to_string());
            }
        }
    }

    /// Check whether a consumer of the given capabilities can run.
    /// Returns the skip reason when it cannot.
    pub fn can_run(&self, assumes: &[String]) -> Result<(), String> {
        for name in assumes {
            match self.capabilities.get(name).map(|c| c.state) {
                None => {
                    return Err(format!("assumes '{name}' which has no provider"));
                }
                Some(CapabilityState::Failed) => {
                    return Err(format!("assumes '{name}' which failed verification"));
                }
                Some(CapabilityState::Unverified) => {
                    return Err(format!("assumes '{name}' which is not yet verified"));
                }
                Some(CapabilityState::Verified) => {}
            }
        }
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<CapabilityState> {
        self.capabilities.get(name).map(|c| c.state)
    }
}

/// A parsed `skip_if` condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCondition {
    /// `feature.X` — skip when the feature is present
    Feature(String),
    /// `not feature.X` — skip when the feature is absent
    NotFeature(String),
    /// `missing builtin.f` — skip when the builtin is not implemented
    MissingBuiltin(String),
}

impl SkipCondition {
    /// Parse a `skip_if` string. Unknown forms are load-shaped errors
    /// surfaced when the test runs.
    pub fn parse(condition: &str) -> Result<Self, String> {
        let condition = condition.trim();
        if let Some(rest) = condition.strip_prefix("not feature.") {
            return Ok(SkipCondition::NotFeature(rest.trim().to_string()));
        }
        if let Some(rest) = condition.strip_prefix("feature.") {
            return Ok(SkipCondition::Feature(rest.trim().to_string()));
        }
        if let Some(rest) = condition.strip_prefix("missing builtin.") {
            return Ok(SkipCondition::MissingBuiltin(rest.trim().to_string()));
        }
        Err(format!("unsupported skip_if condition {condition:?}"))
    }

    /// The reason text used when the condition triggers a skip
    pub fn reason(&self) -> String {
        match self {
            SkipCondition::Feature(name) => format!("server has feature '{name}'"),
            SkipCondition::NotFeature(name) => format!("server lacks feature '{name}'"),
            SkipCondition::MissingBuiltin(name) => format!("builtin '{name}' not implemented"),
        }
    }
}
