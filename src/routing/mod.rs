pub mod prepare;

use std::sync::LazyLock;

use regex_lite::Regex;
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::config::RoutingConfig;

pub const ANTHROPIC: &str = "anthropic";
pub const OPENAI: &str = "openai";

/// `<name>-reason[ing][-effort]-<effort>` model aliases.
static REASONING_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+)-reason(ing)?(-effort)?-(?P<effort>\w+)$")
        .expect("reasoning alias pattern is valid")
});
static GPT5_TYPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgpt5\b").expect("gpt5 pattern is valid"));

/// The resolved target for a requested model name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRoute {
    pub requested_model: String,
    /// `provider/model`, ready to hand to the upstream client.
    pub target_model: String,
    /// Parameters implied by the alias, such as `reasoning_effort`.
    pub extra_params: Map<String, Value>,
    pub is_target_anthropic: bool,
    pub use_responses_api: bool,
}

impl ModelRoute {
    /// Provider prefix of the target model.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.target_model
            .split_once('/')
            .map_or("", |(provider, _)| provider)
    }

    /// Target model name without the provider prefix.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.target_model
            .split_once('/')
            .map_or(self.target_model.as_str(), |(_, name)| name)
    }
}

/// Resolves requested model names into [`ModelRoute`]s.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    remap_haiku_to: Option<String>,
    remap_sonnet_to: Option<String>,
    remap_opus_to: Option<String>,
    always_use_responses_api: bool,
    responses_only_models: FxHashSet<String>,
}

impl ModelRouter {
    /// Build a router from the routing section of the configuration.
    #[must_use]
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            remap_haiku_to: config.remap_haiku_to.clone(),
            remap_sonnet_to: config.remap_sonnet_to.clone(),
            remap_opus_to: config.remap_opus_to.clone(),
            always_use_responses_api: config.always_use_responses_api,
            responses_only_models: config.responses_only_models.iter().cloned().collect(),
        }
    }

    /// Route a requested model name.
    pub fn route(&self, requested_model: &str) -> ModelRoute {
        let trimmed = requested_model.trim();
        let remapped = self.remap_claude(trimmed).unwrap_or(trimmed);
        let (target_model, extra_params) = self.resolve_for_provider(remapped);

        let mut route = ModelRoute {
            requested_model: requested_model.to_string(),
            target_model,
            extra_params,
            is_target_anthropic: false,
            use_responses_api: false,
        };
        route.is_target_anthropic = route.provider() == ANTHROPIC;
        route.use_responses_api = self.always_use_responses_api
            || self.responses_only_models.contains(route.model_name());

        if route.extra_params.is_empty() {
            tracing::info!(requested = requested_model, target = %route.target_model, "routed model");
        } else {
            tracing::info!(
                requested = requested_model,
                target = %route.target_model,
                extra = %serde_json::Value::Object(route.extra_params.clone()),
                "routed model"
            );
        }
        route
    }

    /// Remap a `claude-*` name by family when the matching remap is set.
    /// Unknown families fall back to the sonnet remap.
    fn remap_claude(&self, model: &str) -> Option<&str> {
        if !model.starts_with("claude-") {
            return None;
        }
        let remap = if model.contains("haiku") {
            &self.remap_haiku_to
        } else if model.contains("opus") {
            &self.remap_opus_to
        } else {
            &self.remap_sonnet_to
        };
        remap.as_deref()
    }

    /// Prefix the provider and expand reasoning-effort aliases.
    fn resolve_for_provider(&self, model: &str) -> (String, Map<String, Value>) {
        let model = model.trim();
        let (explicit_provider, mut name) = match model.split_once('/') {
            Some((provider, name)) => (Some(provider), name.to_string()),
            None => (None, model.to_string()),
        };

        let mut extra_params = Map::new();
        if let Some(caps) = REASONING_ALIAS.captures(&name) {
            let base = caps.name("name").map(|m| m.as_str().to_string());
            let effort = caps.name("effort").map(|m| m.as_str().to_string());
            if let (Some(base), Some(effort)) = (base, effort) {
                extra_params.insert("reasoning_effort".into(), Value::String(effort));
                name = base;
            }
        }

        let name = GPT5_TYPO.replace_all(&name, "gpt-5").into_owned();

        let target = match explicit_provider {
            Some(provider) if !provider.is_empty() => format!("{provider}/{name}"),
            _ if name.starts_with("claude-") => format!("{ANTHROPIC}/{name}"),
            _ => format!("{OPENAI}/{name}"),
        };
        (target, extra_params)
    }
}
