//! Scenario-adapted system instructions
//!
//! [`PromptBuilder`] turns a stored scenario into the system instruction the
//! model runs under. Results are cached per scenario and base prompt.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStore, JsonCache, prompt_key};
use crate::character::{CharacterTraits, TraitRetriever};
use crate::config::GajiConfig;
use crate::resilience::{CircuitBreakerSnapshot, RetryPolicy, retry_transient, with_timeout};
use crate::scenario::{
    CharacterChange, EventAlteration, Scenario, ScenarioKind, ScenarioRecord, SettingModification,
};
use crate::store::{ScenarioStore, StoreError};
use crate::vector::VectorStore;
use crate::{CoreError, Result};

const SCENARIO_SERVICE: &str = "scenario_store";

/// A built system instruction together with what it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptedPrompt {
    pub system_instruction: String,
    pub character_traits: Option<CharacterTraits>,
    pub scenario: Scenario,
}

#[derive(Debug)]
pub struct PromptBuilder {
    scenarios: Arc<dyn ScenarioStore>,
    traits: TraitRetriever,
    cache: JsonCache,
    retry: RetryPolicy,
    scenario_timeout: Duration,
    cache_ttl: Duration,
    degraded_cache_ttl: Duration,
    max_preserved_traits: usize,
}

impl PromptBuilder {
    pub fn new(
        scenarios: Arc<dyn ScenarioStore>,
        vector_store: Arc<dyn VectorStore>,
        cache: Arc<dyn CacheStore>,
        config: &GajiConfig,
    ) -> Self {
        Self {
            scenarios,
            traits: TraitRetriever::new(vector_store, config),
            cache: JsonCache::new(cache, config.resilience.timeouts.cache()),
            retry: RetryPolicy::from_config(&config.resilience.retry),
            scenario_timeout: config.resilience.timeouts.scenario_fetch(),
            cache_ttl: config.prompt.cache_ttl(),
            degraded_cache_ttl: config.prompt.degraded_cache_ttl(),
            max_preserved_traits: config.prompt.max_preserved_traits,
        }
    }

    /// System instruction for `scenario_id` layered over `base_prompt`
    pub async fn build_system_instruction(
        &self,
        scenario_id: &str,
        base_prompt: &str,
    ) -> Result<String> {
        Ok(self.adapt(scenario_id, base_prompt).await?.system_instruction)
    }

    /// Like [`build_system_instruction`](Self::build_system_instruction), but
    /// also returns the validated scenario and any retrieved traits.
    pub async fn adapt(&self, scenario_id: &str, base_prompt: &str) -> Result<AdaptedPrompt> {
        if scenario_id.trim().is_empty() {
            return Err(CoreError::validation("scenario_id", "must not be empty"));
        }

        let key = prompt_key(scenario_id, base_prompt);
        if let Some(cached) = self.cache.get::<AdaptedPrompt>(&key).await {
            tracing::debug!(scenario_id, "prompt cache hit");
            return Ok(cached);
        }

        let record = self.fetch_scenario(scenario_id).await?;
        let scenario = Scenario::from_record(record);

        let character_traits = match scenario.character_change() {
            Some(change) => {
                self.traits
                    .get_traits(&change.character, scenario.story_title())
                    .await
            }
            None => None,
        };

        let system_instruction = render_instruction(
            &scenario,
            base_prompt,
            character_traits.as_ref(),
            self.max_preserved_traits,
        );

        let ttl = if scenario.character_change().is_some() && character_traits.is_none() {
            self.degraded_cache_ttl
        } else {
            self.cache_ttl
        };

        let adapted = AdaptedPrompt {
            system_instruction,
            character_traits,
            scenario,
        };
        self.cache.set(&key, &adapted, ttl).await;

        tracing::info!(
            scenario_id,
            scenario_type = ?adapted.scenario.kind.scenario_type(),
            has_traits = adapted.character_traits.is_some(),
            instruction_chars = adapted.system_instruction.len(),
            "system instruction built"
        );
        Ok(adapted)
    }

    async fn fetch_scenario(&self, scenario_id: &str) -> Result<ScenarioRecord> {
        retry_transient(&self.retry, SCENARIO_SERVICE, || {
            with_timeout(SCENARIO_SERVICE, self.scenario_timeout, async {
                self.scenarios
                    .get_scenario(scenario_id)
                    .await
                    .map_err(|e| match e {
                        StoreError::NotFound(_) => CoreError::scenario_not_found(scenario_id),
                        StoreError::Malformed(reason) => {
                            CoreError::validation("scenario", reason)
                        }
                        unavailable => CoreError::unavailable(SCENARIO_SERVICE, 1, unavailable),
                    })
            })
        })
        .await
    }

    /// Breaker state of the character trait lookup
    pub fn circuit_breaker_state(&self) -> CircuitBreakerSnapshot {
        self.traits.circuit_breaker_state()
    }
}

/// Render the system instruction for a validated scenario.
///
/// Unspecified scenarios yield `base_prompt` unchanged.
pub fn render_instruction(
    scenario: &Scenario,
    base_prompt: &str,
    traits: Option<&CharacterTraits>,
    max_traits: usize,
) -> String {
    let story = scenario.story_title();
    match &scenario.kind {
        ScenarioKind::CharacterChange(change) => {
            character_change_instruction(change, story, base_prompt, traits, max_traits)
        }
        ScenarioKind::EventAlteration(event) => event_alteration_instruction(event, story, base_prompt),
        ScenarioKind::SettingModification(setting) => {
            setting_modification_instruction(setting, story, base_prompt)
        }
        ScenarioKind::Unspecified { declared_type } => {
            tracing::warn!(
                scenario_id = %scenario.id,
                declared_type = ?declared_type,
                "unsupported scenario, using base prompt"
            );
            base_prompt.to_string()
        }
    }
}

fn character_change_instruction(
    change: &CharacterChange,
    story: &str,
    base_prompt: &str,
    traits: Option<&CharacterTraits>,
    max_traits: usize,
) -> String {
    let CharacterChange {
        character,
        original_property,
        new_property,
    } = change;

    let mut out = format!(
        "{base_prompt}\n\n\
         SCENARIO ALTERATION - {story}:\n\
         Character: {character}\n\
         Change: {original_property} → {new_property}\n\n\
         CRITICAL INSTRUCTION:\n\
         - {character} is {new_property}, NOT {original_property}\n\
         - All conversations and behaviors must reflect this change\n\
         - Do NOT mention the original {original_property} unless comparing timelines\n"
    );

    if let Some(traits) = traits.filter(|t| !t.personality_traits.is_empty()) {
        out.push_str(&format!(
            "\nPRESERVED TRAITS:\n\
             {character} retains these core characteristics:\n\
             - {}\n\
             - Role: {}\n",
            traits.top_traits(max_traits).join(", "),
            traits.role,
        ));
    }

    out.push_str(
        "\nADAPTATION GUIDELINES:\n\
         - Adjust social dynamics based on this change\n\
         - Maintain logical consistency with the altered property\n\
         - Character personality remains fundamentally the same\n\
         - Only this specific property has changed",
    );
    out
}

fn event_alteration_instruction(event: &EventAlteration, story: &str, base_prompt: &str) -> String {
    let EventAlteration {
        event_name,
        original_outcome,
        new_outcome,
    } = event;

    format!(
        "{base_prompt}\n\n\
         SCENARIO ALTERATION - {story}:\n\
         Event: {event_name}\n\
         Original Outcome: {original_outcome}\n\
         New Outcome: {new_outcome}\n\n\
         CRITICAL INSTRUCTION:\n\
         - The {event_name} resulted in: {new_outcome}\n\
         - This is the canon outcome in this timeline\n\
         - All subsequent events are affected by this change\n\
         - Characters react and adapt to this alternate outcome\n\n\
         ADAPTATION GUIDELINES:\n\
         - Explore consequences of this altered event\n\
         - Maintain character motivations despite changed circumstances\n\
         - Consider ripple effects on plot and relationships"
    )
}

fn setting_modification_instruction(
    setting: &SettingModification,
    story: &str,
    base_prompt: &str,
) -> String {
    let SettingModification {
        setting_aspect,
        original_setting,
        new_setting,
    } = setting;

    format!(
        "{base_prompt}\n\n\
         SCENARIO ALTERATION - {story}:\n\
         Setting Aspect: {setting_aspect}\n\
         Original: {original_setting}\n\
         New: {new_setting}\n\n\
         CRITICAL INSTRUCTION:\n\
         - The {setting_aspect} is {new_setting}, NOT {original_setting}\n\
         - All descriptions, interactions must reflect this new setting\n\
         - Cultural, technological, or environmental differences apply\n\n\
         ADAPTATION GUIDELINES:\n\
         - Characters adapt to this new environment\n\
         - Plot events may unfold differently due to setting\n\
         - Maintain character essence while acknowledging environmental influence"
    )
}
