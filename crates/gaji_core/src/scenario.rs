//! What-if scenarios and their validation
//!
//! The scenario store hands back loosely-typed records: a declared type string
//! and a free-form parameter map. [`Scenario`] is the validated form, with one
//! variant per scenario type, so prompt building never looks up a field that
//! might be missing.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// A scenario record exactly as the scenario store returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub id: String,
    #[serde(default)]
    pub base_story: String,
    #[serde(rename = "type", default)]
    pub scenario_type: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// The kinds of alteration a scenario can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioType {
    CharacterChange,
    EventAlteration,
    SettingModification,
}

impl ScenarioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CharacterChange => "CHARACTER_CHANGE",
            Self::EventAlteration => "EVENT_ALTERATION",
            Self::SettingModification => "SETTING_MODIFICATION",
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "CHARACTER_CHANGE" => Ok(Self::CharacterChange),
            "EVENT_ALTERATION" => Ok(Self::EventAlteration),
            "SETTING_MODIFICATION" => Ok(Self::SettingModification),
            other => Err(CoreError::validation(
                "type",
                format!("unrecognized scenario type '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterChange {
    pub character: String,
    pub original_property: String,
    pub new_property: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAlteration {
    pub event_name: String,
    pub original_outcome: String,
    pub new_outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingModification {
    pub setting_aspect: String,
    pub original_setting: String,
    pub new_setting: String,
}

/// Validated alteration, one variant per scenario type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    CharacterChange(CharacterChange),
    EventAlteration(EventAlteration),
    SettingModification(SettingModification),
    /// Unrecognized type or incomplete parameters; prompt building falls back
    /// to the unmodified base prompt.
    Unspecified { declared_type: Option<String> },
}

impl ScenarioKind {
    /// Parse a declared type and its parameters, failing on anything missing.
    pub fn parse(
        scenario_type: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<Self> {
        let kind = match scenario_type.parse::<ScenarioType>()? {
            ScenarioType::CharacterChange => Self::CharacterChange(CharacterChange {
                character: required(parameters, "character")?,
                original_property: required(parameters, "original_property")?,
                new_property: required(parameters, "new_property")?,
            }),
            ScenarioType::EventAlteration => Self::EventAlteration(EventAlteration {
                event_name: required(parameters, "event_name")?,
                original_outcome: required(parameters, "original_outcome")?,
                new_outcome: required(parameters, "new_outcome")?,
            }),
            ScenarioType::SettingModification => {
                Self::SettingModification(SettingModification {
                    setting_aspect: required(parameters, "setting_aspect")?,
                    original_setting: required(parameters, "original_setting")?,
                    new_setting: required(parameters, "new_setting")?,
                })
            }
        };
        Ok(kind)
    }

    pub fn scenario_type(&self) -> Option<ScenarioType> {
        match self {
            Self::CharacterChange(_) => Some(ScenarioType::CharacterChange),
            Self::EventAlteration(_) => Some(ScenarioType::EventAlteration),
            Self::SettingModification(_) => Some(ScenarioType::SettingModification),
            Self::Unspecified { .. } => None,
        }
    }
}

fn required(parameters: &HashMap<String, serde_json::Value>, key: &str) -> Result<String> {
    match parameters.get(key) {
        Some(serde_json::Value::String(value)) if !value.trim().is_empty() => {
            Ok(value.trim().to_string())
        }
        Some(serde_json::Value::String(_)) => Err(CoreError::validation(
            format!("parameters.{}", key),
            "value is empty",
        )),
        Some(other) => Err(CoreError::validation(
            format!("parameters.{}", key),
            format!("expected a string, got {}", other),
        )),
        None => Err(CoreError::validation(
            format!("parameters.{}", key),
            "required parameter is missing",
        )),
    }
}

/// A read-only, validated scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub base_story: String,
    pub kind: ScenarioKind,
}

impl Scenario {
    /// Lenient conversion used by prompt building: anything that does not
    /// validate becomes [`ScenarioKind::Unspecified`].
    pub fn from_record(record: ScenarioRecord) -> Self {
        let kind = match record.scenario_type.as_deref() {
            Some(declared) => match ScenarioKind::parse(declared, &record.parameters) {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::warn!(
                        scenario_id = %record.id,
                        declared_type = declared,
                        error = %e,
                        "scenario parameters did not validate, treating as unspecified"
                    );
                    ScenarioKind::Unspecified {
                        declared_type: Some(declared.to_string()),
                    }
                }
            },
            None => ScenarioKind::Unspecified {
                declared_type: None,
            },
        };

        Self {
            id: record.id,
            base_story: record.base_story,
            kind,
        }
    }

    /// The character change, if this scenario is one
    pub fn character_change(&self) -> Option<&CharacterChange> {
        match &self.kind {
            ScenarioKind::CharacterChange(change) => Some(change),
            _ => None,
        }
    }

    /// Story title for prompts, with a placeholder when the record had none
    pub fn story_title(&self) -> &str {
        if self.base_story.trim().is_empty() {
            "Unknown Story"
        } else {
            &self.base_story
        }
    }
}
