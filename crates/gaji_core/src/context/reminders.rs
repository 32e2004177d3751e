//! Periodic character-consistency reminders
//!
//! Long conversations drift. For character-change scenarios a short system
//! message restating the alteration is inserted after every `interval`
//! messages, as long as more messages follow it.

use crate::character::CharacterTraits;
use crate::message::ConversationMessage;
use crate::scenario::{CharacterChange, Scenario};

#[derive(Debug, Clone)]
pub struct ConsistencyInjector {
    interval: usize,
    max_traits: usize,
}

impl ConsistencyInjector {
    pub fn new(interval: usize, max_traits: usize) -> Self {
        Self {
            interval: interval.max(1),
            max_traits,
        }
    }

    /// Insert reminders into `messages`.
    ///
    /// Returns the input unchanged unless the scenario is a character change
    /// and there are more than `interval` messages.
    pub fn inject_reminders(
        &self,
        messages: Vec<ConversationMessage>,
        scenario: &Scenario,
        traits: Option<&CharacterTraits>,
    ) -> Vec<ConversationMessage> {
        let Some(change) = scenario.character_change() else {
            return messages;
        };
        if messages.len() <= self.interval {
            return messages;
        }

        let reminder = self.reminder_text(change, traits);
        let total = messages.len();
        let mut out = Vec::with_capacity(total + total / self.interval);
        let mut injected = 0;

        for (position, message) in messages.into_iter().enumerate() {
            out.push(message);
            let seen = position + 1;
            if seen % self.interval == 0 && seen < total {
                out.push(ConversationMessage::synthetic(reminder.clone()));
                injected += 1;
            }
        }

        tracing::debug!(
            reminder_count = injected,
            interval = self.interval,
            "character reminders injected"
        );
        out
    }

    pub fn reminder_text(
        &self,
        change: &CharacterChange,
        traits: Option<&CharacterTraits>,
    ) -> String {
        let mut text = format!(
            "[Character reminder: {} is {}, NOT {}.",
            change.character, change.new_property, change.original_property
        );

        match traits.map(|t| t.top_traits(self.max_traits)) {
            Some(top) if !top.is_empty() => {
                text.push_str(&format!(
                    " Core traits: {}. Maintain consistency with these core character traits.]",
                    top.join(", ")
                ));
            }
            _ => text.push_str(&format!(" Stay in character as {}.]", change.character)),
        }
        text
    }
}
