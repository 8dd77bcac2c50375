//! Dashboard card configuration.
//!
//! The device shows an ordered stack of cards. Each card has a type from a
//! fixed catalog, an optional per-type config string (an insight id for
//! insight cards) and a display name. After every mutation the `order`
//! values are renumbered to a dense `0..N` sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Card types known to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    Insight,
    Friend,
    HelloWorld,
    FlappyHog,
    Question,
    Pong,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Insight => "INSIGHT",
            CardType::Friend => "FRIEND",
            CardType::HelloWorld => "HELLO_WORLD",
            CardType::FlappyHog => "FLAPPY_HOG",
            CardType::Question => "QUESTION",
            CardType::Pong => "PONG",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        CARD_DEFINITIONS
            .iter()
            .map(|def| def.card_type)
            .find(|t| t.as_str() == name)
    }

    /// Catalog entry for this type.
    pub fn definition(&self) -> &'static CardDefinition {
        CARD_DEFINITIONS
            .iter()
            .find(|def| def.card_type == *self)
            .unwrap_or(&CARD_DEFINITIONS[0])
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type of card the user can add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDefinition {
    pub card_type: CardType,
    pub name: &'static str,
    pub description: &'static str,
    pub allow_multiple: bool,
    pub needs_config_input: bool,
    pub config_input_label: &'static str,
}

/// The card catalog, in menu order.
pub static CARD_DEFINITIONS: [CardDefinition; 6] = [
    CardDefinition {
        card_type: CardType::Insight,
        name: "PostHog insight",
        description: "Shows a saved PostHog insight as a number, line graph or funnel",
        allow_multiple: true,
        needs_config_input: true,
        config_input_label: "Insight ID",
    },
    CardDefinition {
        card_type: CardType::Friend,
        name: "Walking friend",
        description: "A hedgehog that walks across the screen and offers encouragement",
        allow_multiple: false,
        needs_config_input: false,
        config_input_label: "",
    },
    CardDefinition {
        card_type: CardType::HelloWorld,
        name: "Hello world",
        description: "Minimal example card",
        allow_multiple: false,
        needs_config_input: false,
        config_input_label: "",
    },
    CardDefinition {
        card_type: CardType::FlappyHog,
        name: "Flappy Hog",
        description: "Tap to flap through the pipes",
        allow_multiple: false,
        needs_config_input: false,
        config_input_label: "",
    },
    CardDefinition {
        card_type: CardType::Question,
        name: "Question of the day",
        description: "Trivia questions, one at a time",
        allow_multiple: false,
        needs_config_input: false,
        config_input_label: "",
    },
    CardDefinition {
        card_type: CardType::Pong,
        name: "Pong",
        description: "Classic paddle game against the device",
        allow_multiple: false,
        needs_config_input: false,
        config_input_label: "",
    },
];

/// A configured card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardConfig {
    #[serde(rename = "type")]
    pub card_type: CardType,
    #[serde(default)]
    pub config: String,
    pub name: String,
    pub order: usize,
}

impl CardConfig {
    /// Whether two cards denote the same card (same type and config).
    pub fn same_identity(&self, card_type: CardType, config: &str) -> bool {
        self.card_type == card_type && self.config == config
    }
}

/// A card as submitted by a client in SAVE_CARDS. The type is kept as a
/// string so unknown types are reported as validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInput {
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: i64,
}

/// Card list validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("Unknown card type: {0}")]
    UnknownType(String),

    #[error("{0} cards need a value for '{1}'")]
    MissingConfig(CardType, &'static str),

    #[error("Only one {0} card is allowed")]
    SingleInstance(CardType),

    #[error("{0} card '{1}' is already configured")]
    Duplicate(CardType, String),

    #[error("No {0} card with config '{1}'")]
    NotFound(CardType, String),
}

/// Ordered card list with dense ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardList {
    cards: Vec<CardConfig>,
}

impl CardList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from stored cards, sorting by their stored order and
    /// renumbering.
    pub fn from_stored(mut cards: Vec<CardConfig>) -> Self {
        cards.sort_by_key(|card| card.order);
        let mut list = Self { cards };
        list.renormalize();
        list
    }

    /// Validate a full replacement list and build it.
    pub fn from_inputs(inputs: &[CardInput]) -> Result<Self, CardError> {
        let mut indexed: Vec<(i64, usize, &CardInput)> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| (input.order, i, input))
            .collect();
        indexed.sort_by_key(|(order, index, _)| (*order, *index));

        let mut list = Self::new();
        for (_, _, input) in indexed {
            let card_type = CardType::parse(&input.card_type)
                .ok_or_else(|| CardError::UnknownType(input.card_type.clone()))?;
            list.add(card_type, input.config.trim(), input.name.trim())?;
        }
        Ok(list)
    }

    pub fn cards(&self) -> &[CardConfig] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Append a card at the end of the stack.
    pub fn add(&mut self, card_type: CardType, config: &str, name: &str) -> Result<(), CardError> {
        let def = card_type.definition();
        if def.needs_config_input && config.is_empty() {
            return Err(CardError::MissingConfig(card_type, def.config_input_label));
        }
        if !def.allow_multiple && self.cards.iter().any(|c| c.card_type == card_type) {
            return Err(CardError::SingleInstance(card_type));
        }
        if self.cards.iter().any(|c| c.same_identity(card_type, config)) {
            return Err(CardError::Duplicate(card_type, config.to_string()));
        }

        let name = if name.is_empty() { def.name } else { name };
        self.cards.push(CardConfig {
            card_type,
            config: config.to_string(),
            name: name.to_string(),
            order: self.cards.len(),
        });
        self.renormalize();
        Ok(())
    }

    /// Remove the card with the given identity.
    pub fn remove(&mut self, card_type: CardType, config: &str) -> Result<CardConfig, CardError> {
        let index = self
            .cards
            .iter()
            .position(|c| c.same_identity(card_type, config))
            .ok_or_else(|| CardError::NotFound(card_type, config.to_string()))?;
        let removed = self.cards.remove(index);
        self.renormalize();
        Ok(removed)
    }

    /// Rename the card with the given identity. Returns `false` if absent.
    pub fn rename(&mut self, card_type: CardType, config: &str, name: &str) -> bool {
        match self
            .cards
            .iter_mut()
            .find(|c| c.same_identity(card_type, config))
        {
            Some(card) => {
                card.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Cards of the insight type, in display order.
    pub fn insights(&self) -> impl Iterator<Item = &CardConfig> {
        self.cards
            .iter()
            .filter(|c| c.card_type == CardType::Insight)
    }

    /// Renumber `order` to match list position.
    fn renormalize(&mut self) {
        for (index, card) in self.cards.iter_mut().enumerate() {
            card.order = index;
        }
    }
}
