//! Local store interface.
//!
//! The sync engine never touches the host application's storage format;
//! it goes through this narrow CRUD trait. The CLI ships a JSON-directory
//! implementation; tests use the in-memory one here.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{Card, CardSchema};

/// Narrow CRUD surface over the host application's card storage
pub trait CardStore: Send {
    /// All cards in one deck (scope)
    fn all_cards(&self, scope: &str) -> Result<Vec<Card>>;

    /// Replace the cards of one deck
    fn save_cards(&mut self, scope: &str, cards: &[Card]) -> Result<()>;

    /// One schema by id
    fn schema(&self, id: &str) -> Result<Option<CardSchema>>;

    /// Insert or update a schema
    fn save_schema(&mut self, schema: &CardSchema) -> Result<()>;

    /// All deck names present in the store
    fn scopes(&self) -> Result<Vec<String>>;
}

/// In-memory store used by tests and as a reference implementation
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    decks: HashMap<String, Vec<Card>>,
    schemas: HashMap<String, CardSchema>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one card, creating its deck as needed
    pub fn insert_card(&mut self, card: Card) {
        self.decks.entry(card.deck.clone()).or_default().push(card);
    }

    /// Total card count across decks
    pub fn card_count(&self) -> usize {
        self.decks.values().map(Vec::len).sum()
    }
}

impl CardStore for MemoryStore {
    fn all_cards(&self, scope: &str) -> Result<Vec<Card>> {
        Ok(self.decks.get(scope).cloned().unwrap_or_default())
    }

    fn save_cards(&mut self, scope: &str, cards: &[Card]) -> Result<()> {
        for card in cards {
            if card.deck != scope {
                return Err(Error::Store(format!(
                    "card {} belongs to deck '{}', not '{scope}'",
                    card.id, card.deck
                )));
            }
        }
        self.decks.insert(scope.to_string(), cards.to_vec());
        Ok(())
    }

    fn schema(&self, id: &str) -> Result<Option<CardSchema>> {
        Ok(self.schemas.get(id).cloned())
    }

    fn save_schema(&mut self, schema: &CardSchema) -> Result<()> {
        self.schemas.insert(schema.id.clone(), schema.clone());
        Ok(())
    }

    fn scopes(&self) -> Result<Vec<String>> {
        let mut scopes: Vec<String> = self.decks.keys().cloned().collect();
        scopes.sort_unstable();
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_read_back() {
        let mut store = MemoryStore::new();
        let card = Card::new("Physics", "basic").with_field("Front", "q");
        store.save_cards("Physics", &[card.clone()]).unwrap();

        let cards = store.all_cards("Physics").unwrap();
        assert_eq!(cards, vec![card]);
        assert_eq!(store.scopes().unwrap(), vec!["Physics".to_string()]);
    }

    #[test]
    fn save_rejects_cards_from_another_deck() {
        let mut store = MemoryStore::new();
        let card = Card::new("Chemistry", "basic");
        assert!(store.save_cards("Physics", &[card]).is_err());
    }

    #[test]
    fn schema_round_trip() {
        let mut store = MemoryStore::new();
        let schema = CardSchema::basic();
        store.save_schema(&schema).unwrap();
        assert_eq!(store.schema("basic").unwrap(), Some(schema));
        assert_eq!(store.schema("missing").unwrap(), None);
    }

    #[test]
    fn unknown_scope_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.all_cards("Nope").unwrap().is_empty());
    }
}
