//! Owner invalidation through declared foreign-key relations.
//!
//! Dirty tracking only sees the row that was written. When a comment is
//! inserted with just `post_id` set, the post itself is not dirty, yet caches
//! of the post usually embed its comments. Declaring `comments.post_id -> posts`
//! makes a change to a comment also record `posts#<post_id>`.
//!
//! This is best effort: an unknown foreign key value records the owner's
//! collection wildcard, which over-invalidates rather than missing the owner.

use crate::entity::TrackedEntity;
use crate::error::Result;
use crate::identifier::Identifier;
use std::collections::{BTreeMap, HashMap};

/// A changed entity as reported by the unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub collection: String,
    pub entity_id: String,
    /// Foreign key field name to value, for cascade resolution.
    pub foreign_keys: BTreeMap<String, String>,
}

impl EntityChange {
    pub fn new(collection: impl Into<String>, entity_id: impl ToString) -> Self {
        EntityChange {
            collection: collection.into(),
            entity_id: entity_id.to_string(),
            foreign_keys: BTreeMap::new(),
        }
    }

    pub fn of<T: TrackedEntity>(entity: &T) -> Self {
        Self::new(T::collection(), entity.entity_id())
    }

    pub fn with_foreign_key(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.foreign_keys.insert(field.into(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relation {
    owner: String,
    foreign_key: String,
}

/// Static map from a collection to the owners its changes also invalidate.
#[derive(Debug, Clone, Default)]
pub struct RelationMap {
    relations: HashMap<String, Vec<Relation>>,
}

impl RelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `collection.foreign_key` references an entity of `owner`.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if either collection name is not
    /// usable in an identifier.
    pub fn with_relation(
        mut self,
        collection: impl Into<String>,
        owner: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Result<Self> {
        let collection = collection.into();
        let owner = owner.into();
        Identifier::collection("check", collection.as_str())?;
        Identifier::collection("check", owner.as_str())?;

        self.relations
            .entry(collection)
            .or_default()
            .push(Relation {
                owner,
                foreign_key: foreign_key.into(),
            });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Owner identifiers to record alongside `change`.
    pub fn owners_of(&self, namespace: &str, change: &EntityChange) -> Vec<Identifier> {
        let Some(relations) = self.relations.get(&change.collection) else {
            return Vec::new();
        };

        let mut owners = Vec::with_capacity(relations.len());
        for relation in relations {
            let owner = match change.foreign_keys.get(&relation.foreign_key) {
                Some(value) => Identifier::entity(namespace, relation.owner.as_str(), value)
                    .or_else(|_| Identifier::collection(namespace, relation.owner.as_str())),
                None => Identifier::collection(namespace, relation.owner.as_str()),
            };
            match owner {
                Ok(owner) => owners.push(owner),
                Err(e) => warn!(
                    "Skipping owner {} of {}: {}",
                    relation.owner, change.collection, e
                ),
            }
        }
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relations() -> RelationMap {
        RelationMap::new()
            .with_relation("comments", "posts", "post_id")
            .unwrap()
            .with_relation("comments", "users", "author_id")
            .unwrap()
    }

    #[test]
    fn test_owner_from_foreign_key_value() {
        let change = EntityChange::new("comments", 7)
            .with_foreign_key("post_id", 3)
            .with_foreign_key("author_id", 11);
        let owners = relations().owners_of("app", &change);
        let owners: Vec<String> = owners.iter().map(ToString::to_string).collect();
        assert_eq!(owners, vec!["app:posts#3", "app:users#11"]);
    }

    #[test]
    fn test_unknown_value_invalidates_owner_collection() {
        let change = EntityChange::new("comments", 7).with_foreign_key("post_id", 3);
        let owners = relations().owners_of("app", &change);
        assert_eq!(owners[1].to_string(), "app:users#*");
    }

    #[test]
    fn test_unrelated_collection() {
        let change = EntityChange::new("posts", 3);
        assert!(relations().owners_of("app", &change).is_empty());
    }

    #[test]
    fn test_rejects_bad_collection_names() {
        assert!(RelationMap::new()
            .with_relation("comments", "po#sts", "post_id")
            .is_err());
    }
}
