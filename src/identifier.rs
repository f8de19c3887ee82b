//! Canonical addresses for entities, collections and the whole system.
//!
//! An [`Identifier`] serializes to `namespace:collection#discriminator`:
//!
//! ```text
//! tokens:users#42    one entity
//! tokens:users#*     any instance of a collection
//! tokens:*#*         anything, anywhere
//! ```
//!
//! The serialized form is also the token store key for the identifier's token.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Placeholder for "any collection" / "any instance".
pub const WILDCARD: &str = "*";

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "tokens";

const FORBIDDEN: [char; 3] = [':', '#', '/'];

/// What an [`Identifier`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Entity,
    Collection,
    Global,
}

/// Immutable `(namespace, collection, discriminator)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    namespace: String,
    collection: String,
    discriminator: String,
}

impl Identifier {
    /// Identifier of a single entity.
    ///
    /// # Errors
    /// Returns `Error::InvalidIdentifier` if any part is empty, is the wildcard,
    /// or contains `:`, `#`, `/` or whitespace.
    pub fn entity(
        namespace: impl Into<String>,
        collection: impl Into<String>,
        id: impl fmt::Display,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let collection = collection.into();
        let discriminator = id.to_string();
        validate_part(&namespace, "namespace")?;
        validate_concrete(&collection, "collection")?;
        validate_concrete(&discriminator, "entity id")?;
        Ok(Identifier {
            namespace,
            collection,
            discriminator,
        })
    }

    /// Identifier matching any instance of `collection`.
    pub fn collection(namespace: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let collection = collection.into();
        validate_part(&namespace, "namespace")?;
        validate_concrete(&collection, "collection")?;
        Ok(Identifier {
            namespace,
            collection,
            discriminator: WILDCARD.to_string(),
        })
    }

    /// Identifier matching anything in `namespace`.
    pub fn global(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        validate_part(&namespace, "namespace")?;
        Ok(Identifier {
            namespace,
            collection: WILDCARD.to_string(),
            discriminator: WILDCARD.to_string(),
        })
    }

    pub fn kind(&self) -> IdentifierKind {
        if self.collection == WILDCARD {
            IdentifierKind::Global
        } else if self.discriminator == WILDCARD {
            IdentifierKind::Collection
        } else {
            IdentifierKind::Entity
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Collection name, `None` for the global identifier.
    pub fn collection_name(&self) -> Option<&str> {
        match self.kind() {
            IdentifierKind::Global => None,
            _ => Some(&self.collection),
        }
    }

    /// Entity id, `None` for wildcard identifiers.
    pub fn entity_id(&self) -> Option<&str> {
        match self.kind() {
            IdentifierKind::Entity => Some(&self.discriminator),
            _ => None,
        }
    }

    /// The `namespace:collection#*` identifier this one belongs to.
    ///
    /// Collection and global identifiers return themselves.
    pub fn collection_wildcard(&self) -> Identifier {
        match self.kind() {
            IdentifierKind::Entity => Identifier {
                namespace: self.namespace.clone(),
                collection: self.collection.clone(),
                discriminator: WILDCARD.to_string(),
            },
            _ => self.clone(),
        }
    }

    /// The `namespace:*#*` identifier of this identifier's namespace.
    pub fn global_wildcard(&self) -> Identifier {
        Identifier {
            namespace: self.namespace.clone(),
            collection: WILDCARD.to_string(),
            discriminator: WILDCARD.to_string(),
        }
    }

    /// Token store key for this identifier.
    pub fn store_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.namespace, self.collection, self.discriminator)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (namespace, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidIdentifier(format!("missing ':' in {:?}", s)))?;
        let (collection, discriminator) = rest
            .split_once('#')
            .ok_or_else(|| Error::InvalidIdentifier(format!("missing '#' in {:?}", s)))?;

        match (collection, discriminator) {
            (WILDCARD, WILDCARD) => Identifier::global(namespace),
            (WILDCARD, _) => Err(Error::InvalidIdentifier(format!(
                "wildcard collection requires a wildcard id: {:?}",
                s
            ))),
            (_, WILDCARD) => Identifier::collection(namespace, collection),
            _ => Identifier::entity(namespace, collection, discriminator),
        }
    }
}

fn validate_part(part: &str, what: &str) -> Result<()> {
    if part.is_empty() {
        return Err(Error::InvalidIdentifier(format!("empty {}", what)));
    }
    if part
        .chars()
        .any(|c| FORBIDDEN.contains(&c) || c.is_whitespace())
    {
        return Err(Error::InvalidIdentifier(format!(
            "{} {:?} contains a reserved character",
            what, part
        )));
    }
    Ok(())
}

fn validate_concrete(part: &str, what: &str) -> Result<()> {
    validate_part(part, what)?;
    if part == WILDCARD {
        return Err(Error::InvalidIdentifier(format!(
            "{} cannot be the wildcard",
            what
        )));
    }
    Ok(())
}
