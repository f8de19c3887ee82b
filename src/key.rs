//! Cache key generation from tokens and literal values.
//!
//! A key is built from an ordered list of [`Fragment`]s:
//!
//! ```text
//! {prefix}/{shape hash}/{contribution}/{contribution}/...
//! ```
//!
//! Entities contribute their collection token and their own token, so the key
//! changes when either the instance or its whole collection is invalidated.
//! Literals contribute their canonical string form with `%` and `/` escaped.
//! The shape hash covers each fragment's kind and address, so a literal can
//! never be mistaken for a token and fragment boundaries are unambiguous.

use crate::backend::TokenBackend;
use crate::entity::TrackedEntity;
use crate::error::{Error, Result};
use crate::identifier::{Identifier, IdentifierKind};
use crate::store::TokenStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Separator between key segments. Never appears in tokens or escaped literals.
pub const SEPARATOR: &str = "/";

const SHAPE_HASH_LEN: usize = 16;

/// A plain value included in a key as-is, without a token lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Structured value; object keys are sorted before rendering.
    Json(serde_json::Value),
}

impl Literal {
    /// Build a structured literal from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Literal::Json(serde_json::to_value(value)?))
    }

    fn tag(&self) -> &'static str {
        match self {
            Literal::Int(_) => "i",
            Literal::UInt(_) => "u",
            Literal::Float(_) => "f",
            Literal::Bool(_) => "b",
            Literal::Str(_) => "s",
            Literal::Json(_) => "j",
        }
    }

    /// Canonical, escaped string form.
    pub fn canonical(&self) -> String {
        let raw = match self {
            Literal::Int(v) => v.to_string(),
            Literal::UInt(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
            Literal::Bool(v) => v.to_string(),
            Literal::Str(v) => v.clone(),
            Literal::Json(v) => {
                let mut out = String::new();
                write_canonical_json(v, &mut out);
                out
            }
        };
        escape(&raw)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical_json(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

macro_rules! literal_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Literal {
                fn from(v: $ty) -> Self {
                    Literal::$variant(v.into())
                }
            }

            impl From<$ty> for Fragment {
                fn from(v: $ty) -> Self {
                    Fragment::Literal(v.into())
                }
            }
        )*
    };
}

literal_from! {
    i64 => Int,
    i32 => Int,
    u64 => UInt,
    u32 => UInt,
    f64 => Float,
    bool => Bool,
    String => Str,
    &str => Str,
    serde_json::Value => Json,
}

/// One positional input to [`CacheKeyGenerator::build`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// An entity instance: contributes collection token and entity token.
    Entity { collection: String, id: String },
    /// A pre-formed identifier string such as `"app:users#1"`.
    Identifier(String),
    /// Every instance of a collection: contributes the collection token.
    Collection(String),
    /// Anything at all: contributes the global token.
    Global,
    Literal(Literal),
}

impl Fragment {
    pub fn entity<T: TrackedEntity>(entity: &T) -> Self {
        Fragment::Entity {
            collection: T::collection().to_string(),
            id: entity.entity_id().to_string(),
        }
    }

    pub fn collection_of<T: TrackedEntity>() -> Self {
        Fragment::Collection(T::collection().to_string())
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Fragment::Collection(name.into())
    }

    pub fn identifier(identifier: impl ToString) -> Self {
        Fragment::Identifier(identifier.to_string())
    }

    pub fn literal(value: impl Into<Literal>) -> Self {
        Fragment::Literal(value.into())
    }

    /// A structured literal from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Literal::json(value).map(Fragment::Literal)
    }
}

impl From<&Identifier> for Fragment {
    fn from(identifier: &Identifier) -> Self {
        Fragment::Identifier(identifier.to_string())
    }
}

impl From<Identifier> for Fragment {
    fn from(identifier: Identifier) -> Self {
        Fragment::Identifier(identifier.to_string())
    }
}

/// An opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a fragment resolves through.
enum Resolved {
    Tokens(Vec<Identifier>),
    Literal(String),
}

/// Builds cache keys against a shared token store.
///
/// Cheap to clone; hand one to each request.
///
/// # Example
///
/// ```
/// # use cache_tokens::{CacheKeyGenerator, Fragment, TokenStore};
/// # use cache_tokens::backend::InMemoryBackend;
/// # use std::sync::Arc;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cache_tokens::Result<()> {
/// let store = Arc::new(TokenStore::new(InMemoryBackend::new()));
/// let keys = CacheKeyGenerator::new(store, "app");
///
/// let key = keys
///     .build(&[Fragment::identifier("app:users#1"), Fragment::literal("profile")])
///     .await?;
/// assert!(key.as_str().starts_with("app/"));
/// # Ok(())
/// # }
/// ```
pub struct CacheKeyGenerator<B: TokenBackend> {
    store: Arc<TokenStore<B>>,
    namespace: String,
    prefix: String,
}

impl<B: TokenBackend> Clone for CacheKeyGenerator<B> {
    fn clone(&self) -> Self {
        CacheKeyGenerator {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

impl<B: TokenBackend> CacheKeyGenerator<B> {
    /// Create a generator; the key prefix defaults to the namespace.
    pub fn new(store: Arc<TokenStore<B>>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        CacheKeyGenerator {
            store,
            prefix: escape(&namespace),
            namespace,
        }
    }

    /// Use a different fixed prefix for every key.
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = escape(prefix.as_ref());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the key for `fragments`, creating tokens on first sight.
    ///
    /// # Errors
    ///
    /// - `Error::UnsupportedFragmentKind`: a fragment cannot be addressed
    ///   (malformed identifier string, foreign namespace, invalid entity id)
    /// - `Error::StoreConnectivity`: store unreachable and fail-open disabled
    /// - `Error::BackendError`: the store rejected a read
    pub async fn build(&self, fragments: &[Fragment]) -> Result<CacheKey> {
        let mut shape = Sha256::new();
        let mut segments: Vec<String> = Vec::with_capacity(fragments.len() + 2);
        segments.push(self.prefix.clone());

        let mut resolved = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let (kind, item) = self.classify(fragment)?;
            shape.update(kind.as_bytes());
            shape.update([0u8]);
            resolved.push(item);
        }
        let digest = hex::encode(shape.finalize());
        segments.push(digest[..SHAPE_HASH_LEN].to_string());

        for item in resolved {
            match item {
                Resolved::Tokens(identifiers) => {
                    for identifier in &identifiers {
                        let token = self.store.get_or_create(identifier).await?;
                        segments.push(token.into_string());
                    }
                }
                Resolved::Literal(value) => segments.push(value),
            }
        }

        let key = segments.join(SEPARATOR);
        debug!("» Built cache key {}", key);
        Ok(CacheKey(key))
    }

    /// Shape descriptor and resolution plan for one fragment.
    fn classify(&self, fragment: &Fragment) -> Result<(String, Resolved)> {
        match fragment {
            Fragment::Entity { collection, id } => {
                let identifier = Identifier::entity(self.namespace.as_str(), collection.as_str(), id)
                    .map_err(unsupported)?;
                Ok(Self::plan(identifier))
            }
            Fragment::Identifier(raw) => {
                let identifier: Identifier = raw.parse().map_err(unsupported)?;
                if identifier.namespace() != self.namespace {
                    return Err(Error::UnsupportedFragmentKind(format!(
                        "identifier {} is outside namespace {}",
                        raw, self.namespace
                    )));
                }
                Ok(Self::plan(identifier))
            }
            Fragment::Collection(collection) => {
                let identifier =
                    Identifier::collection(self.namespace.as_str(), collection.as_str())
                        .map_err(unsupported)?;
                Ok(Self::plan(identifier))
            }
            Fragment::Global => {
                let identifier = Identifier::global(self.namespace.as_str()).map_err(unsupported)?;
                Ok(Self::plan(identifier))
            }
            Fragment::Literal(literal) => Ok((
                format!("literal:{}", literal.tag()),
                Resolved::Literal(literal.canonical()),
            )),
        }
    }

    /// Entities resolve through their collection token and their own.
    fn plan(identifier: Identifier) -> (String, Resolved) {
        let shape = format!("token:{}", identifier);
        let identifiers = match identifier.kind() {
            IdentifierKind::Entity => vec![identifier.collection_wildcard(), identifier],
            IdentifierKind::Collection | IdentifierKind::Global => vec![identifier],
        };
        (shape, Resolved::Tokens(identifiers))
    }
}

fn unsupported(e: Error) -> Error {
    Error::UnsupportedFragmentKind(e.to_string())
}
