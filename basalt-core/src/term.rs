//! Terms: IRIs, blank nodes, and literals.
//!
//! A [`Term`] is the canonical, store-owned representation of an RDF value.
//! Components are `Arc<str>` so clones are cheap and interned strings are
//! shared structurally (an IRI's namespace `Arc` is shared by every IRI in
//! that namespace).
//!
//! ## Identity
//!
//! Interned terms are addressed by [`TermId`], a dense `u32` index into the
//! term arena. Identities are stable for the lifetime of the store.
//!
//! ## Splitting
//!
//! IRIs are stored split into `(namespace, local)` at the canonical boundary
//! computed by [`split_iri`]: after the last `#`, `/`, or `:`. An externally
//! supplied IRI that arrives unsplit is compared against the concatenation,
//! so the split never affects equality.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of an interned term: a dense index into the term arena.
///
/// Stable for the store's lifetime; usable as a map key and as the on-disk
/// reference for statements.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TermId(u32);

impl TermId {
    /// Construct from a raw arena index.
    pub fn from_index(index: usize) -> Self {
        TermId(index as u32)
    }

    /// The raw arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The identity as a `u32`.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Construct from a `u32` identity.
    #[inline]
    pub fn from_u32(v: u32) -> Self {
        TermId(v)
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Split an IRI at its canonical namespace boundary.
///
/// The boundary is directly after the last `#`, `/`, or `:`. An IRI with no
/// separator splits into an empty namespace and itself as the local part.
///
/// ```
/// use basalt_core::split_iri;
///
/// assert_eq!(split_iri("http://example.org/ns#name"), ("http://example.org/ns#", "name"));
/// assert_eq!(split_iri("http://example.org/a/b"), ("http://example.org/a/", "b"));
/// assert_eq!(split_iri("urn:isbn:0451450523"), ("urn:isbn:", "0451450523"));
/// assert_eq!(split_iri("nosep"), ("", "nosep"));
/// ```
pub fn split_iri(iri: &str) -> (&str, &str) {
    match iri.rfind(['#', '/', ':']) {
        Some(i) => iri.split_at(i + 1),
        None => ("", iri),
    }
}

/// A canonical RDF term.
///
/// One instance exists per equivalence class for the lifetime of a store;
/// external code compares terms by [`TermId`] on the hot path and only
/// touches the variant when rendering values.
///
/// Literal canonical form: the language tag is lowercase, and the datatype
/// is `None` both for plain (`xsd:string`) literals and for language-tagged
/// strings (whose datatype is implicitly `rdf:langString`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    /// An IRI split at the canonical namespace boundary.
    Iri {
        namespace: Arc<str>,
        local: Arc<str>,
    },
    /// A blank node with a store-scoped label.
    Blank { id: Arc<str> },
    /// A literal value.
    Literal {
        lexical: Arc<str>,
        lang: Option<Arc<str>>,
        datatype: Option<TermId>,
    },
}

/// Canonical content hashing shared by [`Term`]'s `Hash` impl and the
/// interner's borrowed-key lookups.
///
/// Invariant: an IRI hashes its namespace and local parts as two consecutive
/// `write` calls, and a total-string lookup hashes the whole IRI in one call.
/// Both must produce the same value, so callers must pair these helpers with
/// a byte-stream-stable hasher (std's SipHash); chunk-sensitive hashers such
/// as `FxHasher` must not be used to key terms.
pub mod content {
    use super::TermId;
    use std::hash::Hasher;

    // Variant tags fed to the hasher. Terminal so that variable-length
    // string content cannot collide across variants.
    const TAG_IRI: u8 = 1;
    const TAG_BLANK: u8 = 2;
    const TAG_LITERAL: u8 = 3;
    // Separator between literal fields; never occurs inside UTF-8 text.
    const SEP: u8 = 0xFF;

    /// Feed an IRI's content, split at any boundary (including unsplit:
    /// pass the whole IRI as `namespace` and `""` as `local`).
    pub fn hash_iri<H: Hasher>(state: &mut H, namespace: &str, local: &str) {
        state.write(namespace.as_bytes());
        state.write(local.as_bytes());
        state.write_u8(TAG_IRI);
    }

    /// Feed a blank node's content.
    pub fn hash_blank<H: Hasher>(state: &mut H, id: &str) {
        state.write(id.as_bytes());
        state.write_u8(TAG_BLANK);
    }

    /// Feed a literal's content. `lang` must already be lowercase and
    /// `datatype` already canonical (`None` for `xsd:string`/`rdf:langString`).
    pub fn hash_literal<H: Hasher>(
        state: &mut H,
        lexical: &str,
        lang: Option<&str>,
        datatype: Option<TermId>,
    ) {
        state.write(lexical.as_bytes());
        state.write_u8(SEP);
        if let Some(lang) = lang {
            state.write(lang.as_bytes());
        }
        state.write_u8(SEP);
        state.write_u32(datatype.map(TermId::as_u32).unwrap_or(u32::MAX));
        state.write_u8(TAG_LITERAL);
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Term::Iri { namespace, local } => content::hash_iri(state, namespace, local),
            Term::Blank { id } => content::hash_blank(state, id),
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => content::hash_literal(state, lexical, lang.as_deref(), *datatype),
        }
    }
}

impl Term {
    /// True if this term is an IRI.
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri { .. })
    }

    /// True if this term is a blank node.
    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank { .. })
    }

    /// True if this term is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// The full IRI string, if this term is an IRI.
    pub fn iri_string(&self) -> Option<String> {
        match self {
            Term::Iri { namespace, local } => Some(format!("{namespace}{local}")),
            _ => None,
        }
    }

    /// True if this term is the IRI `iri` (total-string comparison).
    pub fn is_iri_str(&self, iri: &str) -> bool {
        match self {
            Term::Iri { namespace, local } => {
                iri.len() == namespace.len() + local.len()
                    && iri.starts_with(namespace.as_ref())
                    && iri.ends_with(local.as_ref())
            }
            _ => false,
        }
    }

    /// A borrowed lookup spec for this term.
    pub fn spec(&self) -> TermSpec<'_> {
        match self {
            Term::Iri { namespace, local } => TermSpec::SplitIri {
                namespace,
                local,
            },
            Term::Blank { id } => TermSpec::Blank(id),
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => TermSpec::Literal {
                lexical,
                lang: lang.as_deref(),
                datatype: *datatype,
            },
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri { namespace, local } => write!(f, "<{namespace}{local}>"),
            Term::Blank { id } => write!(f, "_:{id}"),
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => {
                write!(f, "\"{lexical}\"")?;
                if let Some(lang) = lang {
                    write!(f, "@{lang}")?;
                }
                if let Some(dt) = datatype {
                    write!(f, "^^{dt}")?;
                }
                Ok(())
            }
        }
    }
}

/// A borrowed key for interning and lookup.
///
/// Specs are not canonical: IRIs may arrive unsplit or split at an arbitrary
/// boundary, and language tags may carry uppercase letters. The interner
/// canonicalises before hashing; [`TermSpec::concat_eq`] compares IRI
/// content independently of the split.
#[derive(Clone, Copy, Debug)]
pub enum TermSpec<'a> {
    /// A total IRI string.
    Iri(&'a str),
    /// An IRI pre-split by the caller (at any boundary).
    SplitIri { namespace: &'a str, local: &'a str },
    /// A blank node label.
    Blank(&'a str),
    /// A literal; `datatype` must already be an interned identity.
    Literal {
        lexical: &'a str,
        lang: Option<&'a str>,
        datatype: Option<TermId>,
    },
}

impl TermSpec<'_> {
    /// Compare two split strings for concatenated equality, regardless of
    /// where each pair is split.
    pub fn concat_eq(a: (&str, &str), b: (&str, &str)) -> bool {
        if a.0.len() + a.1.len() != b.0.len() + b.1.len() {
            return false;
        }
        let bytes_a = a.0.as_bytes().iter().chain(a.1.as_bytes());
        let bytes_b = b.0.as_bytes().iter().chain(b.1.as_bytes());
        bytes_a.eq(bytes_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    #[test]
    fn test_split_iri_hash() {
        assert_eq!(
            split_iri("http://example.org/ns#Person"),
            ("http://example.org/ns#", "Person")
        );
    }

    #[test]
    fn test_split_iri_slash() {
        assert_eq!(
            split_iri("http://example.org/people/alice"),
            ("http://example.org/people/", "alice")
        );
    }

    #[test]
    fn test_split_iri_colon_only() {
        assert_eq!(split_iri("urn:a"), ("urn:", "a"));
    }

    #[test]
    fn test_split_iri_no_separator() {
        assert_eq!(split_iri("plain"), ("", "plain"));
    }

    #[test]
    fn test_split_iri_trailing_separator() {
        // Empty local part: the namespace keeps the separator.
        assert_eq!(split_iri("http://example.org/"), ("http://example.org/", ""));
    }

    #[test]
    fn test_term_equality_ignores_arc_identity() {
        let a = Term::Iri {
            namespace: Arc::from("http://ex/"),
            local: Arc::from("x"),
        };
        let b = Term::Iri {
            namespace: Arc::from("http://ex/"),
            local: Arc::from("x"),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_stream_stability_split_vs_unsplit() {
        // The content hash of a split IRI must equal the hash of the same
        // bytes written as one chunk, under a byte-stream-stable hasher.
        let s = RandomState::new();

        let term = Term::Iri {
            namespace: Arc::from("http://ex/"),
            local: Arc::from("name"),
        };
        let mut h1 = s.build_hasher();
        term.hash(&mut h1);

        let mut h2 = s.build_hasher();
        content::hash_iri(&mut h2, "http://ex/name", "");

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn test_concat_eq() {
        assert!(TermSpec::concat_eq(
            ("http://ex/", "ab"),
            ("http://ex/a", "b")
        ));
        assert!(TermSpec::concat_eq(("", "xy"), ("xy", "")));
        assert!(!TermSpec::concat_eq(("a", "b"), ("a", "c")));
        assert!(!TermSpec::concat_eq(("a", "b"), ("a", "bc")));
    }

    #[test]
    fn test_is_iri_str() {
        let term = Term::Iri {
            namespace: Arc::from("http://ex/"),
            local: Arc::from("p"),
        };
        assert!(term.is_iri_str("http://ex/p"));
        assert!(!term.is_iri_str("http://ex/q"));
        assert!(!term.is_iri_str("http://ex/"));
    }

    #[test]
    fn test_display() {
        let iri = Term::Iri {
            namespace: Arc::from("http://ex/"),
            local: Arc::from("p"),
        };
        assert_eq!(iri.to_string(), "<http://ex/p>");

        let lit = Term::Literal {
            lexical: Arc::from("chat"),
            lang: Some(Arc::from("fr")),
            datatype: None,
        };
        assert_eq!(lit.to_string(), "\"chat\"@fr");

        let blank = Term::Blank {
            id: Arc::from("b0"),
        };
        assert_eq!(blank.to_string(), "_:b0");
    }
}
