//! Term registry: interning, canonicalisation, and identity assignment.
//!
//! The registry guarantees one [`Term`] instance per equivalence class for
//! the store's lifetime. IRIs are re-split at the canonical boundary before
//! hashing, so a total-string lookup and a pre-split intern land on the same
//! entry. Namespaces are interned separately and shared structurally: every
//! IRI in a namespace holds the same `Arc<str>`.
//!
//! Interning uses hashbrown's raw-entry API so cache hits never allocate.
//! The lookup map is keyed by `Term` under std's `RandomState` — the content
//! hash feeds the hasher in chunks that differ between split and unsplit
//! IRIs, which only a byte-stream-stable hasher tolerates (see
//! `basalt_core::term::content`).

use basalt_core::term::content;
use basalt_core::vocab;
use basalt_core::{split_iri, Error, Result, Term, TermId, TermSpec};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Namespace dictionary
// ---------------------------------------------------------------------------

/// Bidirectional namespace dictionary with dense sequential ids.
///
/// Forward lookups are a Vec index; reverse lookups share the `Arc<str>`
/// with the forward Vec, so each namespace string is allocated once.
pub(crate) struct NamespaceDict {
    entries: Vec<Arc<str>>,
    reverse: HashMap<Arc<str>, u32>,
}

impl NamespaceDict {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            reverse: HashMap::new(),
        }
    }

    /// Look up or assign an id for `value`, returning the shared `Arc`.
    fn intern(&mut self, value: &str) -> (u32, Arc<str>) {
        if let Some((arc, &id)) = self.reverse.get_key_value(value) {
            return (id, Arc::clone(arc));
        }
        let id = self.entries.len() as u32;
        let arc: Arc<str> = Arc::from(value);
        self.entries.push(Arc::clone(&arc));
        self.reverse.insert(Arc::clone(&arc), id);
        (id, arc)
    }

    fn find(&self, value: &str) -> Option<u32> {
        self.reverse.get(value).copied()
    }

    fn entries(&self) -> &[Arc<str>] {
        &self.entries
    }
}

// ---------------------------------------------------------------------------
// Canonical specs
// ---------------------------------------------------------------------------

/// A spec normalised to the stored form: IRIs split at the canonical
/// boundary, language tags lowercase, literal datatypes canonical.
enum CanonicalSpec<'a> {
    Iri {
        namespace: Cow<'a, str>,
        local: Cow<'a, str>,
    },
    Blank(&'a str),
    Literal {
        lexical: &'a str,
        lang: Option<Cow<'a, str>>,
        datatype: Option<TermId>,
    },
}

impl CanonicalSpec<'_> {
    fn content_hash(&self, build: &RandomState) -> u64 {
        let mut h = build.build_hasher();
        match self {
            CanonicalSpec::Iri { namespace, local } => {
                content::hash_iri(&mut h, namespace, local)
            }
            CanonicalSpec::Blank(id) => content::hash_blank(&mut h, id),
            CanonicalSpec::Literal {
                lexical,
                lang,
                datatype,
            } => content::hash_literal(&mut h, lexical, lang.as_deref(), *datatype),
        }
        h.finish()
    }

    fn matches(&self, term: &Term) -> bool {
        match (self, term) {
            (
                CanonicalSpec::Iri { namespace, local },
                Term::Iri {
                    namespace: t_ns,
                    local: t_local,
                },
            ) => namespace.as_ref() == t_ns.as_ref() && local.as_ref() == t_local.as_ref(),
            (CanonicalSpec::Blank(id), Term::Blank { id: t_id }) => *id == t_id.as_ref(),
            (
                CanonicalSpec::Literal {
                    lexical,
                    lang,
                    datatype,
                },
                Term::Literal {
                    lexical: t_lex,
                    lang: t_lang,
                    datatype: t_dt,
                },
            ) => {
                *lexical == t_lex.as_ref()
                    && lang.as_deref() == t_lang.as_deref()
                    && *datatype == *t_dt
            }
            _ => false,
        }
    }
}

/// Lowercase a language tag, allocating only when needed (BCP 47 tags are
/// ASCII).
fn normalize_lang(lang: &str) -> Cow<'_, str> {
    if lang.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(lang.to_ascii_lowercase())
    } else {
        Cow::Borrowed(lang)
    }
}

/// Re-split an IRI given as `(namespace, local)` at the canonical boundary.
///
/// Returns borrowed parts when the supplied split is already canonical;
/// otherwise concatenates and re-splits.
fn canonical_iri_parts<'a>(namespace: &'a str, local: &'a str) -> (Cow<'a, str>, Cow<'a, str>) {
    let local_has_sep = local.contains(['#', '/', ':']);
    let ns_ok = namespace.is_empty() || namespace.ends_with(['#', '/', ':']);
    if !local_has_sep && ns_ok {
        return (Cow::Borrowed(namespace), Cow::Borrowed(local));
    }
    let full = format!("{namespace}{local}");
    let (ns, loc) = split_iri(&full);
    (Cow::Owned(ns.to_string()), Cow::Owned(loc.to_string()))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryInner {
    /// Term arena; `TermId` is the index.
    terms: Vec<Term>,
    /// Content-keyed lookup sharing `Arc`s with the arena.
    lookup: HashMap<Term, TermId, RandomState>,
    namespaces: NamespaceDict,
    next_blank: u64,
}

/// Deduplicating term store.
///
/// Lookups take the internal read lock; interning takes the write lock only
/// after a read-locked fast path misses.
pub struct TermRegistry {
    inner: RwLock<RegistryInner>,
    lang_string: TermId,
    xsd_string: TermId,
}

impl Default for TermRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TermRegistry {
    /// Create a registry with the well-known datatype IRIs pre-interned.
    pub fn new() -> Self {
        let mut inner = RegistryInner {
            terms: Vec::new(),
            lookup: HashMap::with_hasher(RandomState::new()),
            namespaces: NamespaceDict::new(),
            next_blank: 0,
        };
        let lang_string = Self::intern_canonical(
            &mut inner,
            CanonicalSpec::iri_of(vocab::RDF_LANG_STRING),
        );
        let xsd_string =
            Self::intern_canonical(&mut inner, CanonicalSpec::iri_of(vocab::XSD_STRING));
        Self {
            inner: RwLock::new(inner),
            lang_string,
            xsd_string,
        }
    }

    /// The pre-interned `rdf:langString` identity.
    pub fn lang_string(&self) -> TermId {
        self.lang_string
    }

    /// The pre-interned `xsd:string` identity.
    pub fn xsd_string(&self) -> TermId {
        self.xsd_string
    }

    /// Intern any spec, creating the canonical term if absent.
    pub fn intern(&self, spec: TermSpec<'_>) -> Result<TermId> {
        let canonical = self.canonicalize(spec)?;

        // Fast path: read-locked lookup.
        {
            let inner = self.inner.read();
            let hash = canonical.content_hash(inner.lookup.hasher());
            if let Some((_, &id)) = inner
                .lookup
                .raw_entry()
                .from_hash(hash, |t| canonical.matches(t))
            {
                return Ok(id);
            }
        }

        let mut inner = self.inner.write();
        Ok(Self::intern_canonical(&mut inner, canonical))
    }

    /// Intern a total IRI string.
    pub fn intern_iri(&self, iri: &str) -> Result<TermId> {
        self.intern(TermSpec::Iri(iri))
    }

    /// Intern an IRI supplied as namespace and local part.
    pub fn intern_iri_parts(&self, namespace: &str, local: &str) -> Result<TermId> {
        self.intern(TermSpec::SplitIri { namespace, local })
    }

    /// Intern a blank node by its externally supplied label.
    pub fn intern_blank(&self, label: &str) -> Result<TermId> {
        self.intern(TermSpec::Blank(label))
    }

    /// Generate and intern a blank node with a fresh, unused label.
    pub fn fresh_blank(&self) -> TermId {
        let mut inner = self.inner.write();
        loop {
            let n = inner.next_blank;
            inner.next_blank += 1;
            let label = format!("genid-{n:x}");
            let spec = CanonicalSpec::Blank(&label);
            let hash = spec.content_hash(inner.lookup.hasher());
            let taken = inner
                .lookup
                .raw_entry()
                .from_hash(hash, |t| spec.matches(t))
                .is_some();
            if !taken {
                let spec = CanonicalSpec::Blank(&label);
                return Self::intern_canonical(&mut inner, spec);
            }
        }
    }

    /// Intern a literal.
    pub fn intern_literal(
        &self,
        lexical: &str,
        lang: Option<&str>,
        datatype: Option<TermId>,
    ) -> Result<TermId> {
        self.intern(TermSpec::Literal {
            lexical,
            lang,
            datatype,
        })
    }

    /// Non-creating lookup.
    pub fn lookup(&self, spec: TermSpec<'_>) -> Option<TermId> {
        let canonical = self.canonicalize(spec).ok()?;
        let inner = self.inner.read();
        let hash = canonical.content_hash(inner.lookup.hasher());
        inner
            .lookup
            .raw_entry()
            .from_hash(hash, |t| canonical.matches(t))
            .map(|(_, &id)| id)
    }

    /// Resolve an identity to its term (cheap `Arc` clone).
    pub fn term(&self, id: TermId) -> Option<Term> {
        self.inner.read().terms.get(id.index()).cloned()
    }

    /// Number of interned terms.
    pub fn len(&self) -> usize {
        self.inner.read().terms.len()
    }

    /// True if no terms are interned.
    pub fn is_empty(&self) -> bool {
        self.inner.read().terms.is_empty()
    }

    /// The namespace table as `(id, namespace)` pairs, id order.
    pub fn namespaces(&self) -> Vec<(u32, Arc<str>)> {
        let inner = self.inner.read();
        inner
            .namespaces
            .entries()
            .iter()
            .enumerate()
            .map(|(i, ns)| (i as u32, Arc::clone(ns)))
            .collect()
    }

    /// The id of an already interned namespace.
    pub fn namespace_id(&self, namespace: &str) -> Option<u32> {
        self.inner.read().namespaces.find(namespace)
    }

    // -- internals ---------------------------------------------------------

    /// Validate and normalise a spec to the stored form.
    fn canonicalize<'a>(&self, spec: TermSpec<'a>) -> Result<CanonicalSpec<'a>> {
        match spec {
            TermSpec::Iri(iri) => {
                if iri.is_empty() {
                    return Err(Error::invalid_term("empty IRI"));
                }
                let (ns, local) = split_iri(iri);
                Ok(CanonicalSpec::Iri {
                    namespace: Cow::Borrowed(ns),
                    local: Cow::Borrowed(local),
                })
            }
            TermSpec::SplitIri { namespace, local } => {
                if namespace.is_empty() && local.is_empty() {
                    return Err(Error::invalid_term("empty IRI"));
                }
                let (namespace, local) = canonical_iri_parts(namespace, local);
                Ok(CanonicalSpec::Iri { namespace, local })
            }
            TermSpec::Blank(label) => {
                if label.is_empty() {
                    return Err(Error::invalid_term("empty blank node label"));
                }
                Ok(CanonicalSpec::Blank(label))
            }
            TermSpec::Literal {
                lexical,
                lang,
                datatype,
            } => {
                let lang = match lang {
                    Some(tag) if tag.is_empty() => {
                        return Err(Error::invalid_term("empty language tag"))
                    }
                    Some(tag) => Some(normalize_lang(tag)),
                    None => None,
                };
                let datatype = self.canonical_datatype(lang.is_some(), datatype)?;
                Ok(CanonicalSpec::Literal {
                    lexical,
                    lang,
                    datatype,
                })
            }
        }
    }

    /// Canonicalise a literal datatype: `xsd:string` and `rdf:langString`
    /// collapse to `None`; a language tag only pairs with `rdf:langString`.
    fn canonical_datatype(&self, has_lang: bool, datatype: Option<TermId>) -> Result<Option<TermId>> {
        match datatype {
            None => Ok(None),
            Some(dt) if dt == self.lang_string => {
                if has_lang {
                    Ok(None)
                } else {
                    Err(Error::invalid_term(
                        "rdf:langString literal requires a language tag",
                    ))
                }
            }
            Some(dt) if dt == self.xsd_string => {
                if has_lang {
                    Err(Error::invalid_term(
                        "language-tagged literal with non-langString datatype",
                    ))
                } else {
                    Ok(None)
                }
            }
            Some(dt) => {
                if has_lang {
                    return Err(Error::invalid_term(
                        "language-tagged literal with non-langString datatype",
                    ));
                }
                match self.term(dt) {
                    Some(t) if t.is_iri() => Ok(Some(dt)),
                    Some(_) => Err(Error::invalid_term("literal datatype must be an IRI")),
                    None => Err(Error::invalid_term("unknown datatype identity")),
                }
            }
        }
    }

    /// Insert a canonical spec, deduplicating under the write lock.
    fn intern_canonical(inner: &mut RegistryInner, spec: CanonicalSpec<'_>) -> TermId {
        let hash = spec.content_hash(inner.lookup.hasher());
        if let Some((_, &id)) = inner
            .lookup
            .raw_entry()
            .from_hash(hash, |t| spec.matches(t))
        {
            return id;
        }

        let term = match spec {
            CanonicalSpec::Iri { namespace, local } => {
                let (_, ns_arc) = inner.namespaces.intern(&namespace);
                Term::Iri {
                    namespace: ns_arc,
                    local: Arc::from(local.as_ref()),
                }
            }
            CanonicalSpec::Blank(id) => Term::Blank { id: Arc::from(id) },
            CanonicalSpec::Literal {
                lexical,
                lang,
                datatype,
            } => Term::Literal {
                lexical: Arc::from(lexical),
                lang: lang.map(|l| Arc::from(l.as_ref())),
                datatype,
            },
        };

        let id = TermId::from_index(inner.terms.len());
        inner.terms.push(term.clone());
        // The occupied case was ruled out above, so match nothing and take
        // the vacant slot for this hash directly.
        match inner.lookup.raw_entry_mut().from_hash(hash, |_| false) {
            hashbrown::hash_map::RawEntryMut::Vacant(e) => {
                e.insert_hashed_nocheck(hash, term, id);
            }
            hashbrown::hash_map::RawEntryMut::Occupied(_) => unreachable!(),
        }
        id
    }
}

impl CanonicalSpec<'_> {
    /// A canonical spec for a well-formed, already canonical IRI constant.
    fn iri_of(iri: &str) -> CanonicalSpec<'_> {
        let (ns, local) = split_iri(iri);
        CanonicalSpec::Iri {
            namespace: Cow::Borrowed(ns),
            local: Cow::Borrowed(local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let reg = TermRegistry::new();
        let a = reg.intern_iri("http://example.org/ns#alice").unwrap();
        let b = reg.intern_iri("http://example.org/ns#alice").unwrap();
        let c = reg.intern_iri("http://example.org/ns#bob").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_and_unsplit_agree() {
        let reg = TermRegistry::new();
        let split = reg
            .intern_iri_parts("http://example.org/ns#", "alice")
            .unwrap();
        let unsplit = reg.intern_iri("http://example.org/ns#alice").unwrap();
        assert_eq!(split, unsplit);

        // A non-canonical split still lands on the same entry.
        let odd = reg
            .intern_iri_parts("http://example.org/", "ns#alice")
            .unwrap();
        assert_eq!(odd, unsplit);
    }

    #[test]
    fn test_namespace_sharing() {
        let reg = TermRegistry::new();
        let a = reg.intern_iri("http://example.org/ns#a").unwrap();
        let b = reg.intern_iri("http://example.org/ns#b").unwrap();
        let (Term::Iri { namespace: ns_a, .. }, Term::Iri { namespace: ns_b, .. }) =
            (reg.term(a).unwrap(), reg.term(b).unwrap())
        else {
            panic!("expected IRIs");
        };
        assert!(Arc::ptr_eq(&ns_a, &ns_b));
        assert!(reg.namespace_id("http://example.org/ns#").is_some());
    }

    #[test]
    fn test_empty_iri_rejected() {
        let reg = TermRegistry::new();
        assert!(matches!(
            reg.intern_iri(""),
            Err(Error::InvalidTerm(_))
        ));
        assert!(matches!(
            reg.intern_iri_parts("", ""),
            Err(Error::InvalidTerm(_))
        ));
    }

    #[test]
    fn test_lang_normalised_lowercase() {
        let reg = TermRegistry::new();
        let a = reg.intern_literal("chat", Some("FR"), None).unwrap();
        let b = reg.intern_literal("chat", Some("fr"), None).unwrap();
        assert_eq!(a, b);
        let Term::Literal { lang, .. } = reg.term(a).unwrap() else {
            panic!("expected literal");
        };
        assert_eq!(lang.as_deref(), Some("fr"));
    }

    #[test]
    fn test_literal_datatype_canonicalisation() {
        let reg = TermRegistry::new();
        let plain = reg.intern_literal("x", None, None).unwrap();
        let typed = reg
            .intern_literal("x", None, Some(reg.xsd_string()))
            .unwrap();
        assert_eq!(plain, typed);

        let tagged = reg.intern_literal("x", Some("en"), None).unwrap();
        let tagged_explicit = reg
            .intern_literal("x", Some("en"), Some(reg.lang_string()))
            .unwrap();
        assert_eq!(tagged, tagged_explicit);
        assert_ne!(plain, tagged);
    }

    #[test]
    fn test_invalid_literals() {
        let reg = TermRegistry::new();
        let int = reg
            .intern_iri("http://www.w3.org/2001/XMLSchema#integer")
            .unwrap();

        // Language tag with a non-langString datatype.
        assert!(matches!(
            reg.intern_literal("1", Some("en"), Some(int)),
            Err(Error::InvalidTerm(_))
        ));
        // langString without a language tag.
        assert!(matches!(
            reg.intern_literal("x", None, Some(reg.lang_string())),
            Err(Error::InvalidTerm(_))
        ));
        // A literal cannot be a datatype.
        let lit = reg.intern_literal("y", None, None).unwrap();
        assert!(matches!(
            reg.intern_literal("x", None, Some(lit)),
            Err(Error::InvalidTerm(_))
        ));
    }

    #[test]
    fn test_lookup_is_non_creating() {
        let reg = TermRegistry::new();
        let before = reg.len();
        assert!(reg.lookup(TermSpec::Iri("http://example.org/missing")).is_none());
        assert_eq!(reg.len(), before);

        let id = reg.intern_iri("http://example.org/present").unwrap();
        assert_eq!(reg.lookup(TermSpec::Iri("http://example.org/present")), Some(id));
    }

    #[test]
    fn test_fresh_blank_unique() {
        let reg = TermRegistry::new();
        // Pre-intern a label the factory would otherwise produce first.
        reg.intern_blank("genid-0").unwrap();
        let a = reg.fresh_blank();
        let b = reg.fresh_blank();
        assert_ne!(a, b);
        assert_ne!(reg.lookup(TermSpec::Blank("genid-0")), Some(a));
    }

    #[test]
    fn test_identity_stability() {
        let reg = TermRegistry::new();
        let id = reg.intern_iri("http://example.org/stable").unwrap();
        for i in 0..100 {
            reg.intern_iri(&format!("http://example.org/other{i}")).unwrap();
        }
        assert_eq!(reg.intern_iri("http://example.org/stable").unwrap(), id);
        assert!(reg.term(id).unwrap().is_iri_str("http://example.org/stable"));
    }
}
