//! Statements and scan patterns.
//!
//! A [`Statement`] is the value-level 4-tuple of term identities returned by
//! scans. A [`Pattern`] constrains any subset of the four positions; the
//! context position is three-valued (any / default graph / a named graph),
//! expressed by [`ContextFilter`].

use crate::term::TermId;

/// A statement: subject, predicate, object, and optional context.
///
/// `context == None` places the statement in the default graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Statement {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
    pub context: Option<TermId>,
}

impl Statement {
    /// Create a new statement.
    pub fn new(
        subject: TermId,
        predicate: TermId,
        object: TermId,
        context: Option<TermId>,
    ) -> Self {
        Self {
            subject,
            predicate,
            object,
            context,
        }
    }
}

/// Context constraint of a [`Pattern`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextFilter {
    /// Match statements in any context.
    #[default]
    Any,
    /// Match only the default graph.
    Default,
    /// Match only the given named graph.
    Named(TermId),
}

impl ContextFilter {
    /// True if `context` satisfies this filter.
    #[inline]
    pub fn matches(self, context: Option<TermId>) -> bool {
        match self {
            ContextFilter::Any => true,
            ContextFilter::Default => context.is_none(),
            ContextFilter::Named(id) => context == Some(id),
        }
    }

    /// The exact context this filter pins, if it pins one.
    ///
    /// `Any` pins nothing; `Default` pins the null context.
    pub fn exact(self) -> Option<Option<TermId>> {
        match self {
            ContextFilter::Any => None,
            ContextFilter::Default => Some(None),
            ContextFilter::Named(id) => Some(Some(id)),
        }
    }
}

/// A scan pattern: optional constraints on each statement position.
///
/// The empty pattern ([`Pattern::any`]) matches every statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub subject: Option<TermId>,
    pub predicate: Option<TermId>,
    pub object: Option<TermId>,
    pub context: ContextFilter,
}

impl Pattern {
    /// The unconstrained pattern.
    pub fn any() -> Self {
        Self::default()
    }

    /// Constrain the subject position.
    pub fn with_subject(mut self, subject: TermId) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Constrain the predicate position.
    pub fn with_predicate(mut self, predicate: TermId) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Constrain the object position.
    pub fn with_object(mut self, object: TermId) -> Self {
        self.object = Some(object);
        self
    }

    /// Constrain to the default graph.
    pub fn in_default_context(mut self) -> Self {
        self.context = ContextFilter::Default;
        self
    }

    /// Constrain to a named graph.
    pub fn in_context(mut self, context: TermId) -> Self {
        self.context = ContextFilter::Named(context);
        self
    }

    /// True if the statement satisfies every constraint.
    #[inline]
    pub fn matches(&self, st: &Statement) -> bool {
        self.subject.map_or(true, |s| s == st.subject)
            && self.predicate.map_or(true, |p| p == st.predicate)
            && self.object.map_or(true, |o| o == st.object)
            && self.context.matches(st.context)
    }

    /// True if no position is constrained.
    pub fn is_unconstrained(&self) -> bool {
        self.subject.is_none()
            && self.predicate.is_none()
            && self.object.is_none()
            && self.context == ContextFilter::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u32) -> TermId {
        TermId::from_u32(v)
    }

    #[test]
    fn test_pattern_any_matches_everything() {
        let st = Statement::new(id(1), id(2), id(3), None);
        assert!(Pattern::any().matches(&st));
        assert!(Pattern::any().is_unconstrained());
    }

    #[test]
    fn test_pattern_position_constraints() {
        let st = Statement::new(id(1), id(2), id(3), Some(id(4)));

        assert!(Pattern::any().with_subject(id(1)).matches(&st));
        assert!(!Pattern::any().with_subject(id(9)).matches(&st));
        assert!(Pattern::any()
            .with_predicate(id(2))
            .with_object(id(3))
            .matches(&st));
    }

    #[test]
    fn test_context_filter() {
        let in_default = Statement::new(id(1), id(2), id(3), None);
        let in_named = Statement::new(id(1), id(2), id(3), Some(id(4)));

        assert!(Pattern::any().in_default_context().matches(&in_default));
        assert!(!Pattern::any().in_default_context().matches(&in_named));
        assert!(Pattern::any().in_context(id(4)).matches(&in_named));
        assert!(!Pattern::any().in_context(id(5)).matches(&in_named));
    }

    #[test]
    fn test_context_filter_exact() {
        assert_eq!(ContextFilter::Any.exact(), None);
        assert_eq!(ContextFilter::Default.exact(), Some(None));
        assert_eq!(ContextFilter::Named(id(7)).exact(), Some(Some(id(7))));
    }
}
