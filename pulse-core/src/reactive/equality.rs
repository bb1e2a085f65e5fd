//! Equality policies for change detection.
//!
//! A write is only accepted when the new value differs from the current one
//! under the cell's policy. The default is structural equality (`PartialEq`).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Decides whether two values of a cell are "the same" for refresh purposes.
pub struct Equality<T> {
    eq: Rc<dyn Fn(&T, &T) -> bool>,
    name: &'static str,
}

impl<T: PartialEq + 'static> Equality<T> {
    /// Structural equality via `PartialEq`.
    pub fn structural() -> Self {
        Self {
            eq: Rc::new(|a: &T, b: &T| a == b),
            name: "structural",
        }
    }
}

impl<T: 'static> Equality<T> {
    /// Treat every write as a change.
    pub fn always_changed() -> Self {
        Self {
            eq: Rc::new(|_: &T, _: &T| false),
            name: "always_changed",
        }
    }

    /// Use a custom predicate (for example comparing only an id field).
    pub fn custom<F>(eq: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            eq: Rc::new(eq),
            name: "custom",
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn eq(&self, a: &T, b: &T) -> bool {
        (self.eq)(a, b)
    }

    /// Erase the value type so the store can hold mixed cells.
    pub(crate) fn erase(self) -> ErasedEquality {
        let eq = self.eq;
        ErasedEquality {
            eq: Box::new(move |a: &dyn Any, b: &dyn Any| {
                match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                    (Some(a), Some(b)) => eq(a, b),
                    _ => false,
                }
            }),
            name: self.name,
        }
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            eq: Rc::clone(&self.eq),
            name: self.name,
        }
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.name).finish()
    }
}

/// Type-erased equality stored alongside a cell's value.
pub(crate) struct ErasedEquality {
    eq: Box<dyn Fn(&dyn Any, &dyn Any) -> bool>,
    name: &'static str,
}

impl ErasedEquality {
    pub(crate) fn eq(&self, a: &dyn Any, b: &dyn Any) -> bool {
        (self.eq)(a, b)
    }
}

impl fmt::Debug for ErasedEquality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErasedEquality").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Row {
        id: u32,
        label: String,
    }

    #[test]
    fn structural_compares_fields() {
        let eq = Equality::<Row>::structural();
        let a = Row { id: 1, label: "a".into() };
        let b = Row { id: 1, label: "a".into() };
        let c = Row { id: 1, label: "c".into() };

        assert!(eq.eq(&a, &b));
        assert!(!eq.eq(&a, &c));
    }

    #[test]
    fn custom_can_ignore_fields() {
        let eq = Equality::custom(|a: &Row, b: &Row| a.id == b.id);
        let a = Row { id: 1, label: "a".into() };
        let c = Row { id: 1, label: "c".into() };

        assert!(eq.eq(&a, &c));
        assert_eq!(eq.name(), "custom");
    }

    #[test]
    fn always_changed_never_matches() {
        let eq = Equality::<i32>::always_changed();
        assert!(!eq.eq(&1, &1));
    }

    #[test]
    fn erased_rejects_foreign_types() {
        let erased = Equality::<i32>::structural().erase();
        assert!(erased.eq(&1i32, &1i32));
        assert!(!erased.eq(&1i32, &1i64));
    }
}
