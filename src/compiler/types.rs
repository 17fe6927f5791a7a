//! # Type Model
//!
//! Types are shared objects: two named types are the same type only when they
//! are the same allocation, so an alias created by importing a struct is still
//! that struct. Array types are the exception and compare structurally.

use std::fmt;
use std::rc::Rc;

/// Shared handle to a type
pub type TypeRef = Rc<Type>;

/// Types known to the resolver
#[derive(Debug, Clone)]
pub enum Type {
    /// Unsigned integer of `width` bytes
    Integer {
        /// Builtin name (`n8` .. `n128`)
        name: &'static str,
        /// Width in bytes
        width: usize,
    },
    /// Pointer and length pair occupying a full 16-byte register
    String,
    /// Literal whose width has not been fixed by a cast or declaration
    UnknownInteger,
    /// Fixed-size array
    Array {
        /// Element type
        inner: TypeRef,
        /// Number of elements
        count: usize,
    },
    /// User-defined struct
    Struct {
        /// Declared name
        name: String,
        /// Fields in declaration order
        fields: Vec<(String, TypeRef)>,
    },
}

impl Type {
    /// Shared array type of `count` elements of `inner`
    pub fn array(inner: TypeRef, count: usize) -> TypeRef {
        Rc::new(Type::Array { inner, count })
    }

    /// Size in bytes. `None` for structs, whose layout is not defined.
    pub fn width(&self) -> Option<usize> {
        match self {
            Type::Integer { width, .. } => Some(*width),
            Type::String | Type::UnknownInteger => Some(16),
            Type::Array { inner, count } => inner.width().map(|w| w.saturating_mul(*count)),
            Type::Struct { .. } => None,
        }
    }

    /// Whether values of this type can be used where an integer is expected
    /// (conditions, operands of unary operators, index values)
    pub fn is_integer_compatible(&self) -> bool {
        matches!(
            self,
            Type::Integer { .. } | Type::String | Type::UnknownInteger
        )
    }

    /// Whether this is the width-less literal type
    pub fn is_unknown_integer(&self) -> bool {
        matches!(self, Type::UnknownInteger)
    }
}

/// Type identity: the same allocation, or structurally equal arrays
pub fn same_type(a: &TypeRef, b: &TypeRef) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (&**a, &**b) {
        (
            Type::Array {
                inner: inner_a,
                count: count_a,
            },
            Type::Array {
                inner: inner_b,
                count: count_b,
            },
        ) => count_a == count_b && same_type(inner_a, inner_b),
        _ => false,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Integer { name, .. } => write!(f, "{}", name),
            Type::String => write!(f, "string"),
            Type::UnknownInteger => write!(f, "integer literal"),
            Type::Array { inner, count } => write!(f, "{}[{}]", inner, count),
            Type::Struct { name, .. } => write!(f, "struct {}", name),
        }
    }
}

/// Builtin types shared by every file of one compilation
#[derive(Debug, Clone)]
pub struct Builtins {
    pub n8: TypeRef,
    pub n16: TypeRef,
    pub n32: TypeRef,
    pub n64: TypeRef,
    pub n128: TypeRef,
    pub string: TypeRef,
    pub unknown_integer: TypeRef,
}

impl Builtins {
    pub fn new() -> Self {
        let integer = |name, width| Rc::new(Type::Integer { name, width });
        Builtins {
            n8: integer("n8", 1),
            n16: integer("n16", 2),
            n32: integer("n32", 4),
            n64: integer("n64", 8),
            n128: integer("n128", 16),
            string: Rc::new(Type::String),
            unknown_integer: Rc::new(Type::UnknownInteger),
        }
    }

    /// Type of label addresses; `addr` is an alias of `n64`
    pub fn addr(&self) -> TypeRef {
        self.n64.clone()
    }

    /// Names visible in every file's root scope
    pub fn named(&self) -> Vec<(&'static str, TypeRef)> {
        vec![
            ("n8", self.n8.clone()),
            ("n16", self.n16.clone()),
            ("n32", self.n32.clone()),
            ("n64", self.n64.clone()),
            ("n128", self.n128.clone()),
            ("string", self.string.clone()),
            ("addr", self.addr()),
        ]
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_widths() {
        let builtins = Builtins::new();
        assert_eq!(builtins.n8.width(), Some(1));
        assert_eq!(builtins.n32.width(), Some(4));
        assert_eq!(builtins.n128.width(), Some(16));
        assert_eq!(builtins.string.width(), Some(16));
        assert_eq!(builtins.unknown_integer.width(), Some(16));
    }

    #[test]
    fn test_addr_is_n64() {
        let builtins = Builtins::new();
        assert!(same_type(&builtins.addr(), &builtins.n64));
        let names: Vec<_> = builtins.named().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"addr"));
    }

    #[test]
    fn test_identity_is_by_allocation() {
        let builtins = Builtins::new();
        let other_n8 = Rc::new(Type::Integer { name: "n8", width: 1 });
        assert!(same_type(&builtins.n8, &builtins.n8));
        assert!(!same_type(&builtins.n8, &other_n8));
        assert!(!same_type(&builtins.n8, &builtins.n16));
    }

    #[test]
    fn test_arrays_compare_structurally() {
        let builtins = Builtins::new();
        let a = Type::array(builtins.n8.clone(), 4);
        let b = Type::array(builtins.n8.clone(), 4);
        let c = Type::array(builtins.n8.clone(), 5);
        let d = Type::array(builtins.n16.clone(), 4);
        assert!(same_type(&a, &b));
        assert!(!same_type(&a, &c));
        assert!(!same_type(&a, &d));
        assert_eq!(a.width(), Some(4));
        assert_eq!(d.to_string(), "n16[4]");
    }

    #[test]
    fn test_structs_are_nominal() {
        let builtins = Builtins::new();
        let fields = vec![("x".to_string(), builtins.n8.clone())];
        let a = Rc::new(Type::Struct {
            name: "point".to_string(),
            fields: fields.clone(),
        });
        let b = Rc::new(Type::Struct {
            name: "point".to_string(),
            fields,
        });
        assert!(same_type(&a, &a.clone()));
        assert!(!same_type(&a, &b));
        assert_eq!(a.width(), None);
        assert!(!a.is_integer_compatible());
        assert_eq!(a.to_string(), "struct point");
    }
}
