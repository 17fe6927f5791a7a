//! Raw syntax tree as produced by the external parser.
//!
//! The tree is exchanged as JSON. Every node carries a `type` tag and an
//! optional `location` (`{start: {line, column}, end: {line, column}}`);
//! unknown fields such as byte offsets are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One position in a source file (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line number
    pub line: usize,
    /// Column number
    pub column: usize,
}

/// Start and end of a syntax node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// First character of the node
    pub start: Position,
    /// One past the last character of the node
    pub end: Position,
}

/// Complete parsed file: a sequence of labeled statements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    /// Top-level statements in source order
    pub statements: Vec<LabeledStmt>,
}

impl Program {
    /// Creates a program from its top-level statements
    pub fn new(statements: Vec<LabeledStmt>) -> Self {
        Program { statements }
    }
}

/// Identifier occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    /// Identifier text
    pub value: String,
    /// Where it was written
    #[serde(default)]
    pub location: Location,
}

impl Ident {
    /// Identifier without location information
    pub fn new(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            location: Location::default(),
        }
    }
}

/// String literal used in `import "..."`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrLit {
    /// Unescaped contents
    pub value: String,
    #[serde(default)]
    pub location: Location,
}

/// Label declaration `.name:` or `extern .name:`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecl {
    /// Label name as written
    pub value: String,
    /// Exported to importing files
    #[serde(default, rename = "extern")]
    pub is_extern: bool,
    #[serde(default)]
    pub location: Location,
}

/// A statement together with the labels attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledStmt {
    /// Labels bound to the start of the statement
    #[serde(default)]
    pub labels: Vec<LabelDecl>,
    /// The statement itself
    pub st: Stmt,
    #[serde(default)]
    pub location: Location,
}

impl LabeledStmt {
    /// Wraps a statement without labels
    pub fn new(st: Stmt) -> Self {
        LabeledStmt {
            labels: Vec::new(),
            st,
            location: Location::default(),
        }
    }

    /// Attaches a file-local label
    pub fn labeled(mut self, name: impl Into<String>) -> Self {
        self.labels.push(LabelDecl {
            value: name.into(),
            is_extern: false,
            location: Location::default(),
        });
        self
    }

    /// Attaches an exported label
    pub fn exported(mut self, name: impl Into<String>) -> Self {
        self.labels.push(LabelDecl {
            value: name.into(),
            is_extern: true,
            location: Location::default(),
        });
        self
    }
}

impl From<Stmt> for LabeledStmt {
    fn from(st: Stmt) -> Self {
        LabeledStmt::new(st)
    }
}

/// Struct field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Declared type
    pub ftype: TypeExpr,
    #[serde(default)]
    pub location: Location,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    /// `import "name";`
    #[serde(rename = "import")]
    Import {
        /// File name searched for in the import directories
        imp: StrLit,
    },

    /// Expression evaluated for its effect
    #[serde(rename = "exprst")]
    ExprSt {
        /// The expression
        expr: Expr,
    },

    /// `goto dest;`, optionally with labels written at the goto site
    #[serde(rename = "goto")]
    Goto {
        /// Target address expression
        dest: Expr,
        /// Labels declared on the goto itself
        #[serde(default)]
        labels: Vec<LabelDecl>,
    },

    /// `let name = val;`
    #[serde(rename = "let")]
    Let {
        /// Variable name
        name: Ident,
        /// Initializer
        val: Expr,
    },

    /// `let name[asize];` or `let name[asize]: elem;`
    #[serde(rename = "let[]")]
    LetArray {
        /// Variable name
        name: Ident,
        /// Element count, a compile-time constant
        asize: Expr,
        /// Element type, `n128` when absent
        #[serde(default)]
        elem: Option<TypeExpr>,
    },

    /// `dst = src;`
    #[serde(rename = "assign")]
    Assign {
        /// Assignment target
        dst: Expr,
        /// Value stored
        src: Expr,
    },

    /// `{ ... }`
    #[serde(rename = "block")]
    Block {
        /// Statements of the block
        body: Vec<LabeledStmt>,
    },

    /// `if cond then else otherwise`
    #[serde(rename = "if")]
    If {
        /// Condition
        cond: Expr,
        /// Taken when the condition is non-zero
        then: Box<LabeledStmt>,
        /// Taken when the condition is zero
        #[serde(default)]
        otherwise: Option<Box<LabeledStmt>>,
    },

    /// `while cond body` or `do body while cond`
    #[serde(rename = "while")]
    While {
        /// Loop condition
        cond: Expr,
        /// Loop body
        body: Box<LabeledStmt>,
        /// Body runs before the first test
        #[serde(default, rename = "isDo")]
        is_do: bool,
    },

    /// `struct name { field: type, ... }`
    #[serde(rename = "structdef")]
    StructDef {
        /// Struct name
        name: Ident,
        /// Fields in declaration order
        fields: Vec<Field>,
    },

    /// `bbj { a, b, c, ... }` raw words
    #[serde(rename = "bbj")]
    Bbj {
        /// Values emitted as 8-byte words
        body: Vec<Expr>,
    },

    /// `@name value`
    #[serde(rename = "pragma")]
    Pragma {
        /// Pragma name without `@`
        name: Ident,
        /// Optional argument
        #[serde(default)]
        value: Option<Expr>,
    },
}

impl Stmt {
    /// `import "name";`
    pub fn import(name: impl Into<String>) -> Self {
        Stmt::Import {
            imp: StrLit {
                value: name.into(),
                location: Location::default(),
            },
        }
    }

    /// Expression statement
    pub fn expression(expr: Expr) -> Self {
        Stmt::ExprSt { expr }
    }

    /// `goto dest;`
    pub fn goto(dest: Expr) -> Self {
        Stmt::Goto {
            dest,
            labels: Vec::new(),
        }
    }

    /// `let name = val;`
    pub fn let_var(name: impl Into<String>, val: Expr) -> Self {
        Stmt::Let {
            name: Ident::new(name),
            val,
        }
    }

    /// `let name[size];`
    pub fn let_array(name: impl Into<String>, size: Expr, elem: Option<TypeExpr>) -> Self {
        Stmt::LetArray {
            name: Ident::new(name),
            asize: size,
            elem,
        }
    }

    /// `dst = src;`
    pub fn assign(dst: Expr, src: Expr) -> Self {
        Stmt::Assign { dst, src }
    }

    /// `{ body }`
    pub fn block(body: Vec<LabeledStmt>) -> Self {
        Stmt::Block { body }
    }

    /// `if cond then [else otherwise]`
    pub fn if_else(cond: Expr, then: impl Into<LabeledStmt>, otherwise: Option<LabeledStmt>) -> Self {
        Stmt::If {
            cond,
            then: Box::new(then.into()),
            otherwise: otherwise.map(Box::new),
        }
    }

    /// `while cond body`
    pub fn while_loop(cond: Expr, body: impl Into<LabeledStmt>) -> Self {
        Stmt::While {
            cond,
            body: Box::new(body.into()),
            is_do: false,
        }
    }

    /// `do body while cond`
    pub fn do_while(body: impl Into<LabeledStmt>, cond: Expr) -> Self {
        Stmt::While {
            cond,
            body: Box::new(body.into()),
            is_do: true,
        }
    }

    /// `struct name { fields }`
    pub fn struct_def(name: impl Into<String>, fields: Vec<(&str, TypeExpr)>) -> Self {
        Stmt::StructDef {
            name: Ident::new(name),
            fields: fields
                .into_iter()
                .map(|(name, ftype)| Field {
                    name: name.to_string(),
                    ftype,
                    location: Location::default(),
                })
                .collect(),
        }
    }

    /// `bbj { values }`
    pub fn bbj(body: Vec<Expr>) -> Self {
        Stmt::Bbj { body }
    }

    /// `@name [value]`
    pub fn pragma(name: impl Into<String>, value: Option<Expr>) -> Self {
        Stmt::Pragma {
            name: Ident::new(name),
            value,
        }
    }
}

/// Type expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TypeExpr {
    /// Named type: builtin, struct or imported
    #[serde(rename = "typeid")]
    Named {
        value: String,
        #[serde(default)]
        location: Location,
    },

    /// `inner[size]`
    #[serde(rename = "arraytype")]
    Array {
        inner: Box<TypeExpr>,
        /// Element count, a compile-time constant
        size: Box<Expr>,
        #[serde(default)]
        location: Location,
    },
}

impl TypeExpr {
    /// Named type reference
    pub fn named(value: impl Into<String>) -> Self {
        TypeExpr::Named {
            value: value.into(),
            location: Location::default(),
        }
    }

    /// Array of `count` elements of `inner`
    pub fn array(inner: TypeExpr, size: Expr) -> Self {
        TypeExpr::Array {
            inner: Box::new(inner),
            size: Box::new(size),
            location: Location::default(),
        }
    }

    /// Where the type was written
    pub fn location(&self) -> Location {
        match self {
            TypeExpr::Named { location, .. } | TypeExpr::Array { location, .. } => *location,
        }
    }
}

/// Postfix accessors on an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Accessor {
    /// `(args)`
    #[serde(rename = "call")]
    Call { args: Vec<Expr> },
    /// `[index]`
    #[serde(rename = "index")]
    Index { index: Box<Expr> },
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    #[serde(rename = "-")]
    Neg,
    /// `+x`
    #[serde(rename = "+")]
    Plus,
    /// `~x`
    #[serde(rename = "~")]
    BitNot,
    /// `!x`
    #[serde(rename = "!")]
    Not,
    /// `*x`
    #[serde(rename = "*")]
    Deref,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "&")]
    And,
    #[serde(rename = "|")]
    Or,
    #[serde(rename = "^")]
    Xor,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    /// `(type) a`
    #[serde(rename = "cast")]
    Cast {
        a: Box<Expr>,
        restype: TypeExpr,
        #[serde(default)]
        location: Location,
    },

    /// `base(args)[index]...`
    #[serde(rename = "access")]
    Access {
        base: Box<Expr>,
        list: Vec<Accessor>,
        #[serde(default)]
        location: Location,
    },

    /// Non-negative integer literal
    #[serde(rename = "posint")]
    PosInt {
        #[serde(with = "literal")]
        value: u128,
        #[serde(default)]
        location: Location,
    },

    /// String literal
    #[serde(rename = "strlit")]
    StrLit {
        value: String,
        #[serde(default)]
        location: Location,
    },

    /// Variable reference
    #[serde(rename = "id")]
    Id {
        value: String,
        #[serde(default)]
        location: Location,
    },

    /// Label reference `.name`
    #[serde(rename = "label")]
    Label {
        value: String,
        #[serde(default)]
        location: Location,
    },

    #[serde(rename = "unary")]
    Unary {
        op: UnaryOp,
        a: Box<Expr>,
        #[serde(default)]
        location: Location,
    },

    #[serde(rename = "binary")]
    Binary {
        op: BinaryOp,
        a: Box<Expr>,
        b: Box<Expr>,
        #[serde(default)]
        location: Location,
    },
}

impl Expr {
    /// Integer literal
    pub fn int(value: u128) -> Self {
        Expr::PosInt {
            value,
            location: Location::default(),
        }
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Expr::StrLit {
            value: value.into(),
            location: Location::default(),
        }
    }

    /// Variable reference
    pub fn id(name: impl Into<String>) -> Self {
        Expr::Id {
            value: name.into(),
            location: Location::default(),
        }
    }

    /// Label reference
    pub fn label(name: impl Into<String>) -> Self {
        Expr::Label {
            value: name.into(),
            location: Location::default(),
        }
    }

    /// `(ty) a` with a named target type
    pub fn cast(ty: &str, a: Expr) -> Self {
        Expr::Cast {
            a: Box::new(a),
            restype: TypeExpr::named(ty),
            location: Location::default(),
        }
    }

    pub fn unary(op: UnaryOp, a: Expr) -> Self {
        Expr::Unary {
            op,
            a: Box::new(a),
            location: Location::default(),
        }
    }

    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Self {
        Expr::Binary {
            op,
            a: Box::new(a),
            b: Box::new(b),
            location: Location::default(),
        }
    }

    /// `*a`
    pub fn deref(a: Expr) -> Self {
        Expr::unary(UnaryOp::Deref, a)
    }

    /// `base` followed by postfix accessors
    pub fn access(base: Expr, list: Vec<Accessor>) -> Self {
        Expr::Access {
            base: Box::new(base),
            list,
            location: Location::default(),
        }
    }

    /// Where the expression was written
    pub fn location(&self) -> Location {
        match self {
            Expr::Cast { location, .. }
            | Expr::Access { location, .. }
            | Expr::PosInt { location, .. }
            | Expr::StrLit { location, .. }
            | Expr::Id { location, .. }
            | Expr::Label { location, .. }
            | Expr::Unary { location, .. }
            | Expr::Binary { location, .. } => *location,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Plus => write!(f, "+"),
            UnaryOp::BitNot => write!(f, "~"),
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Deref => write!(f, "*"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Rem => write!(f, "%"),
            BinaryOp::And => write!(f, "&"),
            BinaryOp::Or => write!(f, "|"),
            BinaryOp::Xor => write!(f, "^"),
            BinaryOp::Shl => write!(f, "<<"),
            BinaryOp::Shr => write!(f, ">>"),
        }
    }
}

/// Integer literals travel as JSON numbers when they fit in 64 bits and as
/// decimal strings otherwise.
mod literal {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        match u64::try_from(*value) {
            Ok(small) => serializer.serialize_u64(small),
            Err(_) => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(LiteralVisitor)
    }

    struct LiteralVisitor;

    impl<'de> Visitor<'de> for LiteralVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom(format!("negative literal {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            v.parse::<u128>()
                .map_err(|e| E::custom(format!("invalid literal `{}`: {}", v, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_labeled_statement() {
        let json = r#"[
            {"labels": [{"value": ".top", "extern": true}],
             "st": {"type": "let", "name": {"value": "x"},
                    "val": {"type": "cast", "restype": {"type": "typeid", "value": "n8"},
                            "a": {"type": "posint", "value": 7}}}}
        ]"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.statements.len(), 1);
        let stmt = &program.statements[0];
        assert!(stmt.labels[0].is_extern);
        assert_eq!(
            stmt.st,
            Stmt::let_var("x", Expr::cast("n8", Expr::int(7)))
        );
    }

    #[test]
    fn test_deserialize_locations_ignore_offsets() {
        let json = r#"{"type": "id", "value": "y",
            "location": {"start": {"offset": 4, "line": 2, "column": 5},
                         "end": {"offset": 5, "line": 2, "column": 6}}}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(expr.location().start, Position { line: 2, column: 5 });
        assert_eq!(expr.location().end.column, 6);
    }

    #[test]
    fn test_wide_literal_as_string() {
        let json = r#"{"type": "posint", "value": "340282366920938463463374607431768211455"}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(expr, Expr::int(u128::MAX));

        let back = serde_json::to_string(&Expr::int(u128::MAX)).unwrap();
        assert!(back.contains("\"340282366920938463463374607431768211455\""));
    }

    #[test]
    fn test_operators() {
        let json = r#"{"type": "binary", "op": "<<", "a": {"type": "posint", "value": 1},
                       "b": {"type": "unary", "op": "~", "a": {"type": "posint", "value": 0}}}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        match expr {
            Expr::Binary { op, b, .. } => {
                assert_eq!(op, BinaryOp::Shl);
                assert!(matches!(*b, Expr::Unary { op: UnaryOp::BitNot, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(BinaryOp::Rem.to_string(), "%");
        assert_eq!(UnaryOp::Deref.to_string(), "*");
    }

    #[test]
    fn test_while_and_array_let() {
        let json = r#"[
            {"st": {"type": "while", "isDo": true, "cond": {"type": "id", "value": "k"},
                    "body": {"st": {"type": "block", "body": []}}}},
            {"st": {"type": "let[]", "name": {"value": "buf"}, "asize": {"type": "posint", "value": 4}}}
        ]"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert!(matches!(program.statements[0].st, Stmt::While { is_do: true, .. }));
        assert!(matches!(
            program.statements[1].st,
            Stmt::LetArray { elem: None, .. }
        ));
    }
}
