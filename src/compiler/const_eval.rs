//! Compile-time evaluation of typed expressions.
//!
//! Values are 128-bit and all arithmetic wraps. What a label or string
//! literal evaluates to depends on the stage asking, so those lookups go
//! through [`ConstEnv`].

use crate::compiler::image::TRUTHY_SENTINEL;
use crate::compiler::program::{Expr, ExprKind, Label};
use crate::compiler::types::Type;
use crate::error::{Error, Result, SourceLocation};
use crate::parser::ast::{BinaryOp, UnaryOp};

/// Stage-specific meaning of labels and strings
pub trait ConstEnv {
    /// Address of `label`
    fn label_address(&self, label: &Label, location: &SourceLocation) -> Result<u128>;

    /// Address of the pooled copy of `value`
    fn string_address(&self, value: &str, location: &SourceLocation) -> Result<u128>;
}

/// Environment used during name resolution, where no address is known yet
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionEnv;

impl ConstEnv for ResolutionEnv {
    fn label_address(&self, _label: &Label, location: &SourceLocation) -> Result<u128> {
        Err(Error::NotConstant {
            location: location.clone(),
        })
    }

    fn string_address(&self, _value: &str, location: &SourceLocation) -> Result<u128> {
        Err(Error::NotConstant {
            location: location.clone(),
        })
    }
}

/// Evaluates `expr` to a 128-bit value
pub fn evaluate(expr: &Expr, env: &dyn ConstEnv) -> Result<u128> {
    match &expr.kind {
        ExprKind::Int(value) => Ok(*value),
        ExprKind::Str(value) => env.string_address(value, &expr.location),
        ExprKind::Label(slot) => {
            let label = slot.target().ok_or_else(|| Error::UnresolvedLabel {
                name: slot.name.clone(),
                location: expr.location.clone(),
            })?;
            env.label_address(label, &expr.location)
        }
        ExprKind::Var(_) | ExprKind::Index { .. } => Err(Error::NotConstant {
            location: expr.location.clone(),
        }),
        ExprKind::Cast(inner) => {
            let value = evaluate(inner, env)?;
            truncate(value, &expr.ty, &expr.location)
        }
        ExprKind::Unary { op, operand } => {
            let value = evaluate(operand, env)?;
            match op {
                UnaryOp::Neg => Ok(value.wrapping_neg()),
                UnaryOp::Plus => Ok(value),
                UnaryOp::BitNot => Ok(!value),
                UnaryOp::Not => Ok(if value == 0 {
                    TRUTHY_SENTINEL as u128
                } else {
                    0
                }),
                UnaryOp::Deref => Err(Error::NotConstant {
                    location: expr.location.clone(),
                }),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = evaluate(lhs, env)?;
            let b = evaluate(rhs, env)?;
            binary(*op, a, b, &expr.location)
        }
    }
}

fn binary(op: BinaryOp, a: u128, b: u128, location: &SourceLocation) -> Result<u128> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(Error::DivisionByZero {
                location: location.clone(),
            })
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => u32::try_from(b)
            .ok()
            .and_then(|shift| a.checked_shl(shift))
            .unwrap_or(0),
        BinaryOp::Shr => u32::try_from(b)
            .ok()
            .and_then(|shift| a.checked_shr(shift))
            .unwrap_or(0),
    };
    Ok(value)
}

/// Keeps the low `width` bytes of `value`, where `width` is the size of `ty`
pub fn truncate(value: u128, ty: &Type, location: &SourceLocation) -> Result<u128> {
    let width = ty
        .width()
        .ok_or_else(|| Error::unimplemented(format!("sizeof `{}`", ty), location))?;
    if width >= 16 {
        Ok(value)
    } else {
        Ok(value & ((1u128 << (width * 8)) - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::program::LabelSlot;
    use crate::compiler::types::{Builtins, TypeRef};
    use crate::parser::ast::Location;
    use std::path::Path;
    use std::sync::Arc;

    fn location() -> SourceLocation {
        SourceLocation::new(Arc::from(Path::new("test.bbj")), Location::default())
    }

    fn expr(kind: ExprKind, ty: &TypeRef) -> Expr {
        Expr {
            kind,
            ty: ty.clone(),
            location: location(),
        }
    }

    fn int(value: u128) -> Expr {
        expr(ExprKind::Int(value), &Builtins::new().unknown_integer)
    }

    fn bin(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        let ty = a.ty.clone();
        expr(
            ExprKind::Binary {
                op,
                lhs: Box::new(a),
                rhs: Box::new(b),
            },
            &ty,
        )
    }

    struct FixedAddresses;

    impl ConstEnv for FixedAddresses {
        fn label_address(&self, _label: &Label, _location: &SourceLocation) -> Result<u128> {
            Ok(0x2_0100)
        }

        fn string_address(&self, value: &str, _location: &SourceLocation) -> Result<u128> {
            Ok(0x1000 + value.len() as u128)
        }
    }

    #[test]
    fn test_arithmetic_wraps() {
        let env = ResolutionEnv;
        assert_eq!(evaluate(&bin(BinaryOp::Add, int(2), int(3)), &env).unwrap(), 5);
        assert_eq!(
            evaluate(&bin(BinaryOp::Sub, int(0), int(1)), &env).unwrap(),
            u128::MAX
        );
        assert_eq!(
            evaluate(&bin(BinaryOp::Mul, int(u128::MAX), int(2)), &env).unwrap(),
            u128::MAX - 1
        );
        assert_eq!(evaluate(&bin(BinaryOp::Rem, int(17), int(5)), &env).unwrap(), 2);
        assert_eq!(evaluate(&bin(BinaryOp::Shl, int(1), int(200)), &env).unwrap(), 0);
        assert_eq!(evaluate(&bin(BinaryOp::Shr, int(256), int(4)), &env).unwrap(), 16);
        assert_eq!(evaluate(&bin(BinaryOp::Xor, int(0xF0), int(0xFF)), &env).unwrap(), 0x0F);
    }

    #[test]
    fn test_division_by_zero() {
        let env = ResolutionEnv;
        for op in [BinaryOp::Div, BinaryOp::Rem] {
            let err = evaluate(&bin(op, int(1), int(0)), &env).unwrap_err();
            assert!(matches!(err, Error::DivisionByZero { .. }));
        }
    }

    #[test]
    fn test_cast_truncates() {
        let builtins = Builtins::new();
        let env = ResolutionEnv;
        let cast = |ty: &TypeRef, value| expr(ExprKind::Cast(Box::new(int(value))), ty);
        assert_eq!(evaluate(&cast(&builtins.n8, 300), &env).unwrap(), 44);
        assert_eq!(evaluate(&cast(&builtins.n16, 0x12345), &env).unwrap(), 0x2345);
        assert_eq!(evaluate(&cast(&builtins.n128, u128::MAX), &env).unwrap(), u128::MAX);
    }

    #[test]
    fn test_logical_not_uses_sentinel() {
        let builtins = Builtins::new();
        let env = ResolutionEnv;
        let not = |value| {
            expr(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(int(value)),
                },
                &builtins.unknown_integer,
            )
        };
        assert_eq!(evaluate(&not(0), &env).unwrap(), 8);
        assert_eq!(evaluate(&not(5), &env).unwrap(), 0);
    }

    #[test]
    fn test_resolution_env_rejects_addresses() {
        let builtins = Builtins::new();
        let string = expr(ExprKind::Str("hi".to_string()), &builtins.string);
        assert!(matches!(
            evaluate(&string, &ResolutionEnv),
            Err(Error::NotConstant { .. })
        ));

        let slot = LabelSlot::new(".top");
        slot.bind(Label::new(".top", false, location()));
        let label = expr(ExprKind::Label(slot), &builtins.n64);
        assert!(matches!(
            evaluate(&label, &ResolutionEnv),
            Err(Error::NotConstant { .. })
        ));
        assert_eq!(evaluate(&label, &FixedAddresses).unwrap(), 0x2_0100);
        assert_eq!(evaluate(&string, &FixedAddresses).unwrap(), 0x1002);
    }

    #[test]
    fn test_unbound_label_is_unresolved() {
        let builtins = Builtins::new();
        let label = expr(ExprKind::Label(LabelSlot::new(".gone")), &builtins.n64);
        assert!(matches!(
            evaluate(&label, &FixedAddresses),
            Err(Error::UnresolvedLabel { .. })
        ));
    }
}
