//! Numeric coercion of binary operands and explicit `to` casts.

use crate::middle::{
    error::CompileErrorKind,
    lir::{self, CastKind, builder::FunctionBuilder},
    ty::{Type, TypeRegistry, TypedValue},
};

/// Widens the smaller of two operands to the other's type when both are
/// integers of the same signedness, or both are floats. Anything else is
/// returned untouched and the caller reports the mismatch.
pub fn coerce(
    builder: &mut FunctionBuilder,
    registry: &TypeRegistry,
    lhs: TypedValue,
    rhs: TypedValue,
) -> (TypedValue, TypedValue) {
    if lhs.ty == rhs.ty {
        return (lhs, rhs);
    }

    let (lhs_size, rhs_size) = (registry.size(lhs.ty), registry.size(rhs.ty));

    if registry.is_integer(lhs.ty) && registry.is_integer(rhs.ty) {
        if registry.is_signed(lhs.ty) != registry.is_signed(rhs.ty) {
            return (lhs, rhs);
        }

        return match lhs_size.cmp(&rhs_size) {
            std::cmp::Ordering::Less => (cast_to_int(builder, registry, lhs, rhs.ty), rhs),
            std::cmp::Ordering::Greater => (lhs, cast_to_int(builder, registry, rhs, lhs.ty)),
            std::cmp::Ordering::Equal => (lhs, rhs),
        };
    }

    if registry.is_float(lhs.ty) && registry.is_float(rhs.ty) {
        return match lhs_size.cmp(&rhs_size) {
            std::cmp::Ordering::Less => (cast_to_float(builder, registry, lhs, rhs.ty), rhs),
            std::cmp::Ordering::Greater => (lhs, cast_to_float(builder, registry, rhs, lhs.ty)),
            std::cmp::Ordering::Equal => (lhs, rhs),
        };
    }

    (lhs, rhs)
}

/// Converts `value` to `destination` following the `to` operator's rules
pub fn cast(
    builder: &mut FunctionBuilder,
    registry: &TypeRegistry,
    value: TypedValue,
    destination: Type,
) -> Result<TypedValue, CompileErrorKind> {
    let unsupported = || CompileErrorKind::UnsupportedCast {
        from: registry.name(value.ty),
        to: registry.name(destination),
    };

    if registry.is_integer(destination) {
        if registry.is_float(value.ty) {
            let kind = if registry.is_signed(destination) {
                CastKind::FloatToSigned
            } else {
                CastKind::FloatToUnsigned
            };
            let result = builder.cast(kind, value.value, registry.lir_type(destination));

            return Ok(TypedValue::new(destination, result));
        }

        if registry.is_integer(value.ty) {
            return Ok(cast_to_int(builder, registry, value, destination));
        }

        return Err(unsupported());
    }

    if registry.is_float(destination) {
        if registry.is_integer(value.ty) {
            let kind = if registry.is_signed(value.ty) {
                CastKind::SignedToFloat
            } else {
                CastKind::UnsignedToFloat
            };
            let result = builder.cast(kind, value.value, registry.lir_type(destination));

            return Ok(TypedValue::new(destination, result));
        }

        if registry.is_float(value.ty) {
            return Ok(cast_to_float(builder, registry, value, destination));
        }
    }

    Err(unsupported())
}

/// Integer to integer conversion. The destination's signedness picks the
/// extension, except that widening always zero-extends: a negative `Int32`
/// cast to `Int64` keeps its 32 bit pattern.
pub fn cast_to_int(
    builder: &mut FunctionBuilder,
    registry: &TypeRegistry,
    value: TypedValue,
    destination: Type,
) -> TypedValue {
    let widening = registry.size(destination) > registry.size(value.ty);
    let signed = registry.is_signed(destination) && !widening;

    let lir::Type::Integer(width) = registry.lir_type(destination) else {
        return TypedValue::new(destination, value.value);
    };

    TypedValue::new(destination, builder.int_cast(value.value, width, signed))
}

fn cast_to_float(
    builder: &mut FunctionBuilder,
    registry: &TypeRegistry,
    value: TypedValue,
    destination: Type,
) -> TypedValue {
    let lir::Type::Float(width) = registry.lir_type(destination) else {
        return TypedValue::new(destination, value.value);
    };

    TypedValue::new(destination, builder.float_cast(value.value, width))
}
