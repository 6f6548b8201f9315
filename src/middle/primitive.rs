use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::middle::lir;

/// Every type a Pastel program can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum PrimitiveKind {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

/// Capabilities of a type. Bool is neither integer nor float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeFlags {
    pub is_integer: bool,
    pub is_float: bool,
    pub is_signed: bool,
    pub is_pointer: bool,
}

impl TypeFlags {
    const NONE: TypeFlags = TypeFlags {
        is_integer: false,
        is_float: false,
        is_signed: false,
        is_pointer: false,
    };

    const SIGNED_INTEGER: TypeFlags = TypeFlags {
        is_integer: true,
        is_signed: true,
        ..TypeFlags::NONE
    };

    const UNSIGNED_INTEGER: TypeFlags = TypeFlags {
        is_integer: true,
        ..TypeFlags::NONE
    };

    const FLOAT: TypeFlags = TypeFlags {
        is_float: true,
        ..TypeFlags::NONE
    };
}

impl PrimitiveKind {
    pub fn flags(&self) -> TypeFlags {
        match self {
            PrimitiveKind::Void | PrimitiveKind::Bool => TypeFlags::NONE,
            PrimitiveKind::Int8
            | PrimitiveKind::Int16
            | PrimitiveKind::Int32
            | PrimitiveKind::Int64 => TypeFlags::SIGNED_INTEGER,
            PrimitiveKind::UInt8
            | PrimitiveKind::UInt16
            | PrimitiveKind::UInt32
            | PrimitiveKind::UInt64 => TypeFlags::UNSIGNED_INTEGER,
            PrimitiveKind::Float32 | PrimitiveKind::Float64 => TypeFlags::FLOAT,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Bool | PrimitiveKind::Int8 | PrimitiveKind::UInt8 => 1,
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Float32 => 4,
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Float64 => 8,
        }
    }

    pub fn lir_type(&self) -> lir::Type {
        match self {
            PrimitiveKind::Void => lir::Type::Void,
            PrimitiveKind::Bool => lir::Type::BOOL,
            PrimitiveKind::Int8 | PrimitiveKind::UInt8 => {
                lir::Type::Integer(lir::IntegerWidth::I8)
            }
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => {
                lir::Type::Integer(lir::IntegerWidth::I16)
            }
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 => {
                lir::Type::Integer(lir::IntegerWidth::I32)
            }
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 => {
                lir::Type::Integer(lir::IntegerWidth::I64)
            }
            PrimitiveKind::Float32 => lir::Type::Float(lir::FloatWidth::F32),
            PrimitiveKind::Float64 => lir::Type::Float(lir::FloatWidth::F64),
        }
    }
}
