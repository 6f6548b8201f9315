//! The type registry. Every primitive type is created once when the registry
//! is built and handed out as a [`Type`] handle afterwards, so two types are
//! the same exactly when their handles are equal.

use std::str::FromStr;

use hashbrown::HashMap;
use strum::IntoEnumIterator;

use crate::{
    index::{IndexVec, simple_index},
    middle::{
        lir,
        primitive::{PrimitiveKind, TypeFlags},
    },
};

simple_index! {
    /// Handle to an entry of the [`TypeRegistry`]
    pub struct Type;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub name: &'static str,
    pub kind: PrimitiveKind,
    pub flags: TypeFlags,
    /// Size in bytes
    pub size: usize,
    pub lir_type: lir::Type,
}

#[derive(Debug)]
pub struct TypeRegistry {
    types: IndexVec<Type, TypeInfo>,
    by_kind: HashMap<PrimitiveKind, Type>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut types = IndexVec::new();
        let mut by_kind = HashMap::new();

        for kind in PrimitiveKind::iter() {
            let ty = types.push(TypeInfo {
                name: kind.into(),
                kind,
                flags: kind.flags(),
                size: kind.size(),
                lir_type: kind.lir_type(),
            });

            by_kind.insert(kind, ty);
        }

        Self { types, by_kind }
    }

    /// Resolves a type name. No name at all means `Void`.
    pub fn lookup(&self, name: Option<&str>) -> Option<Type> {
        let Some(name) = name else {
            return Some(self.void());
        };

        PrimitiveKind::from_str(name)
            .ok()
            .and_then(|kind| self.by_kind.get(&kind).copied())
    }

    pub fn primitive(&self, kind: PrimitiveKind) -> Type {
        self.by_kind[&kind]
    }

    pub fn void(&self) -> Type {
        self.primitive(PrimitiveKind::Void)
    }

    pub fn bool(&self) -> Type {
        self.primitive(PrimitiveKind::Bool)
    }

    pub fn int32(&self) -> Type {
        self.primitive(PrimitiveKind::Int32)
    }

    pub fn float64(&self) -> Type {
        self.primitive(PrimitiveKind::Float64)
    }

    pub fn info(&self, ty: Type) -> &TypeInfo {
        &self.types[ty]
    }

    pub fn name(&self, ty: Type) -> &'static str {
        self.info(ty).name
    }

    pub fn is_integer(&self, ty: Type) -> bool {
        self.info(ty).flags.is_integer
    }

    pub fn is_float(&self, ty: Type) -> bool {
        self.info(ty).flags.is_float
    }

    pub fn is_signed(&self, ty: Type) -> bool {
        self.info(ty).flags.is_signed
    }

    pub fn size(&self, ty: Type) -> usize {
        self.info(ty).size
    }

    pub fn lir_type(&self, ty: Type) -> lir::Type {
        self.info(ty).lir_type
    }

    pub fn iter(&self) -> impl Iterator<Item = (Type, &TypeInfo)> {
        self.types.enumerate()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A lowered value together with its Pastel type. Only lives as long as the
/// lowering step that consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue {
    pub ty: Type,
    pub value: lir::Operand,
}

impl TypedValue {
    pub fn new(ty: Type, value: impl Into<lir::Operand>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    /// The result of statements and void calls
    pub fn void(registry: &TypeRegistry) -> Self {
        Self {
            ty: registry.void(),
            value: lir::Operand::VOID,
        }
    }
}
