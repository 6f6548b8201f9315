//! Names visible inside the function being compiled. There is a single flat
//! scope per function: a declaration anywhere in the body is visible for the
//! rest of it, and the table is cleared before the next function.

use std::collections::BTreeMap;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{lir::RegisterId, ty::Type},
};

/// Where the value of a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// The incoming argument register, read without a load
    Parameter(RegisterId),
    /// Pointer to a stack slot allocated at function entry
    StackSlot(RegisterId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableFlags {
    pub is_parameter: bool,
    pub is_mutable: bool,
    pub is_initialized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: InternedSymbol,
    pub ty: Type,
    pub storage: Storage,
    pub flags: VariableFlags,
}

impl Variable {
    /// `var` bindings can always be assigned, `let` bindings only once
    pub fn can_assign(&self) -> bool {
        self.flags.is_mutable || !self.flags.is_initialized
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    variables: BTreeMap<InternedSymbol, Variable>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every binding of the previous function
    pub fn clear(&mut self) {
        self.variables.clear();
    }

    pub fn bind_parameter(&mut self, name: InternedSymbol, ty: Type, value: RegisterId) {
        self.variables.insert(
            name,
            Variable {
                name,
                ty,
                storage: Storage::Parameter(value),
                flags: VariableFlags {
                    is_parameter: true,
                    is_mutable: false,
                    is_initialized: true,
                },
            },
        );
    }

    /// Binds a stack variable. A later declaration of the same name replaces
    /// the earlier one.
    pub fn bind_local(&mut self, name: InternedSymbol, ty: Type, slot: RegisterId, mutable: bool) {
        self.variables.insert(
            name,
            Variable {
                name,
                ty,
                storage: Storage::StackSlot(slot),
                flags: VariableFlags {
                    is_parameter: false,
                    is_mutable: mutable,
                    is_initialized: false,
                },
            },
        );
    }

    pub fn lookup(&self, name: InternedSymbol) -> Option<&Variable> {
        self.variables.get(&name)
    }

    pub fn lookup_mut(&mut self, name: InternedSymbol) -> Option<&mut Variable> {
        self.variables.get_mut(&name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::Index, middle::ty::TypeRegistry};

    #[test]
    fn parameters_are_read_only_and_initialized() {
        let registry = TypeRegistry::new();
        let mut table = SymbolTable::new();
        let n = InternedSymbol::new("n");

        table.bind_parameter(n, registry.int32(), RegisterId::new(0));

        let variable = table.lookup(n).unwrap();
        assert_eq!(variable.storage, Storage::Parameter(RegisterId::new(0)));
        assert!(variable.flags.is_parameter && variable.flags.is_initialized);
        assert!(!variable.can_assign());
    }

    #[test]
    fn let_bindings_allow_a_single_assignment() {
        let registry = TypeRegistry::new();
        let mut table = SymbolTable::new();
        let x = InternedSymbol::new("x");
        let y = InternedSymbol::new("y");

        table.bind_local(x, registry.int32(), RegisterId::new(1), false);
        table.bind_local(y, registry.bool(), RegisterId::new(2), true);

        assert!(table.lookup(x).unwrap().can_assign());
        table.lookup_mut(x).unwrap().flags.is_initialized = true;
        assert!(!table.lookup(x).unwrap().can_assign());

        table.lookup_mut(y).unwrap().flags.is_initialized = true;
        assert!(table.lookup(y).unwrap().can_assign());
    }

    #[test]
    fn clearing_forgets_every_binding() {
        let registry = TypeRegistry::new();
        let mut table = SymbolTable::new();
        let a = InternedSymbol::new("a");

        table.bind_local(a, registry.int32(), RegisterId::new(0), true);
        assert_eq!(table.len(), 1);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.lookup(a), None);
    }
}
