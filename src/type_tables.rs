//! The process-wide registry of type constructors.
//!
//! Every `TypeCtorInfo` is registered when it is created. Typeinfo blocks in
//! memory refer to their constructor by id, so the id index is what lets a
//! typeinfo be read back out of a heap.

use crate::type_info::*;

use fxhash::FxHashMap;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type TypeCtorKey = (String, String, usize);

#[derive(Default)]
struct TypeTable {
    by_name: IndexMap<TypeCtorKey, Arc<TypeCtorInfo>>,
    by_id: FxHashMap<u64, Arc<TypeCtorInfo>>,
}

lazy_static! {
    static ref TYPE_TABLE: RwLock<TypeTable> = RwLock::new(TypeTable::default());
}

// id 0 never names a constructor, so a zeroed typeinfo word is detectably bad.
static NEXT_TYPE_CTOR_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_type_ctor_id() -> u64 {
    NEXT_TYPE_CTOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Makes `ctor` reachable by id and by name. A later constructor with the
/// same module, name and arity shadows the earlier one in name lookups; both
/// stay reachable by id.
pub fn register_type_ctor_info(ctor: &Arc<TypeCtorInfo>) {
    let key = (
        ctor.module_name().to_owned(),
        ctor.type_name().to_owned(),
        ctor.arity(),
    );

    let mut table = TYPE_TABLE.write();

    table.by_id.insert(ctor.id(), ctor.clone());

    if let Some(old) = table.by_name.insert(key, ctor.clone()) {
        log::debug!(
            "type constructor {}.{}/{} registered again (ids {} and {})",
            old.module_name(),
            old.type_name(),
            old.arity(),
            old.id(),
            ctor.id()
        );
    }
}

pub fn lookup_type_ctor_info(module: &str, name: &str, arity: usize) -> Option<Arc<TypeCtorInfo>> {
    TYPE_TABLE
        .read()
        .by_name
        .get(&(module.to_owned(), name.to_owned(), arity))
        .cloned()
}

pub fn lookup_type_ctor_info_by_id(id: u64) -> Option<Arc<TypeCtorInfo>> {
    TYPE_TABLE.read().by_id.get(&id).cloned()
}

/// All constructors reachable by name, in registration order.
pub fn registered_type_ctors() -> Vec<Arc<TypeCtorInfo>> {
    TYPE_TABLE.read().by_name.values().cloned().collect()
}

pub mod builtin {
    use super::*;

    use lazy_static::lazy_static;

    struct Builtins {
        int: Arc<TypeCtorInfo>,
        char: Arc<TypeCtorInfo>,
        float: Arc<TypeCtorInfo>,
        string: Arc<TypeCtorInfo>,
        void: Arc<TypeCtorInfo>,
        c_pointer: Arc<TypeCtorInfo>,
        univ: Arc<TypeCtorInfo>,
        type_info: Arc<TypeCtorInfo>,
        typeclass_info: Arc<TypeCtorInfo>,
        pred: Arc<TypeCtorInfo>,
        func: Arc<TypeCtorInfo>,
        tuple: Arc<TypeCtorInfo>,
        array: Arc<TypeCtorInfo>,
        list: Arc<TypeCtorInfo>,
    }

    fn make_list() -> Arc<TypeCtorInfo> {
        let list = TypeCtorInfo::new("list", "list", 1, TypeCtorRep::Du);

        let tail = PseudoTypeInfo::ctor(&list, vec![PseudoTypeInfo::Var(1)]);

        list.define_du(vec![
            FunctorSpec::new("[]", vec![]),
            FunctorSpec::new("[|]", vec![PseudoTypeInfo::Var(1), tail]),
        ]);

        list
    }

    lazy_static! {
        static ref BUILTINS: Builtins = Builtins {
            int: TypeCtorInfo::new("builtin", "int", 0, TypeCtorRep::Int),
            char: TypeCtorInfo::new("builtin", "character", 0, TypeCtorRep::Char),
            float: TypeCtorInfo::new("builtin", "float", 0, TypeCtorRep::Float),
            string: TypeCtorInfo::new("builtin", "string", 0, TypeCtorRep::String),
            void: TypeCtorInfo::new("builtin", "void", 0, TypeCtorRep::Void),
            c_pointer: TypeCtorInfo::new("builtin", "c_pointer", 0, TypeCtorRep::CPointer),
            univ: TypeCtorInfo::new("univ", "univ", 0, TypeCtorRep::Univ),
            type_info: TypeCtorInfo::new("private_builtin", "type_info", 0, TypeCtorRep::TypeInfo),
            typeclass_info: TypeCtorInfo::new(
                "private_builtin",
                "typeclass_info",
                0,
                TypeCtorRep::TypeClassInfo
            ),
            pred: TypeCtorInfo::new("builtin", "pred", 0, TypeCtorRep::Pred),
            func: TypeCtorInfo::new("builtin", "func", 0, TypeCtorRep::Pred),
            tuple: TypeCtorInfo::new("builtin", "{}", 0, TypeCtorRep::Tuple),
            array: TypeCtorInfo::new("array", "array", 1, TypeCtorRep::Array),
            list: make_list(),
        };
    }

    pub fn int() -> Arc<TypeCtorInfo> {
        BUILTINS.int.clone()
    }

    pub fn char() -> Arc<TypeCtorInfo> {
        BUILTINS.char.clone()
    }

    pub fn float() -> Arc<TypeCtorInfo> {
        BUILTINS.float.clone()
    }

    pub fn string() -> Arc<TypeCtorInfo> {
        BUILTINS.string.clone()
    }

    pub fn void() -> Arc<TypeCtorInfo> {
        BUILTINS.void.clone()
    }

    pub fn c_pointer() -> Arc<TypeCtorInfo> {
        BUILTINS.c_pointer.clone()
    }

    pub fn univ() -> Arc<TypeCtorInfo> {
        BUILTINS.univ.clone()
    }

    pub fn type_info() -> Arc<TypeCtorInfo> {
        BUILTINS.type_info.clone()
    }

    pub fn typeclass_info() -> Arc<TypeCtorInfo> {
        BUILTINS.typeclass_info.clone()
    }

    pub fn pred() -> Arc<TypeCtorInfo> {
        BUILTINS.pred.clone()
    }

    pub fn func() -> Arc<TypeCtorInfo> {
        BUILTINS.func.clone()
    }

    pub fn tuple() -> Arc<TypeCtorInfo> {
        BUILTINS.tuple.clone()
    }

    pub fn array() -> Arc<TypeCtorInfo> {
        BUILTINS.array.clone()
    }

    pub fn list() -> Arc<TypeCtorInfo> {
        BUILTINS.list.clone()
    }

    /// Forces the builtin constructors into the registry.
    pub fn init() {
        lazy_static::initialize(&BUILTINS);
    }

    pub fn int_type() -> TypeInfo {
        TypeInfo::ground(&BUILTINS.int)
    }

    pub fn char_type() -> TypeInfo {
        TypeInfo::ground(&BUILTINS.char)
    }

    pub fn float_type() -> TypeInfo {
        TypeInfo::ground(&BUILTINS.float)
    }

    pub fn string_type() -> TypeInfo {
        TypeInfo::ground(&BUILTINS.string)
    }

    pub fn univ_type() -> TypeInfo {
        TypeInfo::ground(&BUILTINS.univ)
    }

    pub fn list_type(elem: TypeInfo) -> TypeInfo {
        TypeInfo::new(&BUILTINS.list, vec![elem])
    }

    pub fn array_type(elem: TypeInfo) -> TypeInfo {
        TypeInfo::new(&BUILTINS.array, vec![elem])
    }

    pub fn tuple_type(elems: Vec<TypeInfo>) -> TypeInfo {
        TypeInfo::new(&BUILTINS.tuple, elems)
    }

    /// The type of a predicate closure whose arguments have the given types.
    pub fn pred_type(args: Vec<TypeInfo>) -> TypeInfo {
        TypeInfo::new(&BUILTINS.pred, args)
    }
}
