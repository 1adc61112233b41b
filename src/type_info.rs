//! Runtime type descriptors.
//!
//! A `TypeCtorInfo` describes a type constructor: how its values are laid out
//! in words and which functors it has. A `TypeInfo` applies a constructor to
//! concrete argument types. A `PseudoTypeInfo` is a type that may still
//! mention type variables; it is turned into a `TypeInfo` relative to the
//! argument vector of an enclosing type.
//!
//! Type constructors live for the whole run, exactly like statically
//! emitted tables would, so recursive types simply refer back to their own
//! constructor.

use crate::type_tables;
use crate::types::*;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeCtorRep {
    Enum,
    EnumUserEq,
    Du,
    DuUserEq,
    NoTag,
    NoTagUserEq,
    NoTagGround,
    NoTagGroundUserEq,
    Equiv,
    EquivGround,
    EquivVar,
    Int,
    Char,
    Float,
    String,
    Pred,
    Univ,
    Void,
    CPointer,
    TypeInfo,
    TypeClassInfo,
    Array,
    Tuple,
    Succip,
    Hp,
    Curfr,
    Maxfr,
    Redofr,
    Redoip,
    TrailPtr,
    Ticket,
    Unknown,
}

impl TypeCtorRep {
    /// Types whose equality and ordering are given by user predicates.
    pub fn has_user_eq(self) -> bool {
        matches!(
            self,
            TypeCtorRep::EnumUserEq
                | TypeCtorRep::DuUserEq
                | TypeCtorRep::NoTagUserEq
                | TypeCtorRep::NoTagGroundUserEq
        )
    }

    pub fn is_variable_arity(self) -> bool {
        matches!(self, TypeCtorRep::Pred | TypeCtorRep::Tuple)
    }
}

/// Where a functor's secondary tag lives, if it has one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SectagLocn {
    /// The primary tag alone identifies the functor; the word points at
    /// the arguments.
    None,
    /// A constant: the secondary tag is the body of the word itself.
    Local,
    /// The word points at a block whose first word is the secondary tag.
    Remote,
}

/// Existentially quantified functors carry the typeinfos of their
/// existential type variables in the first argument slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistInfo {
    pub num_typeinfos: usize,
}

#[derive(Clone, Debug)]
pub struct DuFunctorDesc {
    pub name: String,
    pub ordinal: usize,
    pub ptag: u8,
    pub sectag_locn: SectagLocn,
    pub sectag: u64,
    pub arg_types: Vec<PseudoTypeInfo>,
    pub arg_names: Vec<Option<String>>,
    pub exist_info: Option<ExistInfo>,
}

impl DuFunctorDesc {
    #[inline]
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    /// Words taken by the typeinfos of existential type variables.
    #[inline]
    pub fn num_extra_args(&self) -> usize {
        self.exist_info
            .as_ref()
            .map(|info| info.num_typeinfos)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct DuPtagLayout {
    pub sectag_locn: SectagLocn,
    /// Indexed by secondary tag; exactly one entry when `sectag_locn` is
    /// `None`.
    pub alternatives: Vec<Arc<DuFunctorDesc>>,
}

#[derive(Clone, Debug)]
pub enum TypeLayout {
    Enum {
        functor_names: Vec<String>,
    },
    Du {
        ptags: Vec<Option<DuPtagLayout>>,
        /// In declaration order.
        functors: Vec<Arc<DuFunctorDesc>>,
    },
    NoTag {
        functor_name: String,
        arg_type: PseudoTypeInfo,
        arg_name: Option<String>,
    },
    Equiv(PseudoTypeInfo),
}

/// A functor as written in a type declaration, before tags are assigned.
#[derive(Clone, Debug)]
pub struct FunctorSpec {
    pub name: String,
    pub arg_types: Vec<PseudoTypeInfo>,
    pub arg_names: Vec<Option<String>>,
    pub exist_info: Option<ExistInfo>,
}

impl FunctorSpec {
    pub fn new(name: &str, arg_types: Vec<PseudoTypeInfo>) -> Self {
        let arg_names = vec![None; arg_types.len()];

        FunctorSpec {
            name: name.to_owned(),
            arg_types,
            arg_names,
            exist_info: None,
        }
    }

    pub fn with_exist_info(mut self, num_typeinfos: usize) -> Self {
        self.exist_info = Some(ExistInfo { num_typeinfos });
        self
    }
}

pub struct TypeCtorInfo {
    id: u64,
    arity: usize,
    rep: TypeCtorRep,
    module_name: String,
    type_name: String,
    unify_pred: Option<CodeAddr>,
    compare_pred: Option<CodeAddr>,
    layout: OnceLock<TypeLayout>,
}

impl fmt::Debug for TypeCtorInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TypeCtorInfo({}.{}/{}, {:?})",
            self.module_name, self.type_name, self.arity, self.rep
        )
    }
}

impl PartialEq for TypeCtorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeCtorInfo {}

impl Hash for TypeCtorInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl TypeCtorInfo {
    /// Creates and registers a type constructor. Its layout, if it needs
    /// one, is given afterwards with one of the `define_*` methods.
    pub fn new(module_name: &str, type_name: &str, arity: usize, rep: TypeCtorRep) -> Arc<Self> {
        Self::with_user_preds(module_name, type_name, arity, rep, None, None)
    }

    pub fn with_user_preds(
        module_name: &str,
        type_name: &str,
        arity: usize,
        rep: TypeCtorRep,
        unify_pred: Option<CodeAddr>,
        compare_pred: Option<CodeAddr>,
    ) -> Arc<Self> {
        let ctor = Arc::new(TypeCtorInfo {
            id: type_tables::next_type_ctor_id(),
            arity,
            rep,
            module_name: module_name.to_owned(),
            type_name: type_name.to_owned(),
            unify_pred,
            compare_pred,
            layout: OnceLock::new(),
        });

        type_tables::register_type_ctor_info(&ctor);
        ctor
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn rep(&self) -> TypeCtorRep {
        self.rep
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn unify_pred(&self) -> Option<CodeAddr> {
        self.unify_pred
    }

    pub fn compare_pred(&self) -> Option<CodeAddr> {
        self.compare_pred
    }

    pub fn layout(&self) -> Option<&TypeLayout> {
        self.layout.get()
    }

    fn set_layout(&self, layout: TypeLayout) {
        if self.layout.set(layout).is_err() {
            fatal!(
                "layout of type {}.{}/{} defined twice",
                self.module_name,
                self.type_name,
                self.arity
            );
        }
    }

    pub fn define_enum(&self, functor_names: &[&str]) {
        self.set_layout(TypeLayout::Enum {
            functor_names: functor_names.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub fn define_notag(&self, functor_name: &str, arg_type: PseudoTypeInfo) {
        self.set_layout(TypeLayout::NoTag {
            functor_name: functor_name.to_owned(),
            arg_type,
            arg_name: None,
        });
    }

    pub fn define_equiv(&self, equiv_type: PseudoTypeInfo) {
        self.set_layout(TypeLayout::Equiv(equiv_type));
    }

    /// Gives a discriminated union its functors, assigning tags the way the
    /// code generator does: all constants share primary tag 0 with local
    /// secondary tags, each other functor gets a primary tag of its own,
    /// and once the tags run out the remaining functors share the last one
    /// with remote secondary tags.
    pub fn define_du(&self, functors: Vec<FunctorSpec>) {
        let has_constants = functors.iter().any(|f| f.arg_types.is_empty());
        let num_nonconstants = functors.iter().filter(|f| !f.arg_types.is_empty()).count();

        let last_ptag = (NUM_PTAGS - 1) as u8;
        let first_ptag: u8 = if has_constants { 1 } else { 0 };
        let all_fit = num_nonconstants <= NUM_PTAGS - first_ptag as usize;

        let mut next_ptag = first_ptag;
        let mut next_const_sectag = 0;
        let mut next_remote_sectag = 0;

        let mut descs = Vec::with_capacity(functors.len());

        for (ordinal, spec) in functors.into_iter().enumerate() {
            let (ptag, sectag_locn, sectag) = if spec.arg_types.is_empty() {
                next_const_sectag += 1;
                (0, SectagLocn::Local, next_const_sectag - 1)
            } else if all_fit || next_ptag < last_ptag {
                next_ptag += 1;
                (next_ptag - 1, SectagLocn::None, 0)
            } else {
                // the last ptag is shared by every functor that did not get one
                next_remote_sectag += 1;
                (last_ptag, SectagLocn::Remote, next_remote_sectag - 1)
            };

            descs.push(DuFunctorDesc {
                name: spec.name,
                ordinal,
                ptag,
                sectag_locn,
                sectag,
                arg_types: spec.arg_types,
                arg_names: spec.arg_names,
                exist_info: spec.exist_info,
            });
        }

        self.define_du_with_tags(descs);
    }

    /// Gives a discriminated union functors whose tags are already decided.
    pub fn define_du_with_tags(&self, functors: Vec<DuFunctorDesc>) {
        let functors: Vec<Arc<DuFunctorDesc>> = functors.into_iter().map(Arc::new).collect();
        let mut ptags: Vec<Option<DuPtagLayout>> = vec![None; NUM_PTAGS];

        for functor in &functors {
            let slot = &mut ptags[functor.ptag as usize];

            let layout = slot.get_or_insert_with(|| DuPtagLayout {
                sectag_locn: functor.sectag_locn,
                alternatives: vec![],
            });

            if layout.sectag_locn != functor.sectag_locn {
                fatal!(
                    "functors of {}.{} disagree on the secondary tag location of ptag {}",
                    self.module_name,
                    self.type_name,
                    functor.ptag
                );
            }

            let index = functor.sectag as usize;

            if layout.alternatives.len() <= index {
                layout.alternatives.resize(index + 1, functor.clone());
            }

            layout.alternatives[index] = functor.clone();
        }

        self.set_layout(TypeLayout::Du { ptags, functors });
    }

    pub fn ptag_layout(&self, ptag: u8) -> Option<&DuPtagLayout> {
        match self.layout.get() {
            Some(TypeLayout::Du { ptags, .. }) => ptags.get(ptag as usize)?.as_ref(),
            _ => None,
        }
    }

    pub fn du_functors(&self) -> &[Arc<DuFunctorDesc>] {
        match self.layout.get() {
            Some(TypeLayout::Du { functors, .. }) => functors,
            _ => &[],
        }
    }

    pub fn du_functor_by_name(&self, name: &str, arity: usize) -> Option<&Arc<DuFunctorDesc>> {
        self.du_functors()
            .iter()
            .find(|f| f.name == name && f.arity() == arity)
    }

    pub fn num_functors(&self) -> usize {
        match self.layout.get() {
            Some(TypeLayout::Enum { functor_names }) => functor_names.len(),
            Some(TypeLayout::Du { functors, .. }) => functors.len(),
            Some(TypeLayout::NoTag { .. }) => 1,
            _ => 0,
        }
    }

    /// Orders constructors by module name, type name and arity.
    pub fn compare_ctor(&self, other: &TypeCtorInfo) -> Ordering {
        self.module_name
            .cmp(&other.module_name)
            .then_with(|| self.type_name.cmp(&other.type_name))
            .then_with(|| self.arity.cmp(&other.arity))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A type that may still contain type variables.
#[derive(Clone, Debug, PartialEq)]
pub enum PseudoTypeInfo {
    /// Universally quantified type variable `n` (from 1) of the enclosing
    /// type.
    Var(u32),
    /// Existentially quantified type variable `n` (from 1) of the functor
    /// whose argument is being described.
    ExistVar(u32),
    Ctor {
        ctor: Arc<TypeCtorInfo>,
        args: Vec<PseudoTypeInfo>,
    },
}

impl PseudoTypeInfo {
    pub fn ground(ctor: &Arc<TypeCtorInfo>) -> Self {
        PseudoTypeInfo::Ctor {
            ctor: ctor.clone(),
            args: vec![],
        }
    }

    pub fn ctor(ctor: &Arc<TypeCtorInfo>, args: Vec<PseudoTypeInfo>) -> Self {
        PseudoTypeInfo::Ctor {
            ctor: ctor.clone(),
            args,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, PseudoTypeInfo::Var(_) | PseudoTypeInfo::ExistVar(_))
    }

    pub fn is_ground(&self) -> bool {
        match self {
            PseudoTypeInfo::Var(_) | PseudoTypeInfo::ExistVar(_) => false,
            PseudoTypeInfo::Ctor { args, .. } => args.iter().all(PseudoTypeInfo::is_ground),
        }
    }

    pub fn type_ctor(&self) -> Option<&Arc<TypeCtorInfo>> {
        match self {
            PseudoTypeInfo::Ctor { ctor, .. } => Some(ctor),
            _ => None,
        }
    }
}

impl From<&TypeInfo> for PseudoTypeInfo {
    fn from(type_info: &TypeInfo) -> Self {
        PseudoTypeInfo::Ctor {
            ctor: type_info.ctor().clone(),
            args: type_info.args().iter().map(PseudoTypeInfo::from).collect(),
        }
    }
}

#[derive(Debug)]
struct TypeInfoNode {
    ctor: Arc<TypeCtorInfo>,
    args: Vec<TypeInfo>,
}

/// A type constructor applied to argument types.
#[derive(Clone, Debug)]
pub struct TypeInfo(Arc<TypeInfoNode>);

impl TypeInfo {
    pub fn new(ctor: &Arc<TypeCtorInfo>, args: Vec<TypeInfo>) -> Self {
        if !ctor.rep().is_variable_arity() && args.len() != ctor.arity() {
            fatal!(
                "type constructor {}.{}/{} applied to {} arguments",
                ctor.module_name(),
                ctor.type_name(),
                ctor.arity(),
                args.len()
            );
        }

        TypeInfo(Arc::new(TypeInfoNode {
            ctor: ctor.clone(),
            args,
        }))
    }

    pub fn ground(ctor: &Arc<TypeCtorInfo>) -> Self {
        Self::new(ctor, vec![])
    }

    #[inline]
    pub fn ctor(&self) -> &Arc<TypeCtorInfo> {
        &self.0.ctor
    }

    #[inline]
    pub fn args(&self) -> &[TypeInfo] {
        &self.0.args
    }

    /// Type argument `n`, counting from 1.
    #[inline]
    pub fn arg(&self, n: usize) -> &TypeInfo {
        match n.checked_sub(1).and_then(|i| self.0.args.get(i)) {
            Some(arg) => arg,
            None => fatal!("type variable {} not bound in {}", n, self),
        }
    }

    pub fn same_node(&self, other: &TypeInfo) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        compare_type_info(self, other) == Ordering::Equal
    }
}

impl Eq for TypeInfo {}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ctor = self.ctor();

        if ctor.module_name() == "builtin" {
            write!(f, "{}", ctor.type_name())?;
        } else {
            write!(f, "{}.{}", ctor.module_name(), ctor.type_name())?;
        }

        if !self.args().is_empty() {
            f.write_str("(")?;

            for (i, arg) in self.args().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }

                write!(f, "{}", arg)?;
            }

            f.write_str(")")?;
        }

        Ok(())
    }
}

/// Resolves `pseudo` against the bound type arguments `params` (type
/// variable `n` is `params[n - 1]`) and the functor's existential
/// typeinfos `exist`.
pub fn create_type_info_with_exist(
    params: &[TypeInfo],
    exist: &[TypeInfo],
    pseudo: &PseudoTypeInfo,
) -> TypeInfo {
    match pseudo {
        PseudoTypeInfo::Var(n) => match (*n as usize).checked_sub(1).and_then(|i| params.get(i)) {
            Some(ti) => ti.clone(),
            None => fatal!("type variable {} has no binding", n),
        },
        PseudoTypeInfo::ExistVar(n) => {
            match (*n as usize).checked_sub(1).and_then(|i| exist.get(i)) {
                Some(ti) => ti.clone(),
                None => fatal!("existential type variable {} has no binding", n),
            }
        }
        PseudoTypeInfo::Ctor { ctor, args } => {
            let args = args
                .iter()
                .map(|arg| create_type_info_with_exist(params, exist, arg))
                .collect();

            TypeInfo::new(ctor, args)
        }
    }
}

pub fn create_type_info(parent: &TypeInfo, pseudo: &PseudoTypeInfo) -> TypeInfo {
    create_type_info_with_exist(parent.args(), &[], pseudo)
}

/// Expands equivalence types at the top of `type_info` until a real
/// constructor is reached.
pub fn collapse_equivalences(type_info: &TypeInfo) -> TypeInfo {
    let mut type_info = type_info.clone();

    loop {
        let expanded = match (type_info.ctor().rep(), type_info.ctor().layout()) {
            (
                TypeCtorRep::Equiv | TypeCtorRep::EquivGround | TypeCtorRep::EquivVar,
                Some(TypeLayout::Equiv(equiv)),
            ) => create_type_info(&type_info, equiv),
            _ => return type_info,
        };

        type_info = expanded;
    }
}

/// A total order on types, used by `compare` on `type_info` and `univ`
/// values.
pub fn compare_type_info(a: &TypeInfo, b: &TypeInfo) -> Ordering {
    if a.same_node(b) {
        return Ordering::Equal;
    }

    let a = collapse_equivalences(a);
    let b = collapse_equivalences(b);

    let ordering = a.ctor().compare_ctor(b.ctor());

    if ordering != Ordering::Equal {
        return ordering;
    }

    let ordering = a.args().len().cmp(&b.args().len());

    if ordering != Ordering::Equal {
        return ordering;
    }

    for (x, y) in a.args().iter().zip(b.args().iter()) {
        let ordering = compare_type_info(x, y);

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataRepresentation {
    Enum,
    ComplicatedConst,
    Complicated,
    Simple,
    NoTag,
    Equiv,
    EquivVar,
    Int,
    Char,
    Float,
    String,
    Pred,
    Univ,
    Void,
    Array,
    TypeInfo,
    CPointer,
    Tuple,
    Unknown,
}

/// Says which case of the data representation `data` is, given its type
/// constructor. For discriminated unions the primary tag of the word picks
/// the case.
pub fn categorize_data(ctor: &TypeCtorInfo, data: Word) -> DataRepresentation {
    match ctor.rep() {
        TypeCtorRep::Enum | TypeCtorRep::EnumUserEq => DataRepresentation::Enum,
        TypeCtorRep::Du | TypeCtorRep::DuUserEq => match ctor.ptag_layout(tag(data)) {
            Some(layout) => match layout.sectag_locn {
                SectagLocn::None => DataRepresentation::Simple,
                SectagLocn::Local => DataRepresentation::ComplicatedConst,
                SectagLocn::Remote => DataRepresentation::Complicated,
            },
            None => DataRepresentation::Unknown,
        },
        TypeCtorRep::NoTag
        | TypeCtorRep::NoTagUserEq
        | TypeCtorRep::NoTagGround
        | TypeCtorRep::NoTagGroundUserEq => DataRepresentation::NoTag,
        TypeCtorRep::Equiv | TypeCtorRep::EquivGround => DataRepresentation::Equiv,
        TypeCtorRep::EquivVar => DataRepresentation::EquivVar,
        TypeCtorRep::Int => DataRepresentation::Int,
        TypeCtorRep::Char => DataRepresentation::Char,
        TypeCtorRep::Float => DataRepresentation::Float,
        TypeCtorRep::String => DataRepresentation::String,
        TypeCtorRep::Pred => DataRepresentation::Pred,
        TypeCtorRep::Univ => DataRepresentation::Univ,
        TypeCtorRep::Void => DataRepresentation::Void,
        TypeCtorRep::Array => DataRepresentation::Array,
        TypeCtorRep::TypeInfo => DataRepresentation::TypeInfo,
        TypeCtorRep::CPointer => DataRepresentation::CPointer,
        TypeCtorRep::Tuple => DataRepresentation::Tuple,
        TypeCtorRep::TypeClassInfo
        | TypeCtorRep::Succip
        | TypeCtorRep::Hp
        | TypeCtorRep::Curfr
        | TypeCtorRep::Maxfr
        | TypeCtorRep::Redofr
        | TypeCtorRep::Redoip
        | TypeCtorRep::TrailPtr
        | TypeCtorRep::Ticket
        | TypeCtorRep::Unknown => DataRepresentation::Unknown,
    }
}
