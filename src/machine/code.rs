//! Procedure bodies and the modules that define them.
//!
//! A body is a native function that runs one basic block of abstract machine
//! code against the engine and returns the address to continue at. Bodies
//! are process-wide, like compiled code: any engine can jump to any loaded
//! label.

use crate::label;
use crate::layout::{LabelLayout, ProcLayout};
use crate::machine::Engine;
use crate::types::*;

use fxhash::{FxHashMap, FxHashSet};
use lazy_static::lazy_static;
use parking_lot::RwLock;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type CodeBody = Arc<dyn Fn(&mut Engine) -> CodeAddr + Send + Sync>;

/// Addresses below this are reserved for the engine's own labels.
pub const FIRST_USER_CODE_ADDR: u64 = 0x1000;

static NEXT_CODE_ADDR: AtomicU64 = AtomicU64::new(FIRST_USER_CODE_ADDR);

lazy_static! {
    static ref CODE_REGISTRY: RwLock<FxHashMap<CodeAddr, CodeBody>> =
        RwLock::new(FxHashMap::default());
}

fn allocate_code_addr() -> CodeAddr {
    CodeAddr(NEXT_CODE_ADDR.fetch_add(WORD_SIZE, Ordering::Relaxed))
}

pub(crate) fn lookup_code(addr: CodeAddr) -> Option<CodeBody> {
    CODE_REGISTRY.read().get(&addr).cloned()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LabelKind {
    Entry,
    Internal,
}

struct DeclaredLabel {
    name: String,
    kind: LabelKind,
}

struct Definition {
    addr: CodeAddr,
    body: CodeBody,
    entry_layout: Option<Arc<ProcLayout>>,
    internal_layout: Option<Arc<LabelLayout>>,
}

/// Labels are declared before they are defined so that bodies can refer to
/// each other; `load` checks that every declared label got a body and then
/// makes the module's code and labels visible to every engine.
pub struct CodeModule {
    name: String,
    declared: FxHashMap<CodeAddr, DeclaredLabel>,
    order: Vec<CodeAddr>,
    definitions: Vec<Definition>,
    defined: FxHashSet<CodeAddr>,
}

impl fmt::Debug for CodeModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodeModule")
            .field("name", &self.name)
            .field("labels", &self.order.len())
            .field("defined", &self.defined.len())
            .finish()
    }
}

impl CodeModule {
    pub fn new(name: &str) -> Self {
        CodeModule {
            name: name.to_owned(),
            declared: FxHashMap::default(),
            order: vec![],
            definitions: vec![],
            defined: FxHashSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn declare(&mut self, name: &str, kind: LabelKind) -> CodeAddr {
        let addr = allocate_code_addr();

        self.declared.insert(
            addr,
            DeclaredLabel {
                name: name.to_owned(),
                kind,
            },
        );

        self.order.push(addr);
        addr
    }

    /// Declares a procedure entry point.
    pub fn entry_label(&mut self, name: &str) -> CodeAddr {
        self.declare(name, LabelKind::Entry)
    }

    /// Declares a label inside a procedure, such as a return point or a
    /// resumption point for backtracking.
    pub fn internal_label(&mut self, name: &str) -> CodeAddr {
        self.declare(name, LabelKind::Internal)
    }

    fn check_declared(&self, addr: CodeAddr, kind: LabelKind) {
        match self.declared.get(&addr) {
            Some(label) if label.kind == kind => {}
            Some(label) => fatal!(
                "label {} in module {} defined with the wrong kind",
                label.name,
                self.name
            ),
            None => fatal!(
                "label {} defined in module {} without being declared",
                addr,
                self.name
            ),
        }

        if self.defined.contains(&addr) {
            fatal!("label {} defined twice in module {}", addr, self.name);
        }
    }

    pub fn define_entry<F>(&mut self, addr: CodeAddr, layout: Option<Arc<ProcLayout>>, body: F)
    where
        F: Fn(&mut Engine) -> CodeAddr + Send + Sync + 'static,
    {
        self.check_declared(addr, LabelKind::Entry);
        self.defined.insert(addr);

        self.definitions.push(Definition {
            addr,
            body: Arc::new(body),
            entry_layout: layout,
            internal_layout: None,
        });
    }

    pub fn define_internal<F>(&mut self, addr: CodeAddr, layout: Option<Arc<LabelLayout>>, body: F)
    where
        F: Fn(&mut Engine) -> CodeAddr + Send + Sync + 'static,
    {
        self.check_declared(addr, LabelKind::Internal);
        self.defined.insert(addr);

        self.definitions.push(Definition {
            addr,
            body: Arc::new(body),
            entry_layout: None,
            internal_layout: layout,
        });
    }

    /// The name a declared label was given, qualified by the module name.
    pub fn label_name(&self, addr: CodeAddr) -> Option<String> {
        self.declared
            .get(&addr)
            .map(|label| format!("{}__{}", self.name, label.name))
    }

    /// Publishes the module's bodies and labels.
    pub fn load(mut self) {
        for addr in &self.order {
            if !self.defined.contains(addr) {
                let name = self
                    .declared
                    .get(addr)
                    .map(|label| label.name.as_str())
                    .unwrap_or("?");

                fatal!(
                    "label {} declared in module {} but never defined",
                    name,
                    self.name
                );
            }
        }

        calldebug!("loading module {} ({} labels)", self.name, self.order.len());

        let mut registry = CODE_REGISTRY.write();

        let definitions = std::mem::take(&mut self.definitions);

        for definition in definitions {
            let name = self
                .label_name(definition.addr)
                .unwrap_or_else(|| definition.addr.to_string());

            match self.declared.get(&definition.addr).map(|label| label.kind) {
                Some(LabelKind::Entry) => {
                    label::insert_entry_label(&name, definition.addr, definition.entry_layout);
                }
                _ => {
                    label::insert_internal_label(
                        &name,
                        definition.addr,
                        definition.internal_layout,
                    );
                }
            }

            registry.insert(definition.addr, definition.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_labels_are_distinct_and_aligned() {
        let mut module = CodeModule::new("code_test");
        let a = module.entry_label("a");
        let b = module.internal_label("a_i1");

        assert_ne!(a, b);
        assert_eq!(a.0 % WORD_SIZE, 0);
        assert!(a.0 >= FIRST_USER_CODE_ADDR);
        assert_eq!(module.label_name(b).as_deref(), Some("code_test__a_i1"));
    }

    #[test]
    fn loading_publishes_bodies_and_labels() {
        let mut module = CodeModule::new("code_load");
        let p = module.entry_label("p");
        let p_i1 = module.internal_label("p_i1");

        module.define_entry(p, None, move |_| p_i1);
        module.define_internal(p_i1, None, |engine| engine.regs.succip);
        module.load();

        assert!(lookup_code(p).is_some());
        assert!(lookup_code(p_i1).is_some());
        assert_eq!(label::label_name(p), "code_load__p");
        assert!(label::lookup_internal_by_addr(p_i1).is_some());
    }

    #[test]
    #[should_panic(expected = "never defined")]
    fn undefined_labels_are_fatal() {
        let mut module = CodeModule::new("code_missing");
        module.entry_label("q");
        module.load();
    }
}
