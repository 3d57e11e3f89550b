//! Lexical scope tree: block/function arenas, symbol resolution, and static-link
//! frame addressing.
//!
//! Blocks and functions live in flat arenas and reference each other (and their
//! parent) by index, rather than through `Rc`/`RefCell`, per the arena-over-shared-
//! ownership design decision.

use std::collections::HashMap;

use crate::emitter::{emit, registers, Emitter, LabelCounter};
use crate::errors::{CompileError, ErrorKind, Result};
use crate::types::SemanticType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub by_reference: bool,
    pub ty: SemanticType,
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub return_type: Option<SemanticType>,
    /// Nesting level of the function's *body*: 0 for built-ins, 1 for a top-level
    /// callable, deeper for nested ones.
    pub level: usize,
    pub label: String,
    pub is_builtin: bool,
    pub body: Option<BlockId>,
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Constant { ty: SemanticType, label: String },
    Variable { ty: SemanticType, offset: i64, is_reference: bool },
    Function(FuncId),
}

#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Constant { ty: &'a SemanticType, label: &'a str },
    Variable { ty: &'a SemanticType, offset: i64, is_reference: bool },
    Function(FuncId),
}

#[derive(Debug)]
pub struct BlockData {
    pub function: Option<FuncId>,
    pub parent: Option<BlockId>,
    pub level: usize,
    pub type_aliases: HashMap<String, SemanticType>,
    pub symbols: HashMap<String, Symbol>,
    /// Declaration order of local variables, for deterministic init/finalize.
    pub locals: Vec<String>,
    pub label: String,
    pub code: Option<Emitter>,
}

impl BlockData {
    fn declare(&mut self, name: &str, symbol: Symbol, kind: ErrorKind) -> Result<()> {
        if self.symbols.contains_key(name) || self.type_aliases.contains_key(name) {
            return Err(CompileError::new(
                kind,
                format!("`{name}` is already declared in this scope"),
            ));
        }
        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }
}

/// Owns every block and function ever constructed during a compilation, plus the
/// global constants stream and the list of blocks in construction order (the order
/// their emitted code must appear in the final assembly).
pub struct Scope {
    pub blocks: Vec<BlockData>,
    pub functions: Vec<FunctionData>,
    pub block_order: Vec<BlockId>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            blocks: Vec::new(),
            functions: Vec::new(),
            block_order: Vec::new(),
        }
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0]
    }

    pub fn function(&self, id: FuncId) -> &FunctionData {
        &self.functions[id.0]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionData {
        &mut self.functions[id.0]
    }

    /// Reserves a new block slot with the given parent/owner, returning its id.
    /// Reserving before populating lets recursively-constructed children reference
    /// a stable parent id even though the parent's own fields are still being filled in.
    pub fn reserve_block(&mut self, parent: Option<BlockId>, function: Option<FuncId>, level: usize) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockData {
            function,
            parent,
            level,
            type_aliases: HashMap::new(),
            symbols: HashMap::new(),
            locals: Vec::new(),
            label: String::new(),
            code: None,
        });
        id
    }

    pub fn reserve_function(&mut self, data: FunctionData) -> FuncId {
        let id = FuncId(self.functions.len());
        self.functions.push(data);
        id
    }

    pub fn declare_type_alias(&mut self, block: BlockId, name: &str, ty: SemanticType) -> Result<()> {
        let blk = self.block_mut(block);
        if blk.type_aliases.contains_key(name) || blk.symbols.contains_key(name) {
            return Err(CompileError::new(
                ErrorKind::DuplicateMember,
                format!("`{name}` is already declared in this scope"),
            ));
        }
        blk.type_aliases.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn declare_constant(&mut self, block: BlockId, name: &str, ty: SemanticType, label: String) -> Result<()> {
        self.block_mut(block).declare(name, Symbol::Constant { ty, label }, ErrorKind::DuplicateMember)
    }

    pub fn declare_variable(&mut self, block: BlockId, name: &str, ty: SemanticType, offset: i64, is_reference: bool) -> Result<()> {
        let blk = self.block_mut(block);
        blk.locals.push(name.to_string());
        blk.declare(
            name,
            Symbol::Variable { ty, offset, is_reference },
            ErrorKind::DuplicateMember,
        )
    }

    /// Declares a function parameter: a `Variable` symbol like `declare_variable`,
    /// but never added to `locals` since its storage is owned by the caller, not
    /// initialized or finalized by this block.
    pub fn declare_parameter(&mut self, block: BlockId, name: &str, ty: SemanticType, offset: i64, by_reference: bool) -> Result<()> {
        self.block_mut(block).declare(
            name,
            Symbol::Variable { ty, offset, is_reference: by_reference },
            ErrorKind::DuplicateMember,
        )
    }

    pub fn declare_function(&mut self, block: BlockId, name: &str, func: FuncId) -> Result<()> {
        self.block_mut(block).declare(name, Symbol::Function(func), ErrorKind::DuplicateMember)
    }

    /// Resolves `name` from `start`, walking toward the root. Returns the declaring
    /// level and the resolved symbol. A function's own name resolves to itself
    /// within its own body, ahead of the normal symbol-map lookup, since the
    /// function is not installed into its own body's symbol table (it is installed
    /// into the *parent's* table only once its body has been fully constructed).
    pub fn resolve(&self, start: BlockId, name: &str) -> Option<(usize, Resolved<'_>)> {
        let blk = self.block(start);
        if let Some(fid) = blk.function {
            if self.function(fid).name == name {
                return Some((blk.level.saturating_sub(1), Resolved::Function(fid)));
            }
        }
        if let Some(sym) = blk.symbols.get(name) {
            let resolved = match sym {
                Symbol::Constant { ty, label } => Resolved::Constant { ty, label },
                Symbol::Variable { ty, offset, is_reference } => Resolved::Variable {
                    ty,
                    offset: *offset,
                    is_reference: *is_reference,
                },
                Symbol::Function(fid) => Resolved::Function(*fid),
            };
            return Some((blk.level, resolved));
        }
        match blk.parent {
            Some(parent) => self.resolve(parent, name),
            None => None,
        }
    }

    pub fn resolve_type(&self, start: BlockId, name: &str) -> Option<SemanticType> {
        let blk = self.block(start);
        if let Some(ty) = blk.type_aliases.get(name) {
            return Some(ty.clone());
        }
        match blk.parent {
            Some(parent) => self.resolve_type(parent, name),
            None => None,
        }
    }

    /// Emits the instructions that load `registers::FRAME_BASE` with the frame
    /// pointer for `target_level`, as seen from `current_block`. Every frame below
    /// the root carries a static link for every level below its own, so this is
    /// always a single load, never an iterative walk up the chain.
    pub fn load_frame(&self, ctx: &mut Emitter, current_block: BlockId, target_level: usize) {
        let blk = self.block(current_block);
        if target_level == blk.level {
            emit!(ctx, "mov {}, rbp", registers::FRAME_BASE);
        } else {
            let nparams = blk
                .function
                .map(|f| self.function(f).params.len())
                .unwrap_or(0);
            let offset = blk.level + nparams + 1 - target_level;
            emit!(ctx, "mov rax, {}", offset);
            emit!(ctx, "mov {}, qword ptr [rbp + rax*8]", registers::FRAME_BASE);
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_scope_with_root() -> (Scope, BlockId) {
        let mut scope = Scope::new();
        let root = scope.reserve_block(None, None, 0);
        (scope, root)
    }

    #[test]
    fn resolves_from_innermost_scope_first() {
        let (mut scope, root) = fresh_scope_with_root();
        scope
            .declare_variable(root, "x", SemanticType::Integer, -1, false)
            .unwrap();
        let child = scope.reserve_block(Some(root), None, 1);
        scope
            .declare_variable(child, "x", SemanticType::Double, -1, false)
            .unwrap();

        let (level, resolved) = scope.resolve(child, "x").unwrap();
        assert_eq!(level, 1);
        match resolved {
            Resolved::Variable { ty, .. } => assert_eq!(*ty, SemanticType::Double),
            _ => panic!("expected variable"),
        }
    }

    #[test]
    fn falls_back_to_parent_when_not_locally_declared() {
        let (mut scope, root) = fresh_scope_with_root();
        scope
            .declare_variable(root, "x", SemanticType::Integer, -1, false)
            .unwrap();
        let child = scope.reserve_block(Some(root), None, 1);

        let (level, resolved) = scope.resolve(child, "x").unwrap();
        assert_eq!(level, 0);
        assert!(matches!(resolved, Resolved::Variable { .. }));
    }

    #[test]
    fn function_name_resolves_to_itself_inside_its_own_body() {
        let (mut scope, root) = fresh_scope_with_root();
        let func = scope.reserve_function(FunctionData {
            name: "fact".into(),
            params: vec![],
            return_type: Some(SemanticType::Integer),
            level: 1,
            label: String::new(),
            is_builtin: false,
            body: None,
        });
        let body = scope.reserve_block(Some(root), Some(func), 1);

        let (_, resolved) = scope.resolve(body, "fact").unwrap();
        match resolved {
            Resolved::Function(fid) => assert_eq!(fid, func),
            _ => panic!("expected function self-reference"),
        }
    }

    #[test]
    fn duplicate_declaration_in_same_block_is_rejected() {
        let (mut scope, root) = fresh_scope_with_root();
        scope
            .declare_variable(root, "x", SemanticType::Integer, -1, false)
            .unwrap();
        let err = scope
            .declare_variable(root, "x", SemanticType::Integer, -2, false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateMember);
    }

    #[test]
    fn unresolved_name_returns_none_at_root() {
        let (scope, root) = fresh_scope_with_root();
        assert!(scope.resolve(root, "nope").is_none());
    }

    #[test]
    fn load_frame_uses_rbp_directly_at_same_level() {
        let (scope, root) = fresh_scope_with_root();
        let mut ctx = Emitter::new("Test", &mut LabelCounter::new());
        scope.load_frame(&mut ctx, root, 0);
        assert!(ctx.code().contains("mov rbx, rbp"));
    }

    #[test]
    fn load_frame_computes_offset_for_outer_level() {
        let mut scope = Scope::new();
        let root = scope.reserve_block(None, None, 0);
        let func = scope.reserve_function(FunctionData {
            name: "inner".into(),
            params: vec![ParamDecl {
                name: "a".into(),
                by_reference: false,
                ty: SemanticType::Integer,
            }],
            return_type: None,
            level: 1,
            label: String::new(),
            is_builtin: false,
            body: None,
        });
        let body = scope.reserve_block(Some(root), Some(func), 1);
        let mut ctx = Emitter::new("Test", &mut LabelCounter::new());
        scope.load_frame(&mut ctx, body, 0);
        // level(1) + nparams(1) + 1 - target_level(0) = 3
        assert!(ctx.code().contains("mov rax, 3"));
    }
}
