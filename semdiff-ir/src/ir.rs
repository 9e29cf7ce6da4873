// SPDX-License-Identifier: Apache-2.0

//! Data model for the CFG-based IR that the semantic-diff engine compares:
//! modules, functions, basic blocks, instructions, and the textual emission
//! thereof.

use std::collections::HashMap;

/// Strongly-typed reference to an instruction in a function's instruction
/// arena.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct InstRef {
    pub index: usize,
}

/// Strongly-typed reference to a basic block of a function.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BlockRef {
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayTypeData {
    pub element_type: Box<Type>,
    pub element_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bits(usize),
    Ptr,
    /// Reference to a named aggregate defined at module level.
    Struct(String),
    Array(ArrayTypeData),
}

impl Type {
    pub fn new_array(element_type: Type, element_count: usize) -> Self {
        Type::Array(ArrayTypeData {
            element_type: Box::new(element_type),
            element_count,
        })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Returns the byte size of the type, resolving named aggregates through
    /// `module`. Bit widths are rounded up to whole bytes; pointers are 8
    /// bytes. Unknown aggregates size to zero.
    pub fn byte_size(&self, module: &Module) -> usize {
        match self {
            Type::Void => 0,
            Type::Bits(width) => width.div_ceil(8),
            Type::Ptr => 8,
            Type::Struct(name) => match module.get_struct(name) {
                Some(def) => def.byte_size(module),
                None => 0,
            },
            Type::Array(ArrayTypeData {
                element_type,
                element_count,
            }) => element_type.byte_size(module) * element_count,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bits(width) => write!(f, "bits[{}]", width),
            Type::Ptr => write!(f, "ptr"),
            Type::Struct(name) => write!(f, "%{}", name),
            Type::Array(ArrayTypeData {
                element_type,
                element_count,
            }) => write!(f, "{}[{}]", element_type, element_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    And,
    Or,
    Xor,
    Shl,
    Lshr,
    Ashr,
}

pub fn operator_to_binop(operator: &str) -> Option<Binop> {
    match operator {
        "add" => Some(Binop::Add),
        "sub" => Some(Binop::Sub),
        "mul" => Some(Binop::Mul),
        "udiv" => Some(Binop::Udiv),
        "sdiv" => Some(Binop::Sdiv),
        "urem" => Some(Binop::Urem),
        "srem" => Some(Binop::Srem),
        "and" => Some(Binop::And),
        "or" => Some(Binop::Or),
        "xor" => Some(Binop::Xor),
        "shl" => Some(Binop::Shl),
        "lshr" => Some(Binop::Lshr),
        "ashr" => Some(Binop::Ashr),
        _ => None,
    }
}

pub fn binop_to_operator(binop: Binop) -> &'static str {
    match binop {
        Binop::Add => "add",
        Binop::Sub => "sub",
        Binop::Mul => "mul",
        Binop::Udiv => "udiv",
        Binop::Sdiv => "sdiv",
        Binop::Urem => "urem",
        Binop::Srem => "srem",
        Binop::And => "and",
        Binop::Or => "or",
        Binop::Xor => "xor",
        Binop::Shl => "shl",
        Binop::Lshr => "lshr",
        Binop::Ashr => "ashr",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

pub fn operator_to_icmp_pred(operator: &str) -> Option<IcmpPred> {
    match operator {
        "eq" => Some(IcmpPred::Eq),
        "ne" => Some(IcmpPred::Ne),
        "ult" => Some(IcmpPred::Ult),
        "ule" => Some(IcmpPred::Ule),
        "ugt" => Some(IcmpPred::Ugt),
        "uge" => Some(IcmpPred::Uge),
        "slt" => Some(IcmpPred::Slt),
        "sle" => Some(IcmpPred::Sle),
        "sgt" => Some(IcmpPred::Sgt),
        "sge" => Some(IcmpPred::Sge),
        _ => None,
    }
}

pub fn icmp_pred_to_operator(pred: IcmpPred) -> &'static str {
    match pred {
        IcmpPred::Eq => "eq",
        IcmpPred::Ne => "ne",
        IcmpPred::Ult => "ult",
        IcmpPred::Ule => "ule",
        IcmpPred::Ugt => "ugt",
        IcmpPred::Uge => "uge",
        IcmpPred::Slt => "slt",
        IcmpPred::Sle => "sle",
        IcmpPred::Sgt => "sgt",
        IcmpPred::Sge => "sge",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    Zext,
    Sext,
    Trunc,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

pub fn operator_to_cast_kind(operator: &str) -> Option<CastKind> {
    match operator {
        "zext" => Some(CastKind::Zext),
        "sext" => Some(CastKind::Sext),
        "trunc" => Some(CastKind::Trunc),
        "bitcast" => Some(CastKind::Bitcast),
        "ptrtoint" => Some(CastKind::PtrToInt),
        "inttoptr" => Some(CastKind::IntToPtr),
        _ => None,
    }
}

pub fn cast_kind_to_operator(kind: CastKind) -> &'static str {
    match kind {
        CastKind::Zext => "zext",
        CastKind::Sext => "sext",
        CastKind::Trunc => "trunc",
        CastKind::Bitcast => "bitcast",
        CastKind::PtrToInt => "ptrtoint",
        CastKind::IntToPtr => "inttoptr",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i128),
    Str(String),
    Null,
}

/// An instruction operand. Instruction results and arguments are referenced
/// by index; globals are referenced by name because symbol ordering differs
/// across modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Inst(InstRef),
    Arg(usize),
    Const(ConstValue),
    Global(String),
}

/// Pattern metadata attached to instructions of pattern modules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMetadata {
    pub pattern_start: bool,
    pub pattern_end: bool,
    pub basic_block_limit: Option<usize>,
    pub basic_block_limit_end: bool,
}

impl PatternMetadata {
    pub fn is_empty(&self) -> bool {
        *self == PatternMetadata::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstPayload {
    Binop(Binop, Operand, Operand),
    Icmp {
        pred: IcmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Load {
        ptr: Operand,
        align: usize,
    },
    Store {
        value: Operand,
        ptr: Operand,
        align: usize,
    },
    Alloca {
        allocated_ty: Type,
        align: usize,
    },
    /// Address of an aggregate member: `base` must point at a value of the
    /// named struct type.
    FieldAddr {
        base: Operand,
        struct_name: String,
        index: usize,
    },
    Cast(CastKind, Operand),
    Call {
        callee: String,
        args: Vec<Operand>,
    },
    Asm {
        body: String,
        args: Vec<Operand>,
    },
    Phi {
        incoming: Vec<(Operand, BlockRef)>,
    },
    Ret(Option<Operand>),
    Br(BlockRef),
    BrIf {
        cond: Operand,
        then_blk: BlockRef,
        else_blk: BlockRef,
    },
    Switch {
        value: Operand,
        default: BlockRef,
        cases: Vec<(i128, BlockRef)>,
    },
}

impl InstPayload {
    pub fn get_operator(&self) -> &str {
        match self {
            InstPayload::Binop(op, _, _) => binop_to_operator(*op),
            InstPayload::Icmp { .. } => "icmp",
            InstPayload::Select { .. } => "select",
            InstPayload::Load { .. } => "load",
            InstPayload::Store { .. } => "store",
            InstPayload::Alloca { .. } => "alloca",
            InstPayload::FieldAddr { .. } => "field_addr",
            InstPayload::Cast(kind, _) => cast_kind_to_operator(*kind),
            InstPayload::Call { .. } => "call",
            InstPayload::Asm { .. } => "asm",
            InstPayload::Phi { .. } => "phi",
            InstPayload::Ret(_) => "ret",
            InstPayload::Br(_) => "br",
            InstPayload::BrIf { .. } => "br_if",
            InstPayload::Switch { .. } => "switch",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstPayload::Ret(_)
                | InstPayload::Br(_)
                | InstPayload::BrIf { .. }
                | InstPayload::Switch { .. }
        )
    }

    pub fn is_cast(&self) -> bool {
        matches!(self, InstPayload::Cast(..))
    }

    /// Successor blocks of a terminator, in branch order. Ordering is
    /// significant for comparison: the "then" successor must correspond to
    /// the "then" successor on the other side.
    pub fn successors(&self) -> Vec<BlockRef> {
        match self {
            InstPayload::Br(dest) => vec![*dest],
            InstPayload::BrIf {
                then_blk, else_blk, ..
            } => vec![*then_blk, *else_blk],
            InstPayload::Switch { default, cases, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|(_, b)| *b));
                succs
            }
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Inst {
    /// All instructions have known ids, unique within their function.
    pub text_id: usize,
    /// Instructions optionally have names; the default textual identity is
    /// `<operator>.<text_id>`.
    pub name: Option<String>,
    pub ty: Type,
    pub payload: InstPayload,
    pub pos: Option<Pos>,
    /// Name of the macro a constant operand of this instruction originated
    /// from, when the front end recorded one.
    pub macro_hint: Option<String>,
    /// Pattern metadata; only populated in pattern modules.
    pub pattern_meta: Option<PatternMetadata>,
}

/// Returns the textual identifier of an instruction: its name if present,
/// otherwise `"<operator>.<text_id>"`.
pub fn inst_textual_id(f: &Function, ir: InstRef) -> String {
    let inst = f.get_inst(ir);
    match &inst.name {
        Some(n) => n.clone(),
        None => format!("{}.{}", inst.payload.get_operator(), inst.text_id),
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    /// Ordered instructions; the last one is the block's terminator.
    pub insts: Vec<InstRef>,
}

impl Block {
    pub fn terminator(&self) -> Option<InstRef> {
        self.insts.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, PartialEq)]
pub struct FunctionType {
    pub param_types: Vec<Type>,
    pub return_type: Type,
    pub is_vararg: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub is_vararg: bool,
    pub calling_conv: Option<String>,
    /// Basic blocks; `blocks[0]` is the entry block. Empty for declarations.
    pub blocks: Vec<Block>,
    /// Instruction arena referenced by the blocks.
    pub insts: Vec<Inst>,
    pub pos: Option<Pos>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get_type(&self) -> FunctionType {
        FunctionType {
            param_types: self.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: self.ret_ty.clone(),
            is_vararg: self.is_vararg,
        }
    }

    pub fn entry_block(&self) -> Option<BlockRef> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(BlockRef { index: 0 })
        }
    }

    pub fn get_inst(&self, ir: InstRef) -> &Inst {
        &self.insts[ir.index]
    }

    pub fn get_inst_mut(&mut self, ir: InstRef) -> &mut Inst {
        &mut self.insts[ir.index]
    }

    pub fn get_block(&self, br: BlockRef) -> &Block {
        &self.blocks[br.index]
    }

    pub fn get_block_mut(&mut self, br: BlockRef) -> &mut Block {
        &mut self.blocks[br.index]
    }

    pub fn block_refs(&self) -> Vec<BlockRef> {
        (0..self.blocks.len()).map(|index| BlockRef { index }).collect()
    }

    /// Finds an instruction by its text id.
    pub fn find_inst_by_id(&self, text_id: usize) -> Option<InstRef> {
        self.insts
            .iter()
            .position(|i| i.text_id == text_id)
            .map(|index| InstRef { index })
    }

    /// Finds an instruction by its textual identifier.
    pub fn find_inst_by_name(&self, name: &str) -> Option<InstRef> {
        for (index, _) in self.insts.iter().enumerate() {
            let ir = InstRef { index };
            if inst_textual_id(self, ir) == name {
                return Some(ir);
            }
        }
        None
    }

    pub fn find_block_by_name(&self, name: &str) -> Option<BlockRef> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|index| BlockRef { index })
    }

    /// Returns the block containing the given instruction, if any block
    /// lists it.
    pub fn block_of_inst(&self, ir: InstRef) -> Option<BlockRef> {
        for (index, block) in self.blocks.iter().enumerate() {
            if block.insts.contains(&ir) {
                return Some(BlockRef { index });
            }
        }
        None
    }

    /// Returns one-past-the-largest text id in use.
    pub fn next_text_id(&self) -> usize {
        self.insts.iter().map(|i| i.text_id + 1).max().unwrap_or(1)
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", emit_fn(self))
    }
}

#[derive(Debug, Clone)]
pub struct FileTable {
    pub id_to_path: HashMap<usize, String>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            id_to_path: HashMap::new(),
        }
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub fileno: usize,
    pub lineno: usize,
    pub colno: usize,
}

impl Pos {
    pub fn to_human_string(&self, file_table: &FileTable) -> Option<String> {
        let path = file_table.id_to_path.get(&self.fileno)?;
        Some(format!("{}:{}:{}", path, self.lineno, self.colno))
    }
}

/// Debug-info record of an object-like macro definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDef {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Type>,
    pub align: Option<usize>,
    pub pos: Option<Pos>,
}

impl StructDef {
    pub fn byte_size(&self, module: &Module) -> usize {
        self.fields.iter().map(|t| t.byte_size(module)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub file_table: FileTable,
    pub macros: Vec<MacroDef>,
    pub structs: Vec<StructDef>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn get_fn(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_fn_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn get_global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn get_macro(&self, name: &str) -> Option<&MacroDef> {
        self.macros.iter().find(|m| m.name == name)
    }

    pub fn for_each_fn_mut<F: FnMut(&mut Function)>(&mut self, mut f: F) {
        for func in self.functions.iter_mut() {
            f(func);
        }
    }

    /// Returns a function name of the form `base.<n>` that is not yet taken,
    /// using the smallest available numeric suffix.
    pub fn unique_fn_name(&self, base: &str) -> String {
        let mut n = 1usize;
        loop {
            let candidate = format!("{}.{}", base, n);
            if self.get_fn(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", emit_module(self))
    }
}

fn operand_to_string(f: &Function, op: &Operand) -> String {
    match op {
        Operand::Inst(ir) => inst_textual_id(f, *ir),
        Operand::Arg(i) => f.params[*i].name.clone(),
        Operand::Const(ConstValue::Int(v)) => v.to_string(),
        Operand::Const(ConstValue::Str(s)) => format!("\"{}\"", s),
        Operand::Const(ConstValue::Null) => "null".to_string(),
        Operand::Global(name) => format!("@{}", name),
    }
}

fn block_name(f: &Function, br: BlockRef) -> String {
    f.blocks[br.index].name.clone()
}

fn payload_to_string(f: &Function, payload: &InstPayload) -> String {
    let op = |o: &Operand| operand_to_string(f, o);
    let bb = |b: BlockRef| block_name(f, b);
    match payload {
        InstPayload::Binop(_, a, b) => format!("{}, {}", op(a), op(b)),
        InstPayload::Icmp { pred, lhs, rhs } => {
            format!("{}, {}, {}", icmp_pred_to_operator(*pred), op(lhs), op(rhs))
        }
        InstPayload::Select {
            cond,
            on_true,
            on_false,
        } => format!("{}, {}, {}", op(cond), op(on_true), op(on_false)),
        InstPayload::Load { ptr, align } => format!("{}, align={}", op(ptr), align),
        InstPayload::Store { value, ptr, align } => {
            format!("{}, {}, align={}", op(value), op(ptr), align)
        }
        InstPayload::Alloca { allocated_ty, align } => {
            format!("ty={}, align={}", allocated_ty, align)
        }
        InstPayload::FieldAddr {
            base,
            struct_name,
            index,
        } => format!("{}, struct={}, index={}", op(base), struct_name, index),
        InstPayload::Cast(_, arg) => op(arg),
        InstPayload::Call { callee, args } => {
            let mut parts = vec![callee.clone()];
            parts.extend(args.iter().map(op));
            parts.join(", ")
        }
        InstPayload::Asm { body, args } => {
            let mut parts = vec![format!("\"{}\"", body)];
            parts.extend(args.iter().map(op));
            parts.join(", ")
        }
        InstPayload::Phi { incoming } => incoming
            .iter()
            .map(|(v, b)| format!("[{}, {}]", op(v), bb(*b)))
            .collect::<Vec<String>>()
            .join(", "),
        InstPayload::Ret(Some(v)) => op(v),
        InstPayload::Ret(None) => String::new(),
        InstPayload::Br(dest) => bb(*dest),
        InstPayload::BrIf {
            cond,
            then_blk,
            else_blk,
        } => format!("{}, {}, {}", op(cond), bb(*then_blk), bb(*else_blk)),
        InstPayload::Switch {
            value,
            default,
            cases,
        } => {
            let mut parts = vec![op(value), bb(*default)];
            parts.extend(cases.iter().map(|(k, b)| format!("[{}, {}]", k, bb(*b))));
            parts.join(", ")
        }
    }
}

fn pattern_meta_to_string(meta: &PatternMetadata) -> String {
    let mut parts: Vec<String> = Vec::new();
    if meta.pattern_start {
        parts.push("pattern-start".to_string());
    }
    if meta.pattern_end {
        parts.push("pattern-end".to_string());
    }
    if let Some(limit) = meta.basic_block_limit {
        parts.push(format!("bb-limit={}", limit));
    }
    if meta.basic_block_limit_end {
        parts.push("bb-limit-end".to_string());
    }
    format!("meta=[{}]", parts.join(", "))
}

fn inst_to_string(f: &Function, ir: InstRef) -> String {
    let inst = f.get_inst(ir);
    let name_str = inst_textual_id(f, ir);
    let args_str = payload_to_string(f, &inst.payload);
    let mut attrs = String::new();
    if !args_str.is_empty() {
        attrs.push_str(&args_str);
        attrs.push_str(", ");
    }
    attrs.push_str(&format!("id={}", inst.text_id));
    if let Some(pos) = &inst.pos {
        attrs.push_str(&format!(", pos=({},{},{})", pos.fileno, pos.lineno, pos.colno));
    }
    if let Some(macro_name) = &inst.macro_hint {
        attrs.push_str(&format!(", macro={}", macro_name));
    }
    if let Some(meta) = &inst.pattern_meta {
        if !meta.is_empty() {
            attrs.push_str(", ");
            attrs.push_str(&pattern_meta_to_string(meta));
        }
    }
    format!("{}: {} = {}({})", name_str, inst.ty, inst.payload.get_operator(), attrs)
}

fn signature_string(func: &Function) -> String {
    let mut params_str = func
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect::<Vec<String>>()
        .join(", ");
    if func.is_vararg {
        if params_str.is_empty() {
            params_str.push_str("...");
        } else {
            params_str.push_str(", ...");
        }
    }
    let mut out = format!("{}({}) -> {}", func.name, params_str, func.ret_ty);
    if let Some(cc) = &func.calling_conv {
        out.push_str(&format!(" cc={}", cc));
    }
    if let Some(pos) = &func.pos {
        out.push_str(&format!(" pos=({},{})", pos.fileno, pos.lineno));
    }
    out
}

/// Emits a function (or declaration) as text.
pub fn emit_fn(func: &Function) -> String {
    if func.is_declaration() {
        let mut params_str = func
            .params
            .iter()
            .map(|p| p.ty.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        if func.is_vararg {
            if params_str.is_empty() {
                params_str.push_str("...");
            } else {
                params_str.push_str(", ...");
            }
        }
        let mut out = format!("decl {}({}) -> {}", func.name, params_str, func.ret_ty);
        if let Some(cc) = &func.calling_conv {
            out.push_str(&format!(" cc={}", cc));
        }
        if let Some(pos) = &func.pos {
            out.push_str(&format!(" pos=({},{})", pos.fileno, pos.lineno));
        }
        return out;
    }
    let mut out = String::new();
    out.push_str(&format!("fn {} {{\n", signature_string(func)));
    for block in func.blocks.iter() {
        out.push_str(&format!("{}:\n", block.name));
        for ir in block.insts.iter() {
            out.push_str("  ");
            out.push_str(&inst_to_string(func, *ir));
            out.push('\n');
        }
    }
    out.push('}');
    out
}

/// Emits a module as text in the canonical order: header, file table, macro
/// records, aggregate definitions, globals, functions.
pub fn emit_module(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("module {}\n", module.name));

    let mut sorted_file_ids: Vec<&usize> = module.file_table.id_to_path.keys().collect();
    sorted_file_ids.sort();
    if !sorted_file_ids.is_empty() {
        out.push('\n');
    }
    for file_id in sorted_file_ids {
        let path = module.file_table.id_to_path[file_id].as_str();
        out.push_str(&format!("file_number {} \"{}\"\n", file_id, path));
    }

    if !module.macros.is_empty() {
        out.push('\n');
    }
    for m in module.macros.iter() {
        out.push_str(&format!("macro {} = \"{}\"\n", m.name, m.value));
    }

    if !module.structs.is_empty() {
        out.push('\n');
    }
    for s in module.structs.iter() {
        let fields = s
            .fields
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        out.push_str(&format!("struct {} = {{ {} }}", s.name, fields));
        if let Some(align) = s.align {
            out.push_str(&format!(" align={}", align));
        }
        if let Some(pos) = &s.pos {
            out.push_str(&format!(" pos=({},{})", pos.fileno, pos.lineno));
        }
        out.push('\n');
    }

    if !module.globals.is_empty() {
        out.push('\n');
    }
    for g in module.globals.iter() {
        out.push_str(&format!("global {}: {}\n", g.name, g.ty));
    }

    for func in module.functions.iter() {
        out.push('\n');
        out.push_str(&emit_fn(func));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser;

    use pretty_assertions::assert_eq;

    fn parse_fn(ir_text: &str) -> Function {
        let module_text = format!("module test\n\n{}\n", ir_text);
        let mut parser = ir_parser::Parser::new(&module_text);
        let module = parser.parse_module().unwrap();
        module.functions.into_iter().next().unwrap()
    }

    #[test]
    fn round_trip_simple_fn() {
        let ir_text = r#"fn add_one(x: bits[32]) -> bits[32] {
entry:
  sum: bits[32] = add(x, 1, id=1)
  ret.2: void = ret(sum, id=2)
}"#;
        let f = parse_fn(ir_text);
        assert_eq!(emit_fn(&f), ir_text);
    }

    #[test]
    fn successors_preserve_branch_order() {
        let f = parse_fn(
            r#"fn f(c: bits[1]) -> bits[32] {
entry:
  br_if.1: void = br_if(c, a, b, id=1)
a:
  ret.2: void = ret(1, id=2)
b:
  ret.3: void = ret(2, id=3)
}"#,
        );
        let term = f.get_block(BlockRef { index: 0 }).terminator().unwrap();
        let succs = f.get_inst(term).payload.successors();
        assert_eq!(succs.len(), 2);
        assert_eq!(f.get_block(succs[0]).name, "a");
        assert_eq!(f.get_block(succs[1]).name, "b");
    }

    #[test]
    fn struct_byte_size_resolves_nested_aggregates() {
        let text = r#"module m

struct inner = { bits[32], bits[32] }
struct outer = { %inner, ptr } align=8
"#;
        let mut parser = ir_parser::Parser::new(text);
        let module = parser.parse_module().unwrap();
        let outer = module.get_struct("outer").unwrap();
        assert_eq!(outer.byte_size(&module), 16);
    }

    #[test]
    fn declarations_have_no_blocks() {
        let f = parse_fn("decl printk(ptr, ...) -> void");
        assert!(f.is_declaration());
        assert!(f.is_vararg);
        assert_eq!(emit_fn(&f), "decl printk(ptr, ...) -> void");
    }
}
