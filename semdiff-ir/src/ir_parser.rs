// SPDX-License-Identifier: Apache-2.0

//! Parser for the textual form of the CFG IR.

use std::collections::HashMap;

use crate::ir::{
    self, operator_to_binop, operator_to_cast_kind, operator_to_icmp_pred, Block, BlockRef,
    ConstValue, FileTable, Function, Global, Inst, InstPayload, InstRef, MacroDef, Module,
    Operand, Param, PatternMetadata, Pos, StructDef, Type,
};

pub fn parse_path_to_module(path: &std::path::Path) -> Result<Module, ParseError> {
    let file_content = std::fs::read_to_string(path)
        .map_err(|e| ParseError::new(format!("failed to read file: {}", e)))?;
    let mut parser = Parser::new(&file_content);
    parser.parse_module()
}

#[derive(Debug)]
pub struct ParseError {
    msg: String,
}

impl ParseError {
    fn new(msg: String) -> Self {
        Self { msg }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError: {}", self.msg)
    }
}

impl std::error::Error for ParseError {}

/// Name environment for one function body: maps textual identifiers to the
/// operands they denote and block names to block indices. Both are populated
/// by a pre-scan so that phi instructions can reference values and blocks
/// that are defined later in the body.
struct FnEnv {
    values: HashMap<String, Operand>,
    blocks: HashMap<String, BlockRef>,
}

pub struct Parser {
    chars: Vec<char>,
    offset: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            offset: 0,
        }
    }

    fn rest_of_line(&self) -> String {
        let rest: String = self.chars[self.offset..].iter().collect();
        if let Some(pos) = rest.find('\n') {
            rest[..pos].to_string()
        } else {
            rest
        }
    }

    fn at_eof(&mut self) -> bool {
        self.drop_whitespace_and_comments();
        self.offset >= self.chars.len()
    }

    /// Drops a "//" style comment if one is present at the current offset.
    fn drop_comment(&mut self) -> bool {
        if self.peek_is("//") {
            while let Some(c) = self.popc() {
                if c == '\n' {
                    break;
                }
            }
            true
        } else {
            false
        }
    }

    fn drop_whitespace_and_comments(&mut self) {
        loop {
            self.drop_whitespace();
            if !self.drop_comment() {
                break;
            }
        }
    }

    fn drop_whitespace(&mut self) {
        while let Some(c) = self.peekc() {
            if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
                self.offset += 1;
            } else {
                break;
            }
        }
    }

    fn peekc(&self) -> Option<char> {
        self.chars.get(self.offset).copied()
    }

    fn popc(&mut self) -> Option<char> {
        let c = self.peekc();
        self.offset += 1;
        c
    }

    fn peek_is(&self, s: &str) -> bool {
        let mut i = self.offset;
        for want in s.chars() {
            if self.chars.get(i).copied() != Some(want) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn try_drop(&mut self, s: &str) -> bool {
        self.drop_whitespace_and_comments();
        if self.peek_is(s) {
            self.offset += s.chars().count();
            true
        } else {
            false
        }
    }

    fn drop_or_error(&mut self, s: &str, ctx: &str) -> Result<(), ParseError> {
        if self.try_drop(s) {
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "in {} expected {:?}; rest_of_line: {:?}",
                ctx,
                s,
                self.rest_of_line()
            )))
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_lowercase() || c.is_ascii_uppercase() || c == '_'
    }

    fn is_ident_rest(c: char) -> bool {
        Self::is_ident_start(c) || c.is_ascii_digit() || c == '.'
    }

    fn pop_identifier_or_error(&mut self, ctx: &str) -> Result<String, ParseError> {
        self.drop_whitespace_and_comments();
        let mut identifier = String::new();
        while let Some(c) = self.peekc() {
            let valid = if identifier.is_empty() {
                Self::is_ident_start(c)
            } else {
                Self::is_ident_rest(c)
            };
            if !valid {
                break;
            }
            self.offset += 1;
            identifier.push(c);
        }
        if identifier.is_empty() {
            return Err(ParseError::new(format!(
                "in {} expected identifier; rest_of_line: {:?}",
                ctx,
                self.rest_of_line()
            )));
        }
        Ok(identifier)
    }

    fn pop_string_or_error(&mut self, ctx: &str) -> Result<String, ParseError> {
        self.drop_or_error("\"", ctx)?;
        let mut string = String::new();
        loop {
            match self.popc() {
                Some('"') => break,
                Some(c) => string.push(c),
                None => {
                    return Err(ParseError::new(format!(
                        "in {} unterminated string literal",
                        ctx
                    )))
                }
            }
        }
        Ok(string)
    }

    fn pop_number_or_error(&mut self, ctx: &str) -> Result<i128, ParseError> {
        self.drop_whitespace_and_comments();
        let mut number = String::new();
        if self.peekc() == Some('-') {
            number.push('-');
            self.offset += 1;
        }
        while let Some(c) = self.peekc() {
            if c.is_ascii_digit() {
                number.push(c);
                self.offset += 1;
            } else {
                break;
            }
        }
        number.parse::<i128>().map_err(|_| {
            ParseError::new(format!(
                "in {} expected number; rest_of_line: {:?}",
                ctx,
                self.rest_of_line()
            ))
        })
    }

    fn pop_usize_or_error(&mut self, ctx: &str) -> Result<usize, ParseError> {
        let n = self.pop_number_or_error(ctx)?;
        usize::try_from(n)
            .map_err(|_| ParseError::new(format!("in {} expected non-negative number", ctx)))
    }

    /// Pure lookahead: does an `identifier=` attribute start at the current
    /// offset (after whitespace)?
    fn peek_is_attr(&self) -> bool {
        let mut i = self.offset;
        while matches!(self.chars.get(i), Some(' ') | Some('\t') | Some('\r') | Some('\n')) {
            i += 1;
        }
        let start = i;
        while let Some(&c) = self.chars.get(i) {
            let valid = if i == start {
                Self::is_ident_start(c)
            } else {
                Self::is_ident_rest(c)
            };
            if !valid {
                break;
            }
            i += 1;
        }
        if i == start {
            return false;
        }
        while matches!(self.chars.get(i), Some(' ') | Some('\t')) {
            i += 1;
        }
        self.chars.get(i).copied() == Some('=')
    }

    pub fn parse_type(&mut self, ctx: &str) -> Result<Type, ParseError> {
        self.drop_whitespace_and_comments();
        let mut ty = if self.try_drop("%") {
            let name = self.pop_identifier_or_error("struct type name")?;
            Type::Struct(name)
        } else {
            let ident = self.pop_identifier_or_error(&format!("{} type", ctx))?;
            match ident.as_str() {
                "void" => Type::Void,
                "ptr" => Type::Ptr,
                "bits" => {
                    self.drop_or_error("[", "bits type width")?;
                    let width = self.pop_usize_or_error("bits type width")?;
                    self.drop_or_error("]", "bits type width")?;
                    Type::Bits(width)
                }
                other => {
                    return Err(ParseError::new(format!(
                        "in {} unknown type {:?}; rest_of_line: {:?}",
                        ctx,
                        other,
                        self.rest_of_line()
                    )))
                }
            }
        };
        // Trailing `[N]` suffixes build arrays, innermost first.
        while self.peek_is("[") {
            self.drop_or_error("[", "array type")?;
            let count = self.pop_usize_or_error("array element count")?;
            self.drop_or_error("]", "array type")?;
            ty = Type::new_array(ty, count);
        }
        Ok(ty)
    }

    fn parse_pos_pair(&mut self, ctx: &str) -> Result<Pos, ParseError> {
        self.drop_or_error("(", ctx)?;
        let fileno = self.pop_usize_or_error(ctx)?;
        self.drop_or_error(",", ctx)?;
        let lineno = self.pop_usize_or_error(ctx)?;
        self.drop_or_error(")", ctx)?;
        Ok(Pos {
            fileno,
            lineno,
            colno: 0,
        })
    }

    fn parse_pos_triple(&mut self, ctx: &str) -> Result<Pos, ParseError> {
        self.drop_or_error("(", ctx)?;
        let fileno = self.pop_usize_or_error(ctx)?;
        self.drop_or_error(",", ctx)?;
        let lineno = self.pop_usize_or_error(ctx)?;
        self.drop_or_error(",", ctx)?;
        let colno = self.pop_usize_or_error(ctx)?;
        self.drop_or_error(")", ctx)?;
        Ok(Pos {
            fileno,
            lineno,
            colno,
        })
    }

    fn parse_operand(&mut self, env: &FnEnv, ctx: &str) -> Result<Operand, ParseError> {
        self.drop_whitespace_and_comments();
        match self.peekc() {
            Some('@') => {
                self.offset += 1;
                let name = self.pop_identifier_or_error("global operand")?;
                Ok(Operand::Global(name))
            }
            Some('"') => {
                let s = self.pop_string_or_error(ctx)?;
                Ok(Operand::Const(ConstValue::Str(s)))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let v = self.pop_number_or_error(ctx)?;
                Ok(Operand::Const(ConstValue::Int(v)))
            }
            _ => {
                let ident = self.pop_identifier_or_error(ctx)?;
                if ident == "null" {
                    return Ok(Operand::Const(ConstValue::Null));
                }
                env.values.get(&ident).cloned().ok_or_else(|| {
                    ParseError::new(format!(
                        "in {} unknown value {:?}; rest_of_line: {:?}",
                        ctx,
                        ident,
                        self.rest_of_line()
                    ))
                })
            }
        }
    }

    fn parse_block_name(&mut self, env: &FnEnv, ctx: &str) -> Result<BlockRef, ParseError> {
        let name = self.pop_identifier_or_error(ctx)?;
        env.blocks.get(&name).copied().ok_or_else(|| {
            ParseError::new(format!("in {} unknown block {:?}", ctx, name))
        })
    }

    fn parse_pattern_meta(&mut self) -> Result<PatternMetadata, ParseError> {
        self.drop_or_error("[", "pattern metadata")?;
        let mut meta = PatternMetadata::default();
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop("]") {
                break;
            }
            self.try_drop(",");
            self.drop_whitespace_and_comments();
            // Metadata keywords contain '-', so collect them manually.
            let mut item = String::new();
            while let Some(c) = self.peekc() {
                if Self::is_ident_rest(c) || c == '-' {
                    item.push(c);
                    self.offset += 1;
                } else {
                    break;
                }
            }
            match item.as_str() {
                "pattern-start" => meta.pattern_start = true,
                "pattern-end" => meta.pattern_end = true,
                "bb-limit-end" => meta.basic_block_limit_end = true,
                "bb-limit" => {
                    self.drop_or_error("=", "bb-limit value")?;
                    meta.basic_block_limit = Some(self.pop_usize_or_error("bb-limit value")?);
                }
                other => {
                    return Err(ParseError::new(format!(
                        "unknown pattern metadata item {:?}",
                        other
                    )))
                }
            }
        }
        Ok(meta)
    }

    /// Shared attribute tail of an instruction: everything between the last
    /// positional operand and the closing parenthesis.
    fn parse_inst_attrs(&mut self, ctx: &str) -> Result<InstAttrs, ParseError> {
        let mut attrs = InstAttrs::default();
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop(")") {
                break;
            }
            self.try_drop(",");
            let key = self.pop_identifier_or_error(&format!("{} attribute", ctx))?;
            self.drop_or_error("=", &format!("{} attribute value", ctx))?;
            match key.as_str() {
                "id" => attrs.id = Some(self.pop_usize_or_error("id attribute")?),
                "align" => attrs.align = Some(self.pop_usize_or_error("align attribute")?),
                "index" => attrs.index = Some(self.pop_usize_or_error("index attribute")?),
                "ty" => attrs.ty = Some(self.parse_type("ty attribute")?),
                "struct" => {
                    attrs.struct_name = Some(self.pop_identifier_or_error("struct attribute")?)
                }
                "pos" => attrs.pos = Some(self.parse_pos_triple("pos attribute")?),
                "macro" => {
                    attrs.macro_hint = Some(self.pop_identifier_or_error("macro attribute")?)
                }
                "meta" => attrs.meta = Some(self.parse_pattern_meta()?),
                other => {
                    return Err(ParseError::new(format!(
                        "in {} unknown attribute {:?}",
                        ctx, other
                    )))
                }
            }
        }
        Ok(attrs)
    }

    /// Parses the positional operands of `operator`, stopping at the
    /// attribute tail.
    fn parse_payload(
        &mut self,
        operator: &str,
        attrs: &InstAttrs,
        operands: Vec<Operand>,
        blocks: Vec<BlockRef>,
        icmp_pred: Option<ir::IcmpPred>,
        callee: Option<String>,
        asm_body: Option<String>,
        phi_incoming: Vec<(Operand, BlockRef)>,
        switch_cases: Vec<(i128, BlockRef)>,
    ) -> Result<InstPayload, ParseError> {
        let arity = |want: usize| -> Result<(), ParseError> {
            if operands.len() == want {
                Ok(())
            } else {
                Err(ParseError::new(format!(
                    "operator {} expects {} operands, got {}",
                    operator,
                    want,
                    operands.len()
                )))
            }
        };
        if let Some(binop) = operator_to_binop(operator) {
            arity(2)?;
            return Ok(InstPayload::Binop(binop, operands[0].clone(), operands[1].clone()));
        }
        if let Some(kind) = operator_to_cast_kind(operator) {
            arity(1)?;
            return Ok(InstPayload::Cast(kind, operands[0].clone()));
        }
        match operator {
            "icmp" => {
                arity(2)?;
                Ok(InstPayload::Icmp {
                    pred: icmp_pred.expect("icmp parse collects a predicate"),
                    lhs: operands[0].clone(),
                    rhs: operands[1].clone(),
                })
            }
            "select" => {
                arity(3)?;
                Ok(InstPayload::Select {
                    cond: operands[0].clone(),
                    on_true: operands[1].clone(),
                    on_false: operands[2].clone(),
                })
            }
            "load" => {
                arity(1)?;
                Ok(InstPayload::Load {
                    ptr: operands[0].clone(),
                    align: attrs.align.unwrap_or(1),
                })
            }
            "store" => {
                arity(2)?;
                Ok(InstPayload::Store {
                    value: operands[0].clone(),
                    ptr: operands[1].clone(),
                    align: attrs.align.unwrap_or(1),
                })
            }
            "alloca" => {
                arity(0)?;
                let allocated_ty = attrs.ty.clone().ok_or_else(|| {
                    ParseError::new("alloca requires a ty attribute".to_string())
                })?;
                Ok(InstPayload::Alloca {
                    allocated_ty,
                    align: attrs.align.unwrap_or(1),
                })
            }
            "field_addr" => {
                arity(1)?;
                let struct_name = attrs.struct_name.clone().ok_or_else(|| {
                    ParseError::new("field_addr requires a struct attribute".to_string())
                })?;
                let index = attrs.index.ok_or_else(|| {
                    ParseError::new("field_addr requires an index attribute".to_string())
                })?;
                Ok(InstPayload::FieldAddr {
                    base: operands[0].clone(),
                    struct_name,
                    index,
                })
            }
            "call" => Ok(InstPayload::Call {
                callee: callee.expect("call parse collects a callee"),
                args: operands,
            }),
            "asm" => Ok(InstPayload::Asm {
                body: asm_body.expect("asm parse collects a body"),
                args: operands,
            }),
            "phi" => {
                arity(0)?;
                Ok(InstPayload::Phi {
                    incoming: phi_incoming,
                })
            }
            "ret" => match operands.len() {
                0 => Ok(InstPayload::Ret(None)),
                1 => Ok(InstPayload::Ret(Some(operands[0].clone()))),
                n => Err(ParseError::new(format!("ret expects 0 or 1 operands, got {}", n))),
            },
            "br" => {
                arity(0)?;
                if blocks.len() != 1 {
                    return Err(ParseError::new("br expects one block".to_string()));
                }
                Ok(InstPayload::Br(blocks[0]))
            }
            "br_if" => {
                arity(1)?;
                if blocks.len() != 2 {
                    return Err(ParseError::new("br_if expects two blocks".to_string()));
                }
                Ok(InstPayload::BrIf {
                    cond: operands[0].clone(),
                    then_blk: blocks[0],
                    else_blk: blocks[1],
                })
            }
            "switch" => {
                arity(1)?;
                if blocks.len() != 1 {
                    return Err(ParseError::new("switch expects a default block".to_string()));
                }
                Ok(InstPayload::Switch {
                    value: operands[0].clone(),
                    default: blocks[0],
                    cases: switch_cases,
                })
            }
            other => Err(ParseError::new(format!(
                "unknown operator {:?}; rest_of_line: {:?}",
                other,
                self.rest_of_line()
            ))),
        }
    }

    /// Parses one instruction line: `name: ty = op(args..., attrs...)`.
    fn parse_inst(&mut self, env: &FnEnv) -> Result<Inst, ParseError> {
        let name = self.pop_identifier_or_error("instruction name")?;
        self.drop_or_error(":", "instruction name")?;
        let ty = self.parse_type("instruction result")?;
        self.drop_or_error("=", "instruction")?;
        let operator = self.pop_identifier_or_error("operator")?;
        self.drop_or_error("(", &format!("{} operands", operator))?;

        let mut operands: Vec<Operand> = Vec::new();
        let mut blocks: Vec<BlockRef> = Vec::new();
        let mut icmp_pred = None;
        let mut callee = None;
        let mut asm_body = None;
        let mut phi_incoming: Vec<(Operand, BlockRef)> = Vec::new();
        let mut switch_cases: Vec<(i128, BlockRef)> = Vec::new();

        // Operator-specific leading tokens.
        match operator.as_str() {
            "icmp" => {
                let pred_str = self.pop_identifier_or_error("icmp predicate")?;
                icmp_pred = Some(operator_to_icmp_pred(&pred_str).ok_or_else(|| {
                    ParseError::new(format!("unknown icmp predicate {:?}", pred_str))
                })?);
                self.drop_or_error(",", "icmp")?;
            }
            "call" => {
                callee = Some(self.pop_identifier_or_error("call callee")?);
            }
            "asm" => {
                asm_body = Some(self.pop_string_or_error("asm body")?);
            }
            _ => {}
        }

        // Positional operands / blocks until the attribute tail begins.
        loop {
            self.drop_whitespace_and_comments();
            if self.peek_is(")") || self.peek_is_attr() {
                break;
            }
            self.try_drop(",");
            self.drop_whitespace_and_comments();
            if self.peek_is(")") || self.peek_is_attr() {
                break;
            }
            match operator.as_str() {
                "phi" => {
                    self.drop_or_error("[", "phi incoming")?;
                    let v = self.parse_operand(env, "phi incoming value")?;
                    self.drop_or_error(",", "phi incoming")?;
                    let b = self.parse_block_name(env, "phi incoming block")?;
                    self.drop_or_error("]", "phi incoming")?;
                    phi_incoming.push((v, b));
                }
                "br" => blocks.push(self.parse_block_name(env, "br target")?),
                "br_if" => {
                    if operands.is_empty() {
                        operands.push(self.parse_operand(env, "br_if condition")?);
                    } else {
                        blocks.push(self.parse_block_name(env, "br_if target")?);
                    }
                }
                "switch" => {
                    if operands.is_empty() {
                        operands.push(self.parse_operand(env, "switch value")?);
                    } else if blocks.is_empty() && !self.peek_is("[") {
                        blocks.push(self.parse_block_name(env, "switch default")?);
                    } else {
                        self.drop_or_error("[", "switch case")?;
                        let k = self.pop_number_or_error("switch case value")?;
                        self.drop_or_error(",", "switch case")?;
                        let b = self.parse_block_name(env, "switch case block")?;
                        self.drop_or_error("]", "switch case")?;
                        switch_cases.push((k, b));
                    }
                }
                _ => operands.push(self.parse_operand(env, &format!("{} operand", operator))?),
            }
        }
        let attrs = self.parse_inst_attrs(&operator)?;
        let text_id = attrs.id.ok_or_else(|| {
            ParseError::new(format!("instruction {:?} is missing an id attribute", name))
        })?;
        let payload = self.parse_payload(
            &operator,
            &attrs,
            operands,
            blocks,
            icmp_pred,
            callee,
            asm_body,
            phi_incoming,
            switch_cases,
        )?;
        let default_name = format!("{}.{}", payload.get_operator(), text_id);
        Ok(Inst {
            text_id,
            name: if name == default_name { None } else { Some(name) },
            ty,
            payload,
            pos: attrs.pos,
            macro_hint: attrs.macro_hint,
            pattern_meta: attrs.meta,
        })
    }

    /// Pre-scans a function body (between braces) to collect block names and
    /// instruction result names in definition order, so that forward
    /// references (phi values, branch targets) resolve during the real parse.
    fn prescan_body(&self) -> Result<FnEnv, ParseError> {
        let mut env = FnEnv {
            values: HashMap::new(),
            blocks: HashMap::new(),
        };
        let rest: String = self.chars[self.offset..].iter().collect();
        let mut inst_index = 0usize;
        let mut block_index = 0usize;
        for line in rest.lines() {
            let trimmed = line.trim();
            if trimmed == "}" {
                break;
            }
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            if let Some(label) = trimmed.strip_suffix(':') {
                if !label.contains(' ') && !label.contains('=') {
                    env.blocks
                        .insert(label.to_string(), BlockRef { index: block_index });
                    block_index += 1;
                    continue;
                }
            }
            if let Some(colon) = trimmed.find(':') {
                let name = trimmed[..colon].trim().to_string();
                env.values
                    .insert(name, Operand::Inst(InstRef { index: inst_index }));
                inst_index += 1;
            }
        }
        Ok(env)
    }

    fn parse_fn_body(&mut self, func: &mut Function) -> Result<(), ParseError> {
        let mut env = self.prescan_body()?;
        for (i, p) in func.params.iter().enumerate() {
            env.values.insert(p.name.clone(), Operand::Arg(i));
        }
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop("}") {
                break;
            }
            // Block label: bare identifier followed by a colon at end of line.
            let save = self.offset;
            let ident = self.pop_identifier_or_error("block label or instruction")?;
            if self.peek_is(":") && env.blocks.contains_key(&ident) {
                // Distinguish `entry:` from `name: ty = ...` by what follows
                // the colon.
                let mut i = self.offset + 1;
                while matches!(self.chars.get(i), Some(' ') | Some('\t') | Some('\r')) {
                    i += 1;
                }
                if matches!(self.chars.get(i), Some('\n') | None) {
                    self.offset += 1;
                    func.blocks.push(Block {
                        name: ident,
                        insts: Vec::new(),
                    });
                    continue;
                }
            }
            self.offset = save;
            let inst = self.parse_inst(&env)?;
            let inst_ref = InstRef {
                index: func.insts.len(),
            };
            func.insts.push(inst);
            let block = func.blocks.last_mut().ok_or_else(|| {
                ParseError::new("instruction before any block label".to_string())
            })?;
            block.insts.push(inst_ref);
        }
        Ok(())
    }

    fn parse_fn_signature_tail(&mut self, func: &mut Function) -> Result<(), ParseError> {
        self.drop_or_error("->", "function return type")?;
        func.ret_ty = self.parse_type("function return")?;
        loop {
            self.drop_whitespace_and_comments();
            if self.peek_is("cc") && self.peek_is_attr() {
                self.pop_identifier_or_error("cc attribute")?;
                self.drop_or_error("=", "cc attribute")?;
                func.calling_conv = Some(self.pop_identifier_or_error("cc value")?);
            } else if self.peek_is("pos") && self.peek_is_attr() {
                self.pop_identifier_or_error("pos attribute")?;
                self.drop_or_error("=", "pos attribute")?;
                func.pos = Some(self.parse_pos_pair("function pos")?);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_fn(&mut self) -> Result<Function, ParseError> {
        let name = self.pop_identifier_or_error("function name")?;
        let mut func = Function {
            name,
            params: Vec::new(),
            ret_ty: Type::Void,
            is_vararg: false,
            calling_conv: None,
            blocks: Vec::new(),
            insts: Vec::new(),
            pos: None,
        };
        self.drop_or_error("(", "function params")?;
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop(")") {
                break;
            }
            self.try_drop(",");
            self.drop_whitespace_and_comments();
            if self.try_drop(")") {
                break;
            }
            if self.try_drop("...") {
                func.is_vararg = true;
                self.drop_or_error(")", "vararg marker closes params")?;
                break;
            }
            let pname = self.pop_identifier_or_error("param name")?;
            self.drop_or_error(":", "param")?;
            let pty = self.parse_type("param")?;
            func.params.push(Param {
                name: pname,
                ty: pty,
            });
        }
        self.parse_fn_signature_tail(&mut func)?;
        self.drop_or_error("{", "function body")?;
        self.parse_fn_body(&mut func)?;
        Ok(func)
    }

    fn parse_decl(&mut self) -> Result<Function, ParseError> {
        let name = self.pop_identifier_or_error("declaration name")?;
        let mut func = Function {
            name,
            params: Vec::new(),
            ret_ty: Type::Void,
            is_vararg: false,
            calling_conv: None,
            blocks: Vec::new(),
            insts: Vec::new(),
            pos: None,
        };
        self.drop_or_error("(", "declaration params")?;
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop(")") {
                break;
            }
            self.try_drop(",");
            self.drop_whitespace_and_comments();
            if self.try_drop(")") {
                break;
            }
            if self.try_drop("...") {
                func.is_vararg = true;
                self.drop_or_error(")", "vararg marker closes params")?;
                break;
            }
            let index = func.params.len();
            let pty = self.parse_type("declaration param")?;
            func.params.push(Param {
                name: format!("a{}", index),
                ty: pty,
            });
        }
        self.parse_fn_signature_tail(&mut func)?;
        Ok(func)
    }

    fn parse_struct_def(&mut self) -> Result<StructDef, ParseError> {
        let name = self.pop_identifier_or_error("struct name")?;
        self.drop_or_error("=", "struct definition")?;
        self.drop_or_error("{", "struct fields")?;
        let mut fields: Vec<Type> = Vec::new();
        loop {
            self.drop_whitespace_and_comments();
            if self.try_drop("}") {
                break;
            }
            self.try_drop(",");
            self.drop_whitespace_and_comments();
            if self.try_drop("}") {
                break;
            }
            fields.push(self.parse_type("struct field")?);
        }
        let mut def = StructDef {
            name,
            fields,
            align: None,
            pos: None,
        };
        loop {
            self.drop_whitespace_and_comments();
            if self.peek_is("align") && self.peek_is_attr() {
                self.pop_identifier_or_error("align attribute")?;
                self.drop_or_error("=", "align attribute")?;
                def.align = Some(self.pop_usize_or_error("align value")?);
            } else if self.peek_is("pos") && self.peek_is_attr() {
                self.pop_identifier_or_error("pos attribute")?;
                self.drop_or_error("=", "pos attribute")?;
                def.pos = Some(self.parse_pos_pair("struct pos")?);
            } else {
                break;
            }
        }
        Ok(def)
    }

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        log::debug!("parse_module");
        self.drop_or_error("module", "module header")?;
        let name = self.pop_identifier_or_error("module name")?;
        let mut module = Module {
            name,
            file_table: FileTable::new(),
            macros: Vec::new(),
            structs: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        };
        while !self.at_eof() {
            if self.try_drop("file_number") {
                let id = self.pop_usize_or_error("file number")?;
                let path = self.pop_string_or_error("file path")?;
                if module.file_table.id_to_path.insert(id, path).is_some() {
                    return Err(ParseError::new(format!(
                        "file number {} already exists",
                        id
                    )));
                }
            } else if self.try_drop("macro") {
                let mname = self.pop_identifier_or_error("macro name")?;
                self.drop_or_error("=", "macro definition")?;
                let value = self.pop_string_or_error("macro value")?;
                module.macros.push(MacroDef { name: mname, value });
            } else if self.try_drop("struct") {
                module.structs.push(self.parse_struct_def()?);
            } else if self.try_drop("global") {
                let gname = self.pop_identifier_or_error("global name")?;
                self.drop_or_error(":", "global")?;
                let gty = self.parse_type("global")?;
                module.globals.push(Global {
                    name: gname,
                    ty: gty,
                });
            } else if self.try_drop("decl") {
                module.functions.push(self.parse_decl()?);
            } else if self.try_drop("fn") {
                module.functions.push(self.parse_fn()?);
            } else {
                return Err(ParseError::new(format!(
                    "unexpected top-level construct; rest_of_line: {:?}",
                    self.rest_of_line()
                )));
            }
        }
        Ok(module)
    }
}

#[derive(Default)]
struct InstAttrs {
    id: Option<usize>,
    align: Option<usize>,
    index: Option<usize>,
    ty: Option<Type>,
    struct_name: Option<String>,
    pos: Option<Pos>,
    macro_hint: Option<String>,
    meta: Option<PatternMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(text: &str) {
        let mut parser = Parser::new(text);
        let module = parser.parse_module().unwrap();
        assert_eq!(module.to_string(), text);
    }

    #[test]
    fn round_trip_module_with_everything() {
        round_trip(
            r#"module kernel_old

file_number 0 "drivers/net/foo.c"

macro __LINE__ = "42"

struct sk_buff = { bits[32], bits[64] } align=8 pos=(0,14)

global counter: bits[32]

decl printk(ptr, ...) -> void

fn get_flags(s: ptr) -> bits[32] pos=(0,100) {
entry:
  p: ptr = field_addr(s, struct=sk_buff, index=0, id=1)
  v: bits[32] = load(p, align=4, id=2, pos=(0,101,5))
  store.3: void = store(v, @counter, align=4, id=3)
  c: bits[1] = icmp(eq, v, 0, id=4)
  br_if.5: void = br_if(c, zero, nonzero, id=5)
zero:
  ret.6: void = ret(0, id=6)
nonzero:
  ret.7: void = ret(v, id=7)
}
"#,
        );
    }

    #[test]
    fn round_trip_phi_with_forward_references() {
        round_trip(
            r#"module m

fn count(n: bits[32]) -> bits[32] {
entry:
  br.1: void = br(loop, id=1)
loop:
  i: bits[32] = phi([0, entry], [next, loop], id=2)
  next: bits[32] = add(i, 1, id=3)
  done: bits[1] = icmp(uge, next, n, id=4)
  br_if.5: void = br_if(done, exit, loop, id=5)
exit:
  ret.6: void = ret(i, id=6)
}
"#,
        );
    }

    #[test]
    fn round_trip_switch_and_casts() {
        round_trip(
            r#"module m

fn classify(x: bits[64]) -> bits[32] {
entry:
  lo: bits[32] = trunc(x, id=1)
  switch.2: void = switch(lo, other, [0, zero], [1, one], id=2)
zero:
  ret.3: void = ret(0, id=3)
one:
  ret.4: void = ret(1, id=4)
other:
  wide: bits[32] = bitcast(lo, id=5)
  ret.6: void = ret(wide, id=6)
}
"#,
        );
    }

    #[test]
    fn round_trip_pattern_metadata() {
        round_trip(
            r#"module pat

fn new_shift(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = shl(x, 1, id=1, meta=[pattern-start, pattern-end, bb-limit=2])
  ret.2: void = ret(r, id=2)
}
"#,
        );
    }

    #[test]
    fn unknown_value_is_an_error() {
        let mut parser = Parser::new(
            r#"module m

fn f() -> bits[32] {
entry:
  ret.1: void = ret(ghost, id=1)
}
"#,
        );
        let err = parser.parse_module().unwrap_err();
        assert!(err.to_string().contains("unknown value"));
    }

    #[test]
    fn asm_and_calls_round_trip() {
        round_trip(
            r#"module m

decl helper(bits[32]) -> bits[32]

fn f(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = call(helper, x, id=1)
  barrier: void = asm("mfence", id=2)
  ret.3: void = ret(r, id=3)
}
"#,
        );
    }
}
