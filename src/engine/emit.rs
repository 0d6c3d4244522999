// パス: src/engine/emit.rs
// 役割: ノード木を歩いて型付き SSA IR を構築する再帰エミッタ
// 意図: ノード種別と演算子でディスパッチし、特殊形式を個別に下降させる
// 関連ファイル: src/engine/mod.rs, src/engine/types.rs, src/ast.rs
//! 式エミッタと特殊形式
//!
//! - `emit_expr` がノード 1 つを SSA 値へ下降させる中心のディスパッチ。
//!   `defn` や `struct` のように値を生まないフォームは `None` を返す。
//! - 変数は原則スタックスロット経由で読み書きする。ポインタ型引数のみ
//!   呼び出し元の格納場所をそのまま束縛し（by-ref）、参照・間接参照・
//!   間接代入が呼び出し元の記憶域に届くようにする。
//! - 演算子は被演算子の型名で昇格を決める。どちらかが浮動小数なら両方を
//!   `float64` へ、そうでなければ広い方の整数幅へ符号拡張する。
//! - ユーザ関数は `defn` で記録し、最初の呼び出しで実体化する。再帰は
//!   本体の下降前に `FuncId` を登録することで一度きりの実体化に保つ。

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    types, AbiParam, Function, InstBuilder, MemFlags, StackSlotData, StackSlotKind, Type,
    UserFuncName, Value,
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};

use crate::ast::{Node, NodeKind};
use crate::engine::types::{lookup_record, record_placement, resolve, RecordLayout, TypeSpec};
use crate::engine::{FuncDef, RunState, VarBinding};
use crate::errors::{CompileError, CompileResult};

/// 下降結果の SSA 値と、その型名。
pub(crate) struct LoweredValue {
    pub value: Value,
    pub ty: String,
}

impl LoweredValue {
    fn new(value: Value, ty: impl Into<String>) -> Self {
        Self {
            value,
            ty: ty.into(),
        }
    }
}

/// モジュール・表・ポインタ型をまとめて持ち歩く下降コンテキスト。
pub(crate) struct Emitter<'a> {
    pub module: &'a mut JITModule,
    pub state: &'a mut RunState,
    pub ptr_ty: Type,
}

/// 破棄ノードを除いた子の一覧。コレクションを読む側は常にこれを使う。
fn active_children(node: &Node) -> Vec<&Node> {
    node.children
        .iter()
        .filter(|c| c.kind != NodeKind::Discard)
        .collect()
}

/// キーワードノードから `:` を除いた型名を取り出す。
fn keyword_name<'n>(node: &'n Node, what: &str) -> CompileResult<&'n str> {
    if node.kind != NodeKind::Keyword {
        return Err(err_node(
            "CODEGEN003",
            format!("{} must be a keyword, got {}", what, node.kind.name()),
            node,
        ));
    }
    Ok(&node.text[1..])
}

/// 対象ノードの整形テキストを添えた診断を作る。
#[track_caller]
fn err_node(code: &'static str, msg: impl Into<String>, node: &Node) -> CompileError {
    CompileError::at_node(code, msg, node.line, node.column, node.pprint())
}

/// アラインメントをスタックスロット用のシフト量へ変換する。
fn align_shift(align: u32) -> u8 {
    align.trailing_zeros() as u8
}

/// 整数幅から型名へ戻す。
fn int_name(width: u32) -> &'static str {
    match width {
        8 => "int8",
        16 => "int16",
        32 => "int32",
        _ => "int64",
    }
}

impl Emitter<'_> {
    /// 型名文字列を現在のレコード表で解決する。
    fn resolve_ty(&self, name: &str, node: &Node) -> CompileResult<TypeSpec> {
        resolve(name, &self.state.records, node.line, node.column)
    }

    /// スタックスロットを確保してその先頭アドレスを返す。
    fn alloc_slot(&self, b: &mut FunctionBuilder, size: u32, align: u32) -> Value {
        let data = StackSlotData::new(StackSlotKind::ExplicitSlot, size.max(1), align_shift(align));
        let slot = b.func.create_sized_stack_slot(data);
        b.ins().stack_addr(self.ptr_ty, slot, 0)
    }

    /// ノード 1 つを下降させる。値を生まないフォームは `None`。
    pub fn emit_expr(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
    ) -> CompileResult<Option<LoweredValue>> {
        match node.kind {
            NodeKind::Int => Ok(Some(self.emit_int(b, node)?)),
            NodeKind::Float => Ok(Some(self.emit_float(b, node)?)),
            NodeKind::Symbol => Ok(Some(self.emit_symbol(b, node)?)),
            NodeKind::List => self.emit_list(b, node),
            other => Err(err_node(
                "CODEGEN010",
                format!("Unsupported expression: {}", other.name()),
                node,
            )),
        }
    }

    /// 整数リテラル。型ヒントがあればその幅、なければ `int32`。
    fn emit_int(&mut self, b: &mut FunctionBuilder, node: &Node) -> CompileResult<LoweredValue> {
        let text = node
            .text
            .strip_suffix(['N', 'M'])
            .unwrap_or(node.text.as_str());
        let value: i64 = text.parse().map_err(|_| {
            err_node(
                "CODEGEN011",
                format!("Invalid integer literal: {}", node.text),
                node,
            )
        })?;

        match node.type_hint() {
            None => Ok(LoweredValue::new(b.ins().iconst(types::I32, value), "int32")),
            Some(hint) => {
                let hint = hint.to_string();
                let spec = self.resolve_ty(&hint, node)?;
                match spec {
                    TypeSpec::F32 => {
                        Ok(LoweredValue::new(b.ins().f32const(value as f32), "float32"))
                    }
                    TypeSpec::F64 => {
                        Ok(LoweredValue::new(b.ins().f64const(value as f64), "float64"))
                    }
                    ref s if s.is_int() => {
                        let clif = s.clif(self.ptr_ty).unwrap_or(types::I32);
                        Ok(LoweredValue::new(b.ins().iconst(clif, value), hint))
                    }
                    _ => Err(err_node(
                        "CODEGEN012",
                        format!("Invalid type hint on integer literal: {}", hint),
                        node,
                    )),
                }
            }
        }
    }

    /// 浮動小数リテラル。既定は `float64`、`float32` ヒントで単精度。
    fn emit_float(&mut self, b: &mut FunctionBuilder, node: &Node) -> CompileResult<LoweredValue> {
        let text = node.text.strip_suffix('M').unwrap_or(node.text.as_str());
        // `1.` や `1.E3` のような小数部の空きを埋めてから解析する
        let mut normalized = text.replace(".E", ".0E").replace(".e", ".0e");
        if normalized.ends_with('.') {
            normalized.push('0');
        }
        let value: f64 = normalized.parse().map_err(|_| {
            err_node(
                "CODEGEN012",
                format!("Invalid float literal: {}", node.text),
                node,
            )
        })?;

        match node.type_hint() {
            Some(hint) if hint == "float32" => {
                Ok(LoweredValue::new(b.ins().f32const(value as f32), "float32"))
            }
            Some(hint) => {
                let hint = hint.to_string();
                let spec = self.resolve_ty(&hint, node)?;
                if spec.is_int() {
                    let clif = spec.clif(self.ptr_ty).unwrap_or(types::I32);
                    Ok(LoweredValue::new(b.ins().iconst(clif, value as i64), hint))
                } else {
                    Ok(LoweredValue::new(b.ins().f64const(value), "float64"))
                }
            }
            None => Ok(LoweredValue::new(b.ins().f64const(value), "float64")),
        }
    }

    /// シンボル。`else` だけは `cond` 用の定数 1 になる。
    fn emit_symbol(&mut self, b: &mut FunctionBuilder, node: &Node) -> CompileResult<LoweredValue> {
        if node.text == "else" {
            return Ok(LoweredValue::new(b.ins().iconst(types::I32, 1), "int32"));
        }

        let binding = self.lookup_var(node)?;
        if binding.by_ref {
            // ポインタ型引数はスロットがそのままポインタ値
            return Ok(LoweredValue::new(binding.slot, binding.ty));
        }
        let spec = self.resolve_ty(&binding.ty, node)?;
        let clif = spec.clif(self.ptr_ty).ok_or_else(|| {
            err_node(
                "CODEGEN014",
                format!(
                    "Variable {} of type {} cannot be loaded as a value",
                    node.text, binding.ty
                ),
                node,
            )
        })?;
        let value = b.ins().load(clif, MemFlags::new(), binding.slot, 0);
        Ok(LoweredValue::new(value, binding.ty))
    }

    fn lookup_var(&self, node: &Node) -> CompileResult<VarBinding> {
        self.state.vars.get(&node.text).cloned().ok_or_else(|| {
            err_node(
                "CODEGEN013",
                format!("Unknown variable: {}", node.text),
                node,
            )
        })
    }

    /// リスト。特殊形式 → 関数呼び出し → 文列 の順で形を判定する。
    fn emit_list(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
    ) -> CompileResult<Option<LoweredValue>> {
        let kids = active_children(node);
        let Some(head) = kids.first() else {
            return Err(err_node("CODEGEN015", "Expected operator symbol", node));
        };

        if head.kind == NodeKind::Symbol {
            match head.text.as_str() {
                "struct" => {
                    self.emit_struct_def(node, &kids)?;
                    return Ok(None);
                }
                "defn" => {
                    self.emit_defn(node, &kids)?;
                    return Ok(None);
                }
                "=" => return self.emit_assign(b, node, &kids),
                "put" => return self.emit_put(b, node, &kids).map(Some),
                "ref" => return self.emit_ref(node, &kids).map(Some),
                "deref" => return self.emit_deref(b, node, &kids).map(Some),
                "." => return self.emit_field_access(b, node, &kids).map(Some),
                "while" => return self.emit_while(b, node, &kids).map(Some),
                "cond" => return self.emit_cond(b, node, &kids).map(Some),
                "+" | "-" | "*" | "/" | "==" | "!=" | "<" | "<=" | ">" | ">=" => {
                    return self.emit_operator(b, node, &kids).map(Some)
                }
                name => {
                    if self.state.funcs.contains_key(name) {
                        return self.emit_call(b, node, &kids);
                    }
                }
            }
        }

        // 文列: すべての子がリストか基本リテラルで、先頭がリストの形
        let sequence_shape = kids.len() > 1
            && kids[0].kind == NodeKind::List
            && kids.iter().all(|k| {
                matches!(
                    k.kind,
                    NodeKind::List | NodeKind::Int | NodeKind::Float | NodeKind::Symbol
                )
            });
        if sequence_shape {
            let mut last = None;
            for kid in &kids {
                last = self.emit_expr(b, kid)?;
            }
            return Ok(last);
        }

        if head.kind != NodeKind::Symbol {
            return Err(err_node("CODEGEN017", "Expected operator symbol", node));
        }
        Err(err_node(
            "CODEGEN016",
            format!("Unknown operator: {}", head.text),
            node,
        ))
    }

    /// `(struct Name ((field :type) …))` — レコード配置の定義。
    fn emit_struct_def(&mut self, node: &Node, kids: &[&Node]) -> CompileResult<()> {
        if kids.len() != 3 {
            return Err(err_node(
                "CODEGEN020",
                "struct expects a name and a field list",
                node,
            ));
        }
        let name_node = kids[1];
        if name_node.kind != NodeKind::Symbol {
            return Err(err_node(
                "CODEGEN021",
                format!("struct name must be a symbol, got {}", name_node.kind.name()),
                name_node,
            ));
        }
        if self.state.records.contains_key(&name_node.text) {
            return Err(err_node(
                "CODEGEN022",
                format!("Record {} is already defined", name_node.text),
                node,
            ));
        }
        let fields_node = kids[2];
        if fields_node.kind != NodeKind::List {
            return Err(err_node(
                "CODEGEN023",
                "struct fields must be a list",
                fields_node,
            ));
        }

        let mut fields = Vec::new();
        for field in active_children(fields_node) {
            let pair = active_children(field);
            let shape_ok = field.kind == NodeKind::List
                && pair.len() == 2
                && pair[0].kind == NodeKind::Symbol
                && pair[1].kind == NodeKind::Keyword;
            if !shape_ok {
                return Err(err_node(
                    "CODEGEN024",
                    "struct field must be a (symbol :type) pair",
                    field,
                ));
            }
            let ty = &pair[1].text[1..];
            // フィールド型は定義時点で解決できなければならない
            self.resolve_ty(ty, pair[1])?;
            fields.push((pair[0].text.clone(), ty.to_string()));
        }

        self.state
            .records
            .insert(name_node.text.clone(), RecordLayout { fields });
        Ok(())
    }

    /// `(defn :ret name (args…) body…)` — 関数の記録。実体化は呼び出し時。
    fn emit_defn(&mut self, node: &Node, kids: &[&Node]) -> CompileResult<()> {
        if kids.len() < 4 {
            return Err(err_node(
                "CODEGEN030",
                "defn expects a return type, a name, a parameter list and a body",
                node,
            ));
        }
        let ret = keyword_name(kids[1], "defn return type")?.to_string();
        let name_node = kids[2];
        if name_node.kind != NodeKind::Symbol {
            return Err(err_node(
                "CODEGEN032",
                format!("defn name must be a symbol, got {}", name_node.kind.name()),
                name_node,
            ));
        }
        let params_node = kids[3];
        if !matches!(params_node.kind, NodeKind::List | NodeKind::Vector) {
            return Err(err_node(
                "CODEGEN033",
                "defn parameter list must be a list",
                params_node,
            ));
        }

        let mut params = Vec::new();
        for param in active_children(params_node) {
            match param.kind {
                NodeKind::Symbol => params.push((param.text.clone(), "int32".to_string())),
                NodeKind::List => {
                    let pair = active_children(param);
                    let shape_ok = pair.len() == 2
                        && pair[0].kind == NodeKind::Symbol
                        && pair[1].kind == NodeKind::Keyword;
                    if !shape_ok {
                        return Err(err_node(
                            "CODEGEN034",
                            "parameter must be a symbol or a (symbol :type) pair",
                            param,
                        ));
                    }
                    params.push((pair[0].text.clone(), pair[1].text[1..].to_string()));
                }
                _ => {
                    return Err(err_node(
                        "CODEGEN034",
                        "parameter must be a symbol or a (symbol :type) pair",
                        param,
                    ))
                }
            }
        }

        let body: Vec<Node> = kids[4..].iter().map(|n| (*n).clone()).collect();
        self.state
            .ret_types
            .insert(name_node.text.clone(), ret.clone());
        self.state.funcs.insert(
            name_node.text.clone(),
            FuncDef {
                params,
                ret,
                body,
                materialized: None,
            },
        );
        Ok(())
    }

    /// 記録済み関数の呼び出し。未実体化ならここで実体化する。
    fn emit_call(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<Option<LoweredValue>> {
        let name = kids[0].text.clone();
        let id = match self.state.funcs.get(&name).and_then(|f| f.materialized) {
            Some(id) => id,
            None => self.materialize(&name, node)?,
        };

        let def = self.state.funcs.get(&name).cloned().ok_or_else(|| {
            err_node("CODEGEN045", format!("Unknown function: {}", name), node)
        })?;
        let args = &kids[1..];
        if args.len() != def.params.len() {
            return Err(err_node(
                "CODEGEN040",
                format!(
                    "Function {} expects {} arguments, got {}",
                    name,
                    def.params.len(),
                    args.len()
                ),
                node,
            ));
        }

        let mut lowered_args = Vec::with_capacity(args.len());
        for (arg, (_, pty)) in args.iter().zip(&def.params) {
            let lowered = self.emit_expr(b, arg)?.ok_or_else(|| {
                err_node("CODEGEN041", "Argument expression yields no value", arg)
            })?;
            let spec = self.resolve_ty(pty, arg)?;
            lowered_args.push(self.coerce(b, lowered, &spec, arg)?);
        }

        let func_ref = self.module.declare_func_in_func(id, b.func);
        let call = b.ins().call(func_ref, &lowered_args);

        // 戻り値の型名は独立した戻り値表から引く
        let ret = self
            .state
            .ret_types
            .get(&name)
            .cloned()
            .unwrap_or_else(|| def.ret.clone());
        if ret == "void" {
            return Ok(None);
        }
        let results = b.inst_results(call);
        let value = *results.first().ok_or_else(|| {
            err_node(
                "CODEGEN046",
                format!("Function {} returns no value", name),
                node,
            )
        })?;
        Ok(Some(LoweredValue::new(value, ret)))
    }

    /// 関数を IR として実体化する。再帰に備えて本体の下降前に
    /// `FuncId` を登録する。
    fn materialize(&mut self, name: &str, site: &Node) -> CompileResult<FuncId> {
        let def = self.state.funcs.get(name).cloned().ok_or_else(|| {
            err_node("CODEGEN045", format!("Unknown function: {}", name), site)
        })?;

        let mut param_specs = Vec::with_capacity(def.params.len());
        for (pname, pty) in &def.params {
            let spec = self.resolve_ty(pty, site)?;
            if spec.clif(self.ptr_ty).is_none() {
                return Err(err_node(
                    "CODEGEN042",
                    format!("Parameter {} of {} has unsupported type {}", pname, name, pty),
                    site,
                ));
            }
            param_specs.push(spec);
        }
        let ret_spec = self.resolve_ty(&def.ret, site)?;
        if ret_spec != TypeSpec::Void && ret_spec.clif(self.ptr_ty).is_none() {
            return Err(err_node(
                "CODEGEN042",
                format!("Return type {} of {} is unsupported", def.ret, name),
                site,
            ));
        }

        let mut sig = self.module.make_signature();
        for spec in &param_specs {
            sig.params
                .push(AbiParam::new(spec.clif(self.ptr_ty).unwrap_or(types::I32)));
        }
        if ret_spec != TypeSpec::Void {
            sig.returns
                .push(AbiParam::new(ret_spec.clif(self.ptr_ty).unwrap_or(types::F64)));
        }

        let id = self
            .module
            .declare_function(name, Linkage::Export, &sig)
            .map_err(|e| err_node("CODEGEN043", e.to_string(), site))?;
        if let Some(entry) = self.state.funcs.get_mut(name) {
            entry.materialized = Some(id);
        }

        let mut ctx = self.module.make_context();
        ctx.func = Function::with_name_signature(UserFuncName::testcase(name), sig);
        let mut fb_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            for (idx, ((pname, pty), spec)) in def.params.iter().zip(&param_specs).enumerate() {
                let incoming = builder.block_params(entry)[idx];
                if matches!(spec, TypeSpec::Ptr(_)) {
                    // ポインタ引数は呼び出し元の記憶域をそのまま束縛する
                    self.state.vars.insert(
                        pname.clone(),
                        VarBinding {
                            slot: incoming,
                            ty: pty.clone(),
                            by_ref: true,
                        },
                    );
                } else {
                    let size = spec.size_bytes(self.ptr_ty, &self.state.records, site.line, site.column)?;
                    let align =
                        spec.align_bytes(self.ptr_ty, &self.state.records, site.line, site.column)?;
                    let slot = self.alloc_slot(&mut builder, size, align);
                    builder.ins().store(MemFlags::new(), incoming, slot, 0);
                    self.state.vars.insert(
                        pname.clone(),
                        VarBinding {
                            slot,
                            ty: pty.clone(),
                            by_ref: false,
                        },
                    );
                }
            }

            let mut last = None;
            for expr in &def.body {
                last = self.emit_expr(&mut builder, expr)?;
            }

            if ret_spec == TypeSpec::Void {
                builder.ins().return_(&[]);
            } else {
                let lowered = last.ok_or_else(|| {
                    err_node(
                        "CODEGEN044",
                        format!("Function {} body yields no value", name),
                        site,
                    )
                })?;
                let value = self.coerce(&mut builder, lowered, &ret_spec, site)?;
                builder.ins().return_(&[value]);
            }
            builder.finalize();
        }

        self.module
            .define_function(id, &mut ctx)
            .map_err(|e| err_node("CODEGEN043", e.to_string(), site))?;
        self.state.dumps.push(ctx.func.display().to_string());
        Ok(id)
    }

    /// `=` の 3 形態: リテラル代入・レコード構築・フィールド代入。
    fn emit_assign(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<Option<LoweredValue>> {
        match kids.len() {
            4 => self.emit_literal_assign(b, node, kids).map(Some),
            3 => match kids[1].kind {
                NodeKind::Symbol => {
                    self.emit_record_construction(b, kids)?;
                    Ok(None)
                }
                NodeKind::List => self.emit_field_assign(b, kids).map(Some),
                _ => Err(err_node(
                    "CODEGEN052",
                    "Assignment target must be a symbol or an lvalue expression",
                    kids[1],
                )),
            },
            _ => Err(err_node(
                "CODEGEN058",
                "= expects a target, a type and a value, or a record form",
                node,
            )),
        }
    }

    /// `(= target :type value)` — 宣言型付きの代入。
    fn emit_literal_assign(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        let target = kids[1];
        let ty_name = keyword_name(kids[2], "assignment type")?.to_string();
        let spec = self.resolve_ty(&ty_name, kids[2])?;

        let lowered = self.emit_value_with_hint(b, kids[3], &ty_name)?.ok_or_else(|| {
            err_node("CODEGEN051", "Assignment value yields no value", kids[3])
        })?;
        let value = self.coerce(b, lowered, &spec, kids[3])?;

        match target.kind {
            NodeKind::Symbol => {
                let slot = self.ensure_slot(b, target, &ty_name, &spec)?;
                b.ins().store(MemFlags::new(), value, slot, 0);
            }
            NodeKind::List => {
                let (ptr, _) = self.emit_lvalue(b, target)?;
                b.ins().store(MemFlags::new(), value, ptr, 0);
            }
            _ => {
                return Err(err_node(
                    "CODEGEN052",
                    "Assignment target must be a symbol or an lvalue expression",
                    node,
                ))
            }
        }
        Ok(LoweredValue::new(value, ty_name))
    }

    /// `(= target (Record (f1 f2 …)))` — レコードの構築と束縛。
    fn emit_record_construction(
        &mut self,
        b: &mut FunctionBuilder,
        kids: &[&Node],
    ) -> CompileResult<()> {
        let target = kids[1];
        let ctor = kids[2];
        if ctor.kind != NodeKind::List {
            return Err(err_node(
                "CODEGEN053",
                "Expected a record construction form",
                ctor,
            ));
        }
        let ctor_kids = active_children(ctor);
        let shape_ok = ctor_kids.len() == 2
            && ctor_kids[0].kind == NodeKind::Symbol
            && matches!(ctor_kids[1].kind, NodeKind::List | NodeKind::Vector);
        if !shape_ok {
            return Err(err_node(
                "CODEGEN053",
                "Expected a record construction form",
                ctor,
            ));
        }

        let record_name = ctor_kids[0].text.clone();
        let layout = lookup_record(
            &record_name,
            &self.state.records,
            ctor_kids[0].line,
            ctor_kids[0].column,
        )?
        .clone();
        let field_nodes = active_children(ctor_kids[1]);
        if field_nodes.len() != layout.fields.len() {
            return Err(err_node(
                "CODEGEN054",
                format!(
                    "Record {} expects {} fields, got {}",
                    record_name,
                    layout.fields.len(),
                    field_nodes.len()
                ),
                ctor,
            ));
        }

        // まず各フィールド値を下降させ、宣言型へ合わせる
        let mut values = Vec::with_capacity(field_nodes.len());
        for (field_node, (_, field_ty)) in field_nodes.iter().zip(&layout.fields) {
            let lowered = self.emit_expr(b, field_node)?.ok_or_else(|| {
                err_node("CODEGEN051", "Record field yields no value", field_node)
            })?;
            let spec = self.resolve_ty(field_ty, field_node)?;
            values.push(self.coerce(b, lowered, &spec, field_node)?);
        }

        let (offsets, size) = record_placement(
            &record_name,
            &self.state.records,
            self.ptr_ty,
            ctor.line,
            ctor.column,
        )?;
        let record_spec = TypeSpec::Record(record_name.clone());
        let align =
            record_spec.align_bytes(self.ptr_ty, &self.state.records, ctor.line, ctor.column)?;
        let slot = self.alloc_slot(b, size, align);
        for (value, offset) in values.iter().zip(&offsets) {
            b.ins().store(MemFlags::new(), *value, slot, *offset as i32);
        }

        self.state.vars.insert(
            target.text.clone(),
            VarBinding {
                slot,
                ty: record_name,
                by_ref: false,
            },
        );
        Ok(())
    }

    /// `(= (. target :field) value)` — フィールドへの代入。
    /// 値の IR 型はフィールドの宣言型と一致しなければならない。
    fn emit_field_assign(
        &mut self,
        b: &mut FunctionBuilder,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        let target = kids[1];
        let tkids = active_children(target);
        let shape_ok = tkids.len() == 3
            && tkids[0].kind == NodeKind::Symbol
            && tkids[0].text == "."
            && tkids[1].kind == NodeKind::Symbol
            && tkids[2].kind == NodeKind::Keyword;
        if !shape_ok {
            return Err(err_node(
                "CODEGEN055",
                "Expected a record field assignment target",
                target,
            ));
        }

        let (addr, field_ty) = self.field_address(b, tkids[1], tkids[2])?;
        let field_spec = self.resolve_ty(&field_ty, tkids[2])?;

        let lowered = self.emit_expr(b, kids[2])?.ok_or_else(|| {
            err_node("CODEGEN051", "Assignment value yields no value", kids[2])
        })?;
        let expected = field_spec.clif(self.ptr_ty).ok_or_else(|| {
            err_node(
                "CODEGEN057",
                format!("Field type {} cannot be stored", field_ty),
                tkids[2],
            )
        })?;
        let actual = b.func.dfg.value_type(lowered.value);
        if actual != expected {
            return Err(err_node(
                "CODEGEN057",
                format!(
                    "Field {} expects type {}, got {}",
                    &tkids[2].text[1..],
                    field_ty,
                    lowered.ty
                ),
                kids[2],
            ));
        }

        b.ins().store(MemFlags::new(), lowered.value, addr, 0);
        Ok(LoweredValue::new(lowered.value, field_ty))
    }

    /// `(put target :type value)` — ポインタ越しの格納。
    fn emit_put(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        if kids.len() != 4 {
            return Err(err_node(
                "CODEGEN060",
                "put expects a target, a type and a value",
                node,
            ));
        }
        let ty_name = keyword_name(kids[2], "put type")?.to_string();
        let spec = self.resolve_ty(&ty_name, kids[2])?;

        let ptr = match kids[1].kind {
            NodeKind::Symbol => {
                let lowered = self.emit_symbol(b, kids[1])?;
                if !lowered.ty.ends_with('*') {
                    return Err(err_node(
                        "CODEGEN061",
                        format!(
                            "put target must be a pointer, {} has type {}",
                            kids[1].text, lowered.ty
                        ),
                        kids[1],
                    ));
                }
                lowered.value
            }
            NodeKind::List => self.emit_lvalue(b, kids[1])?.0,
            _ => {
                return Err(err_node(
                    "CODEGEN062",
                    "put target must be a symbol or an lvalue expression",
                    kids[1],
                ))
            }
        };

        let lowered = self.emit_value_with_hint(b, kids[3], &ty_name)?.ok_or_else(|| {
            err_node("CODEGEN051", "put value yields no value", kids[3])
        })?;
        let value = self.coerce(b, lowered, &spec, kids[3])?;
        b.ins().store(MemFlags::new(), value, ptr, 0);
        Ok(LoweredValue::new(value, ty_name))
    }

    /// `(ref x)` — 変数の格納場所をポインタとして得る。
    fn emit_ref(&mut self, node: &Node, kids: &[&Node]) -> CompileResult<LoweredValue> {
        if kids.len() != 2 {
            return Err(err_node("CODEGEN063", "ref expects a symbol", node));
        }
        if kids[1].kind != NodeKind::Symbol {
            return Err(err_node(
                "CODEGEN064",
                format!("ref expects a symbol, got {}", kids[1].kind.name()),
                kids[1],
            ));
        }
        let binding = self.lookup_var(kids[1])?;
        // by-ref 束縛はスロット自体がポインタなので型名はそのまま
        let ty = if binding.by_ref {
            binding.ty
        } else {
            format!("{}*", binding.ty)
        };
        Ok(LoweredValue::new(binding.slot, ty))
    }

    /// `(deref p)` — ポインタ越しの読み出し。
    fn emit_deref(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        if kids.len() != 2 {
            return Err(err_node("CODEGEN065", "deref expects a pointer", node));
        }

        let (ptr, pointee_name) = if kids[1].kind == NodeKind::Symbol {
            let lowered = self.emit_symbol(b, kids[1])?;
            let Some(pointee) = lowered.ty.strip_suffix('*') else {
                return Err(err_node(
                    "CODEGEN066",
                    format!(
                        "Cannot dereference non-pointer {} of type {}",
                        kids[1].text, lowered.ty
                    ),
                    kids[1],
                ));
            };
            (lowered.value, pointee.to_string())
        } else {
            let lowered = self.emit_expr(b, kids[1])?.ok_or_else(|| {
                err_node("CODEGEN065", "deref expects a pointer", kids[1])
            })?;
            let pointee = match lowered.ty.strip_suffix('*') {
                Some(p) => p.to_string(),
                None => kids[1].type_hint().unwrap_or("int32").to_string(),
            };
            (lowered.value, pointee)
        };

        let spec = self.resolve_ty(&pointee_name, node)?;
        let clif = spec.clif(self.ptr_ty).ok_or_else(|| {
            err_node(
                "CODEGEN067",
                format!("Cannot load a value of type {}", pointee_name),
                node,
            )
        })?;
        let value = b.ins().load(clif, MemFlags::new(), ptr, 0);
        Ok(LoweredValue::new(value, pointee_name))
    }

    /// `(. target :field)` — フィールドの読み出し。
    fn emit_field_access(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        if kids.len() != 3 || kids[1].kind != NodeKind::Symbol {
            return Err(err_node(
                "CODEGEN068",
                ". expects a record variable and a field keyword",
                node,
            ));
        }
        let (addr, field_ty) = self.field_address(b, kids[1], kids[2])?;
        let spec = self.resolve_ty(&field_ty, kids[2])?;
        let clif = spec.clif(self.ptr_ty).ok_or_else(|| {
            err_node(
                "CODEGEN067",
                format!("Cannot load a value of type {}", field_ty),
                kids[2],
            )
        })?;
        let value = b.ins().load(clif, MemFlags::new(), addr, 0);
        Ok(LoweredValue::new(value, field_ty))
    }

    /// レコード変数とフィールドキーワードから、フィールドの実アドレスと
    /// 宣言型名を計算する。
    fn field_address(
        &mut self,
        b: &mut FunctionBuilder,
        var_node: &Node,
        field_node: &Node,
    ) -> CompileResult<(Value, String)> {
        let field = keyword_name(field_node, "field")?.to_string();
        let binding = self.lookup_var(var_node)?;
        if !self.state.records.contains_key(&binding.ty) {
            return Err(err_node(
                "CODEGEN002",
                format!(
                    "Variable {} of type {} is not a record",
                    var_node.text, binding.ty
                ),
                var_node,
            ));
        }
        let layout = lookup_record(
            &binding.ty,
            &self.state.records,
            var_node.line,
            var_node.column,
        )?;
        let index = layout.field_index(&field).ok_or_else(|| {
            err_node(
                "CODEGEN056",
                format!("Field {} is not a member of record {}", field, binding.ty),
                field_node,
            )
        })?;
        let field_ty = layout.fields[index].1.clone();
        let (offsets, _) = record_placement(
            &binding.ty,
            &self.state.records,
            self.ptr_ty,
            var_node.line,
            var_node.column,
        )?;
        let addr = b.ins().iadd_imm(binding.slot, offsets[index] as i64);
        Ok((addr, field_ty))
    }

    /// 代入対象のリスト式をポインタ値へ下降させる。
    fn emit_lvalue(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
    ) -> CompileResult<(Value, String)> {
        let kids = active_children(node);
        if let Some(head) = kids.first() {
            if head.kind == NodeKind::Symbol {
                match head.text.as_str() {
                    "deref" if kids.len() == 2 => {
                        // (deref p) を左辺値として使うときはポインタ p 自体が対象
                        let lowered = self.emit_expr(b, kids[1])?.ok_or_else(|| {
                            err_node("CODEGEN065", "deref expects a pointer", kids[1])
                        })?;
                        let Some(pointee) = lowered.ty.strip_suffix('*') else {
                            return Err(err_node(
                                "CODEGEN070",
                                format!("Lvalue must be pointer-typed, got {}", lowered.ty),
                                node,
                            ));
                        };
                        return Ok((lowered.value, pointee.to_string()));
                    }
                    "." if kids.len() == 3 && kids[1].kind == NodeKind::Symbol => {
                        return self.field_address(b, kids[1], kids[2]);
                    }
                    _ => {}
                }
            }
        }

        let lowered = self.emit_expr(b, node)?.ok_or_else(|| {
            err_node("CODEGEN070", "Lvalue expression yields no value", node)
        })?;
        let Some(pointee) = lowered.ty.strip_suffix('*') else {
            return Err(err_node(
                "CODEGEN070",
                format!("Lvalue must be pointer-typed, got {}", lowered.ty),
                node,
            ));
        };
        Ok((lowered.value, pointee.to_string()))
    }

    /// `(while test body)` — 条件・本体・後続の 3 ブロック構成。値は `float64 0`。
    fn emit_while(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        if kids.len() != 3 {
            return Err(err_node(
                "CODEGEN071",
                "while expects a test and a body",
                node,
            ));
        }

        let cond_block = b.create_block();
        let body_block = b.create_block();
        let after_block = b.create_block();

        b.ins().jump(cond_block, &[]);
        b.switch_to_block(cond_block);
        let test = self.emit_expr(b, kids[1])?.ok_or_else(|| {
            err_node("CODEGEN072", "while test yields no value", kids[1])
        })?;
        let cond = self.nonzero(b, test, kids[1])?;
        b.ins().brif(cond, body_block, &[], after_block, &[]);
        b.seal_block(body_block);
        b.seal_block(after_block);

        b.switch_to_block(body_block);
        self.emit_expr(b, kids[2])?;
        b.ins().jump(cond_block, &[]);
        b.seal_block(cond_block);

        b.switch_to_block(after_block);
        let zero = b.ins().f64const(0.0);
        Ok(LoweredValue::new(zero, "float64"))
    }

    /// `(cond clause…)` — 節ごとの分岐を連ね、`float64` の φ で合流する。
    fn emit_cond(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        let clauses = &kids[1..];
        if clauses.is_empty() {
            return Err(err_node(
                "CODEGEN074",
                "cond expects at least one clause",
                node,
            ));
        }

        let join = b.create_block();
        let phi = b.append_block_param(join, types::F64);
        let mut terminated = false;

        for clause in clauses {
            if clause.kind != NodeKind::List {
                return Err(err_node(
                    "CODEGEN075",
                    format!("cond clause must be a list, got {}", clause.kind.name()),
                    clause,
                ));
            }
            let ckids = active_children(clause);
            if ckids.is_empty() || ckids.len() > 2 {
                return Err(err_node(
                    "CODEGEN076",
                    "cond clause expects a test and an expression",
                    clause,
                ));
            }

            // 単独子の節と else 節は連鎖を打ち切る無条件分岐
            let unconditional = ckids.len() == 1
                || (ckids[0].kind == NodeKind::Symbol && ckids[0].text == "else");
            let body_node = ckids[ckids.len() - 1];
            let clause_block = b.create_block();

            if unconditional {
                b.ins().jump(clause_block, &[]);
                b.seal_block(clause_block);
                b.switch_to_block(clause_block);
                let value = self.clause_value(b, body_node)?;
                b.ins().jump(join, &[value]);
                terminated = true;
                break;
            }

            let next_dispatch = b.create_block();
            let test = self.emit_expr(b, ckids[0])?.ok_or_else(|| {
                err_node("CODEGEN077", "cond test yields no value", ckids[0])
            })?;
            let cond = self.nonzero(b, test, ckids[0])?;
            b.ins().brif(cond, clause_block, &[], next_dispatch, &[]);
            b.seal_block(clause_block);
            b.seal_block(next_dispatch);

            b.switch_to_block(clause_block);
            let value = self.clause_value(b, body_node)?;
            b.ins().jump(join, &[value]);

            b.switch_to_block(next_dispatch);
        }

        if !terminated {
            // すべての節が不成立のまま尽きた場合は 0.0 で合流する
            let fallback = b.ins().f64const(0.0);
            b.ins().jump(join, &[fallback]);
        }

        b.seal_block(join);
        b.switch_to_block(join);
        Ok(LoweredValue::new(phi, "float64"))
    }

    /// 節本体を下降させて `float64` へ揃える。
    fn clause_value(&mut self, b: &mut FunctionBuilder, node: &Node) -> CompileResult<Value> {
        let lowered = self.emit_expr(b, node)?.ok_or_else(|| {
            err_node("CODEGEN077", "cond clause yields no value", node)
        })?;
        self.to_float64(b, lowered, node)
    }

    /// 二項演算子。浮動小数が混じれば `float64`、整数同士なら広い幅へ昇格。
    fn emit_operator(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        kids: &[&Node],
    ) -> CompileResult<LoweredValue> {
        if kids.len() != 3 {
            return Err(err_node("CODEGEN080", "Expected two operands", node));
        }
        let op = kids[0].text.as_str();
        let lhs = self.emit_expr(b, kids[1])?.ok_or_else(|| {
            err_node("CODEGEN081", "Operand yields no value", kids[1])
        })?;
        let rhs = self.emit_expr(b, kids[2])?.ok_or_else(|| {
            err_node("CODEGEN081", "Operand yields no value", kids[2])
        })?;

        let lspec = self.resolve_ty(&lhs.ty, kids[1])?;
        let rspec = self.resolve_ty(&rhs.ty, kids[2])?;

        if lspec.is_float() || rspec.is_float() {
            let l = self.to_float64(b, lhs, kids[1])?;
            let r = self.to_float64(b, rhs, kids[2])?;
            let value = match op {
                "+" => b.ins().fadd(l, r),
                "-" => b.ins().fsub(l, r),
                "*" => b.ins().fmul(l, r),
                "/" => b.ins().fdiv(l, r),
                _ => {
                    let cc = float_cc(op);
                    let cmp = b.ins().fcmp(cc, l, r);
                    // 浮動小数比較は 0/1 を float64 へ広げて返す
                    let wide = b.ins().uextend(types::I32, cmp);
                    b.ins().fcvt_from_sint(types::F64, wide)
                }
            };
            return Ok(LoweredValue::new(value, "float64"));
        }

        let (Some(lw), Some(rw)) = (lspec.int_width(), rspec.int_width()) else {
            return Err(err_node(
                "CODEGEN082",
                format!("Operator {} cannot be applied to {} and {}", op, lhs.ty, rhs.ty),
                node,
            ));
        };
        let width = lw.max(rw);
        let target = match width {
            8 => types::I8,
            16 => types::I16,
            32 => types::I32,
            _ => types::I64,
        };
        let l = if lw < width {
            b.ins().sextend(target, lhs.value)
        } else {
            lhs.value
        };
        let r = if rw < width {
            b.ins().sextend(target, rhs.value)
        } else {
            rhs.value
        };

        match op {
            "+" => Ok(LoweredValue::new(b.ins().iadd(l, r), int_name(width))),
            "-" => Ok(LoweredValue::new(b.ins().isub(l, r), int_name(width))),
            "*" => Ok(LoweredValue::new(b.ins().imul(l, r), int_name(width))),
            "/" => Ok(LoweredValue::new(b.ins().sdiv(l, r), int_name(width))),
            _ => {
                // 整数比較は 1 ビット述語（i8 の 0/1）をそのまま返す
                let cc = int_cc(op);
                Ok(LoweredValue::new(b.ins().icmp(cc, l, r), "int8"))
            }
        }
    }

    /// リテラル代入の値ノードに宣言型のヒントを運ぶ。
    fn emit_value_with_hint(
        &mut self,
        b: &mut FunctionBuilder,
        node: &Node,
        ty_name: &str,
    ) -> CompileResult<Option<LoweredValue>> {
        if matches!(node.kind, NodeKind::Int | NodeKind::Float) {
            let hinted = node.clone().with_type_hint(ty_name);
            return self.emit_expr(b, &hinted);
        }
        self.emit_expr(b, node)
    }

    /// 変数スロットの再利用または新規確保。同じ型での再束縛は同じ
    /// スロットへ書き戻す。
    fn ensure_slot(
        &mut self,
        b: &mut FunctionBuilder,
        target: &Node,
        ty_name: &str,
        spec: &TypeSpec,
    ) -> CompileResult<Value> {
        if let Some(existing) = self.state.vars.get(&target.text) {
            if existing.ty == ty_name && !existing.by_ref {
                return Ok(existing.slot);
            }
        }
        let size = spec.size_bytes(self.ptr_ty, &self.state.records, target.line, target.column)?;
        let align =
            spec.align_bytes(self.ptr_ty, &self.state.records, target.line, target.column)?;
        let slot = self.alloc_slot(b, size, align);
        self.state.vars.insert(
            target.text.clone(),
            VarBinding {
                slot,
                ty: ty_name.to_string(),
                by_ref: false,
            },
        );
        Ok(slot)
    }

    /// 値を目標型へ変換する。符号付き拡張・切り詰め・整数と浮動小数の
    /// 相互変換、および同型・ポインタ同士の素通しをサポートする。
    fn coerce(
        &mut self,
        b: &mut FunctionBuilder,
        lowered: LoweredValue,
        target: &TypeSpec,
        node: &Node,
    ) -> CompileResult<Value> {
        let from = self.resolve_ty(&lowered.ty, node)?;
        if &from == target {
            return Ok(lowered.value);
        }
        match (&from, target) {
            (f, t) if f.is_int() && t.is_int() => {
                let (fw, tw) = (f.int_width().unwrap_or(32), t.int_width().unwrap_or(32));
                let clif = t.clif(self.ptr_ty).unwrap_or(types::I32);
                if fw < tw {
                    Ok(b.ins().sextend(clif, lowered.value))
                } else if fw > tw {
                    Ok(b.ins().ireduce(clif, lowered.value))
                } else {
                    Ok(lowered.value)
                }
            }
            (f, TypeSpec::F64) if f.is_int() => Ok(self.int_to_float(b, lowered.value, &from, types::F64)),
            (f, TypeSpec::F32) if f.is_int() => Ok(self.int_to_float(b, lowered.value, &from, types::F32)),
            (TypeSpec::F32, TypeSpec::F64) => Ok(b.ins().fpromote(types::F64, lowered.value)),
            (TypeSpec::F64, TypeSpec::F32) => Ok(b.ins().fdemote(types::F32, lowered.value)),
            (f, t) if f.is_float() && t.is_int() => {
                let clif = t.clif(self.ptr_ty).unwrap_or(types::I32);
                Ok(b.ins().fcvt_to_sint(clif, lowered.value))
            }
            (TypeSpec::Ptr(_), TypeSpec::Ptr(_)) => Ok(lowered.value),
            (_, t) => Err(err_node(
                "CODEGEN083",
                format!("Cannot convert {} to {}", lowered.ty, t),
                node,
            )),
        }
    }

    /// 小さい整数を広げてから浮動小数へ変換する。
    fn int_to_float(
        &mut self,
        b: &mut FunctionBuilder,
        value: Value,
        from: &TypeSpec,
        target: Type,
    ) -> Value {
        let widened = if from.int_width().unwrap_or(32) < 32 {
            b.ins().sextend(types::I32, value)
        } else {
            value
        };
        b.ins().fcvt_from_sint(target, widened)
    }

    /// 任意の数値を `float64` へ揃える。整数は符号拡張して変換する。
    pub(crate) fn to_float64(
        &mut self,
        b: &mut FunctionBuilder,
        lowered: LoweredValue,
        node: &Node,
    ) -> CompileResult<Value> {
        let spec = self.resolve_ty(&lowered.ty, node)?;
        match spec {
            TypeSpec::F64 => Ok(lowered.value),
            TypeSpec::F32 => Ok(b.ins().fpromote(types::F64, lowered.value)),
            ref s if s.is_int() => Ok(self.int_to_float(b, lowered.value, s, types::F64)),
            _ => Err(err_node(
                "CODEGEN078",
                format!("Cannot convert {} to float64", lowered.ty),
                node,
            )),
        }
    }

    /// 値の非ゼロ判定。浮動小数は 0.0 との比較、整数は 0 との比較。
    fn nonzero(
        &mut self,
        b: &mut FunctionBuilder,
        lowered: LoweredValue,
        node: &Node,
    ) -> CompileResult<Value> {
        let spec = self.resolve_ty(&lowered.ty, node)?;
        match spec {
            TypeSpec::F64 => {
                let zero = b.ins().f64const(0.0);
                Ok(b.ins().fcmp(FloatCC::NotEqual, lowered.value, zero))
            }
            TypeSpec::F32 => {
                let zero = b.ins().f32const(0.0);
                Ok(b.ins().fcmp(FloatCC::NotEqual, lowered.value, zero))
            }
            ref s if s.is_int() || matches!(s, TypeSpec::Ptr(_)) => {
                Ok(b.ins().icmp_imm(IntCC::NotEqual, lowered.value, 0))
            }
            _ => Err(err_node(
                "CODEGEN073",
                format!("Test expression must be numeric, got {}", lowered.ty),
                node,
            )),
        }
    }
}

fn int_cc(op: &str) -> IntCC {
    match op {
        "==" => IntCC::Equal,
        "!=" => IntCC::NotEqual,
        "<" => IntCC::SignedLessThan,
        "<=" => IntCC::SignedLessThanOrEqual,
        ">" => IntCC::SignedGreaterThan,
        _ => IntCC::SignedGreaterThanOrEqual,
    }
}

fn float_cc(op: &str) -> FloatCC {
    match op {
        "==" => FloatCC::Equal,
        "!=" => FloatCC::NotEqual,
        "<" => FloatCC::LessThan,
        "<=" => FloatCC::LessThanOrEqual,
        ">" => FloatCC::GreaterThan,
        _ => FloatCC::GreaterThanOrEqual,
    }
}
