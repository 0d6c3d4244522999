// パス: src/engine/mod.rs
// 役割: 実行エンジン本体。per-run の表と `calc` エントリの駆動を担う
// 意図: 読取 → 下降 → JIT 追加 → 呼び出し → 結果表示 の一連を束ねる
// 関連ファイル: src/engine/emit.rs, src/engine/types.rs, src/errors.rs
//! エンジンモジュール
//!
//! - `Engine::new` がホスト ISA を検出し、`run`/`eval` の呼び出しごとに
//!   新しい JIT モジュールを作って `calc() -> float64` を構築する。
//! - 変数・レコード・関数・戻り値型の各表は `run` の先頭で消去される。
//!   スコープは平坦で、関数本体へ入るときも同じ表へ引数を束縛し直す。
//! - トップレベルが値を生まなかった場合（`defn` や `struct` のみ）は、
//!   `main` が記録されていればそれを呼び、なければ 0 を返す。
//! - 実行は単一スレッド前提。並列に動かす場合はスレッドごとに
//!   エンジンを分けること。

pub mod emit;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use cranelift_codegen::ir::{
    types as clif, AbiParam, Function, InstBuilder, UserFuncName, Value,
};
use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, FuncId, Linkage, Module};

use crate::ast::{Node, NodeKind};
use crate::engine::emit::Emitter;
use crate::engine::types::RecordTable;
use crate::errors::EngineError;
use crate::reader::read;

#[derive(Debug, Clone)]
/// 変数 1 つ分の束縛。`slot` は格納場所を指すポインタ値。
///
/// 通常の束縛では `slot` が変数の記憶域を指し、値の読み書きはロードと
/// ストアになる。`by_ref` はポインタ型引数の束縛で、`slot` 自体が
/// 呼び出し元から渡されたポインタになる。
pub struct VarBinding {
    pub slot: Value,
    pub ty: String,
    pub by_ref: bool,
}

#[derive(Debug, Clone)]
/// `defn` が記録する関数 1 つ分の定義。IR 実体化は最初の呼び出し時。
pub struct FuncDef {
    pub params: Vec<(String, String)>,
    pub ret: String,
    pub body: Vec<Node>,
    pub materialized: Option<FuncId>,
}

/// 1 回の `run` の間だけ生きる表の集まり。
pub(crate) struct RunState {
    pub vars: HashMap<String, VarBinding>,
    pub records: RecordTable,
    pub funcs: HashMap<String, FuncDef>,
    pub ret_types: HashMap<String, String>,
    /// 実体化した関数の CLIF テキスト（IR ダンプ用）。
    pub dumps: Vec<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            vars: HashMap::new(),
            records: HashMap::new(),
            funcs: HashMap::new(),
            ret_types: HashMap::new(),
            dumps: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.vars.clear();
        self.records.clear();
        self.funcs.clear();
        self.ret_types.clear();
        self.dumps.clear();
    }
}

/// コンパイル済みプログラム。JIT が所有するコードの寿命を束ねる。
pub struct CompiledProgram {
    _module: JITModule,
    /// 実体化された全関数の CLIF テキスト。
    pub ir: String,
    entry: *const u8,
}

impl CompiledProgram {
    /// `calc` を呼び出して結果を返す。
    pub fn invoke(&self) -> f64 {
        let calc: extern "C" fn() -> f64 = unsafe { std::mem::transmute(self.entry) };
        calc()
    }
}

/// EDN ソースをコンパイル・実行するエンジン。
pub struct Engine {
    path: String,
    isa: Arc<dyn TargetIsa>,
    state: RunState,
}

impl Engine {
    /// ホストの ISA を検出してエンジンを初期化する。
    pub fn new(source_path: impl Into<String>) -> Result<Self, EngineError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| EngineError::Host(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| EngineError::Host(e.to_string()))?;
        flag_builder
            .set("opt_level", "none")
            .map_err(|e| EngineError::Host(e.to_string()))?;
        let isa_builder =
            cranelift_native::builder().map_err(|msg| EngineError::Host(msg.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| EngineError::Host(e.to_string()))?;

        Ok(Self {
            path: source_path.into(),
            isa,
            state: RunState::new(),
        })
    }

    /// ソースファイルパス（診断の整形に使う）。
    pub fn path(&self) -> &str {
        &self.path
    }

    /// コンパイルと実行を行い、IR ダンプと結果を標準出力へ印字する。
    /// 診断は標準エラーへ書き出した上で呼び出し元にも返す。
    pub fn run(&mut self, source: &str) -> Result<(), EngineError> {
        let compiled = match self.compile(source) {
            Ok(compiled) => compiled,
            Err(err) => {
                eprintln!("{}", err.render(&self.path));
                return Err(err);
            }
        };

        println!("\n===== Generated IR =====");
        println!("{}", compiled.ir);
        println!("========================\n");

        let value = compiled.invoke();
        println!("JIT result: {}", value);
        Ok(())
    }

    /// コンパイルと実行を行い、結果値だけを返す（印字なし）。
    pub fn eval(&mut self, source: &str) -> Result<f64, EngineError> {
        let compiled = self.compile(source)?;
        Ok(compiled.invoke())
    }

    /// ソースを読取・下降して `calc` を含むモジュールを確定する。
    fn compile(&mut self, source: &str) -> Result<CompiledProgram, EngineError> {
        self.state.clear();
        let root = read(source)?;

        let mut module = JITModule::new(JITBuilder::with_isa(
            self.isa.clone(),
            default_libcall_names(),
        ));
        let ptr_ty = module.isa().pointer_type();

        let mut sig = module.make_signature();
        sig.returns.push(AbiParam::new(clif::F64));
        let calc_id = module.declare_function("calc", Linkage::Export, &sig)?;

        let mut ctx = module.make_context();
        ctx.func = Function::with_name_signature(UserFuncName::testcase("calc"), sig);
        let mut fb_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let entry = builder.create_block();
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            let mut emitter = Emitter {
                module: &mut module,
                state: &mut self.state,
                ptr_ty,
            };

            let result = emitter.emit_expr(&mut builder, &root)?;
            let ret = match result {
                Some(lowered) => emitter.to_float64(&mut builder, lowered, &root)?,
                None => {
                    // トップレベルが定義だけなら main を探して呼ぶ
                    if emitter.state.funcs.contains_key("main") {
                        let call_main = Node::branch(
                            NodeKind::List,
                            root.line,
                            root.column,
                            vec![Node::leaf(
                                NodeKind::Symbol,
                                root.line,
                                root.column,
                                "main",
                            )],
                        );
                        match emitter.emit_expr(&mut builder, &call_main)? {
                            Some(lowered) => emitter.to_float64(&mut builder, lowered, &root)?,
                            None => builder.ins().f64const(0.0),
                        }
                    } else {
                        builder.ins().f64const(0.0)
                    }
                }
            };
            builder.ins().return_(&[ret]);
            builder.finalize();
        }

        module.define_function(calc_id, &mut ctx)?;
        self.state.dumps.push(ctx.func.display().to_string());
        module.clear_context(&mut ctx);

        module.finalize_definitions()?;
        let entry = module.get_finalized_function(calc_id);

        Ok(CompiledProgram {
            _module: module,
            ir: self.state.dumps.join("\n"),
            entry,
        })
    }
}
