// パス: src/errors.rs
// 役割: 診断レコードと各レイヤーのエラー型を集約する
// 意図: 読取・コード生成・実行を横断して一貫した診断書式を提供する
// 関連ファイル: src/reader.rs, src/engine/emit.rs, src/engine/mod.rs
//! エラー表現モジュール
//!
//! - 共有フォーマットの `Diagnostic` を中心に位置メタデータを保持する。
//! - 読取層 (`ParseError`) とコード生成層 (`CompileError`) は薄いラッパーとして公開する。
//! - `run` 境界では `EngineError` に束ね、CLI 側で終了コードへ変換する。
//! - 表示書式は `<path>(<line>,<col>) : error: <message>` に固定し、
//!   対象ノードがあれば `Node:` 行を後置する。デバッグビルドでは発生元の
//!   Rust ソース位置を `#[track_caller]` で記録する。

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone)]
/// エラーコード・本文・ソース位置・対象ノードを保持する基礎レコード。
pub struct Diagnostic {
    pub code: &'static str,
    pub msg: String,
    pub line: usize,
    pub col: usize,
    /// 対象ノードの整形済みテキスト（無ければ `Node:` 行は省略）。
    pub node: Option<String>,
    /// この診断を生成したエンジン側ソース位置（デバッグビルドのみ）。
    #[cfg(debug_assertions)]
    pub origin: &'static std::panic::Location<'static>,
}

impl Diagnostic {
    /// コード・本文・ソース位置から診断を初期化する。
    #[track_caller]
    pub fn at(code: &'static str, msg: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            code,
            msg: msg.into(),
            line,
            col,
            node: None,
            #[cfg(debug_assertions)]
            origin: std::panic::Location::caller(),
        }
    }

    /// 対象ノードの整形テキストを付与してチェーン可能にする。
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// ソースファイルパスを含む最終書式へ整形する。
    pub fn render(&self, path: &str) -> String {
        let mut out = format!("{}({},{}) : error: {}", path, self.line, self.col, self.msg);
        if let Some(node) = &self.node {
            out.push_str("\nNode: ");
            out.push_str(node);
        }
        #[cfg(debug_assertions)]
        {
            out.push_str(&format!(
                " [at {}:{}]",
                self.origin.file(),
                self.origin.line()
            ));
        }
        out
    }
}

/// パス抜きの書式（`(line,col) : error: msg`）で文字列化する。
impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}) : error: {}", self.line, self.col, self.msg)?;
        if let Some(node) = &self.node {
            write!(f, "\nNode: {}", node)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// EDN 読取で報告されるエラー型。
pub struct ParseError(pub Box<Diagnostic>);

impl ParseError {
    /// コードと位置を指定して読取エラーを作成する。
    #[track_caller]
    pub fn at(code: &'static str, msg: impl Into<String>, line: usize, col: usize) -> Self {
        Self(Box::new(Diagnostic::at(code, msg, line, col)))
    }
}

/// `Display` 実装を `Diagnostic` へ委譲する。
impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
impl StdError for ParseError {}

#[derive(Debug, Clone)]
/// コード生成（型・名前・アリティ・形状の検査を含む）で用いるエラー型。
pub struct CompileError(pub Box<Diagnostic>);

impl CompileError {
    /// コードと位置を指定してコード生成エラーを作成する。
    #[track_caller]
    pub fn at(code: &'static str, msg: impl Into<String>, line: usize, col: usize) -> Self {
        Self(Box::new(Diagnostic::at(code, msg, line, col)))
    }

    /// 対象ノードの整形テキストを添えてコード生成エラーを作成する。
    #[track_caller]
    pub fn at_node(
        code: &'static str,
        msg: impl Into<String>,
        line: usize,
        col: usize,
        node: impl Into<String>,
    ) -> Self {
        Self(Box::new(Diagnostic::at(code, msg, line, col).with_node(node)))
    }
}

/// `CompileError` の表示実装を `Diagnostic` に委譲する。
impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
impl StdError for CompileError {}

/// `run` 境界で各レイヤーのエラーを束ねる型。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("Cranelift module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),
    #[error("host ISA error: {0}")]
    Host(String),
    #[error("JIT execution error: {0}")]
    Exec(String),
}

impl EngineError {
    /// ソースファイルパスを含む診断書式へ整形する。
    pub fn render(&self, path: &str) -> String {
        match self {
            EngineError::Parse(err) => err.0.render(path),
            EngineError::Compile(err) => err.0.render(path),
            other => format!("{} : error: {}", path, other),
        }
    }
}

/// コード生成結果を表す型。
pub type CompileResult<T> = Result<T, CompileError>;
