// パス: src/ast.rs
// 役割: EDN のトークンとノード木、および整形出力を定義する
// 意図: 読取結果をコード生成へ渡すための中立的な木構造を提供する
// 関連ファイル: src/lexer.rs, src/reader.rs, src/engine/emit.rs
//! EDN データモデル
//!
//! 目的:
//! - 字句解析のトークンと構文木ノードを 1 箇所で定義する。
//! - コレクション・タグ付きリテラル・破棄フォームを単一のノード型で表す。
//!
//! 設計ノート:
//! - ノードは種別判別子 + 子列の同種木。emitter 側の `match` が網羅的になる。
//! - `metadata` は短い属性名から文字列への小さな写像で、現状は
//!   リテラルへ解決済み型名を運ぶ `"type"` だけに使う。

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// 字句解析で識別されるトークンの分類。
pub enum TokenKind {
    /// 文字列リテラル本体（引用符は含まない）
    Str,
    /// 区切り以外のひとまとまり（シンボル・リテラル・タグ頭）
    Atom,
    /// `( ) [ ] { }` のいずれか 1 文字
    Paren,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// 生成されたトークンとその位置情報を保持するレコード。
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// 構文木ノードの種別。
pub enum NodeKind {
    Nil,
    Bool,
    Int,
    Float,
    Char,
    String,
    Symbol,
    Keyword,
    List,
    Vector,
    Map,
    Set,
    Tagged,
    Discard,
}

impl NodeKind {
    /// 形状エラーのメッセージで使う安定した種別名を返す。
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Nil => "Nil",
            NodeKind::Bool => "Bool",
            NodeKind::Int => "Int",
            NodeKind::Float => "Float",
            NodeKind::Char => "Char",
            NodeKind::String => "String",
            NodeKind::Symbol => "Symbol",
            NodeKind::Keyword => "Keyword",
            NodeKind::List => "List",
            NodeKind::Vector => "Vector",
            NodeKind::Map => "Map",
            NodeKind::Set => "Set",
            NodeKind::Tagged => "Tagged",
            NodeKind::Discard => "Discard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// 読取結果の木を構成するノード。
///
/// アトムは `text` にリテラル本文を持ち、コレクションとタグ付きフォームは
/// `children` に順序付きの子を持つ。`metadata` は下降時にのみ書き換えられる。
pub struct Node {
    pub kind: NodeKind,
    pub line: usize,
    pub column: usize,
    pub text: String,
    pub children: Vec<Node>,
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    /// 子を持たないノードを生成する。
    pub fn leaf(kind: NodeKind, line: usize, column: usize, text: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            column,
            text: text.into(),
            children: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// 子列を持つノードを生成する。
    pub fn branch(kind: NodeKind, line: usize, column: usize, children: Vec<Node>) -> Self {
        Self {
            kind,
            line,
            column,
            text: String::new(),
            children,
            metadata: BTreeMap::new(),
        }
    }

    /// 解決済み型名ヒントを読み出す。
    pub fn type_hint(&self) -> Option<&str> {
        self.metadata.get("type").map(String::as_str)
    }

    /// 解決済み型名ヒントを付与してチェーン可能にする。
    pub fn with_type_hint(mut self, ty: impl Into<String>) -> Self {
        self.metadata.insert("type".into(), ty.into());
        self
    }

    /// ノード木を複数行の EDN テキストへ整形する。
    pub fn pprint(&self) -> String {
        pprint(self, 0, true)
    }
}

/// `"` と `\` をエスケープし直して文字列本体を出力用に戻す。
fn escape_quotes(before: &str) -> String {
    let mut after = String::with_capacity(before.len() + 4);
    for ch in before.chars() {
        if ch == '"' || ch == '\\' {
            after.push('\\');
        }
        after.push(ch);
    }
    after
}

/// ノードを EDN テキストへ整形する。`indent` は子要素の字下げ幅。
pub fn pprint(node: &Node, indent: usize, multiline: bool) -> String {
    let prefix = " ".repeat(indent);

    match node.kind {
        NodeKind::List | NodeKind::Set | NodeKind::Vector | NodeKind::Map => {
            let mut vals = String::new();
            let mut i = 0;
            while i < node.children.len() {
                if !vals.is_empty() {
                    if multiline {
                        vals.push_str(&prefix);
                    } else {
                        vals.push(' ');
                    }
                }
                vals.push_str(&pprint(&node.children[i], indent + 1, multiline));
                if node.kind == NodeKind::Map {
                    // マップは 2 つずつキーと値を同じ行に並べる
                    if let Some(value) = node.children.get(i + 1) {
                        vals.push(' ');
                        vals.push_str(&pprint(value, 1, multiline));
                    }
                    i += 1;
                }
                if multiline && i + 1 < node.children.len() {
                    vals.push('\n');
                }
                i += 1;
            }

            match node.kind {
                NodeKind::List => format!("({})", vals),
                NodeKind::Vector => format!("[{}]", vals),
                NodeKind::Map => format!("{{{}}}", vals),
                _ => format!("#{{{}}}", vals),
            }
        }
        NodeKind::Tagged | NodeKind::Discard => match (node.children.first(), node.children.last())
        {
            (Some(tag), Some(value)) => format!(
                "#{} {}",
                pprint(tag, indent, multiline),
                pprint(value, indent, multiline)
            ),
            _ => node.text.clone(),
        },
        NodeKind::String => format!("\"{}\"", escape_quotes(&node.text)),
        _ => node.text.clone(),
    }
}

/// デバッグ向けの 1 行サマリ。リストは子のサマリを連結する。
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[type: {} value: '{}' line: {} col: {}]",
            self.kind.name(),
            self.text,
            self.line,
            self.column
        )?;
        if self.kind == NodeKind::List && !self.children.is_empty() {
            write!(f, " children: [")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
