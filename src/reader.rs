// パス: src/reader.rs
// 役割: トークン列から EDN ノード木を構築する再帰下降の読取器
// 意図: 先頭トークンの形でノード種別を決め、タグ・集合・破棄を特別扱いする
// 関連ファイル: src/lexer.rs, src/ast.rs, tests/edn_reader.rs
//! EDN 読取モジュール
//!
//! - アトムの分類は「nil → 真偽値 → 文字 → 整数 → 浮動小数 → キーワード →
//!   シンボル」の順で最初に受理した分類を採用する。
//! - `#tag value` はタグ付きノード、`#_` は破棄ノード、`#` 直後の `{}` は
//!   集合ノードへ畳み込む。
//! - 入力全体はひとつのトップレベルフォームであり、余剰トークンは読まない。

use std::collections::VecDeque;

use crate::ast::{Node, NodeKind, Token, TokenKind};
use crate::errors::ParseError;
use crate::lexer::lex;

/// シンボルに使用できる文字の全集合（大文字化した上で判定する）。
const SYMBOL_CHARS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ.*+!-_?$%&=:#/><;";

/// 空を許した 10 進数字列の判定。浮動小数の部分検査で使う。
fn digits_only(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit())
}

/// 整数リテラルの判定。符号は先頭 1 文字、`N`/`M` は末尾 1 文字まで許す。
fn valid_int(value: &str, allow_sign: bool) -> bool {
    let mut v = value;
    if allow_sign && v.len() > 1 && (v.starts_with('+') || v.starts_with('-')) {
        v = &v[1..];
    }
    if v.ends_with('N') || v.ends_with('M') {
        v = &v[..v.len() - 1];
    }
    !v.is_empty() && digits_only(v)
}

/// 浮動小数リテラルの判定。整数部付きの `.` が必須で、先頭ドットは不可。
fn valid_float(value: &str) -> bool {
    let upper = value.to_ascii_uppercase();
    let Some(dot) = upper.find('.') else {
        return false;
    };
    if dot == 0 {
        return false;
    }
    let front = &upper[..dot];
    let back = &upper[dot + 1..];
    if !valid_int(front, true) {
        return false;
    }
    if let Some(epos) = back.find('E') {
        if epos == back.len() - 1 {
            // 末尾の E は指数の数字を欠くため不正
            return false;
        }
        // 小数部に符号は許さず、指数部は符号付き整数を許す
        digits_only(&back[..epos]) && valid_int(&back[epos + 1..], true)
    } else {
        let frac = back.strip_suffix('M').unwrap_or(back);
        digits_only(frac)
    }
}

/// シンボルの判定。大文字化した本文が許容集合に収まり、先頭規則を満たすこと。
fn valid_symbol(value: &str) -> bool {
    let upper = value.to_ascii_uppercase();
    if upper.is_empty() {
        return false;
    }
    if !upper.chars().all(|c| SYMBOL_CHARS.contains(c)) {
        return false;
    }
    let mut chars = upper.chars();
    let first = chars.next().unwrap_or(' ');
    if first.is_ascii_digit() {
        return false;
    }
    // : # / は先頭に置けない。ただし `/` 単独は有効なシンボル
    if matches!(first, ':' | '#' | '/') && upper != "/" {
        return false;
    }
    // - + . の直後に数字が続く形はリテラルに譲る
    if matches!(first, '-' | '+' | '.') {
        if let Some(second) = chars.next() {
            if second.is_ascii_digit() {
                return false;
            }
        }
    }
    upper.matches('/').count() <= 1
}

/// キーワードの判定。`:` + 有効なシンボル本文。
fn valid_keyword(value: &str) -> bool {
    value.starts_with(':') && valid_symbol(&value[1..])
}

/// 文字リテラルの判定。バックスラッシュ + ちょうど 1 文字。
fn valid_char(value: &str) -> bool {
    value.starts_with('\\') && value.chars().count() == 2
}

struct Reader {
    tokens: VecDeque<Token>,
}

impl Reader {
    fn shift(&mut self, line: usize, col: usize) -> Result<Token, ParseError> {
        self.tokens
            .pop_front()
            .ok_or_else(|| ParseError::at("READ003", "unexpected end of list", line, col))
    }

    /// 先頭トークンの形に応じてノードを 1 つ読み取る。
    fn read_ahead(&mut self, token: Token) -> Result<Node, ParseError> {
        if token.kind == TokenKind::Paren {
            let (kind, close) = match token.text.as_str() {
                "(" => (NodeKind::List, ")"),
                "[" => (NodeKind::Vector, "]"),
                "{" => (NodeKind::Map, "}"),
                other => {
                    return Err(ParseError::at(
                        "READ002",
                        format!("Unexpected {}", other),
                        token.line,
                        token.column,
                    ))
                }
            };

            let mut children = Vec::new();
            loop {
                let next = self.shift(token.line, token.column)?;
                if next.kind == TokenKind::Paren && next.text == close {
                    return Ok(Node::branch(kind, token.line, token.column, children));
                }
                children.push(self.read_ahead(next)?);
            }
        }

        if token.kind == TokenKind::Atom && token.text.starts_with('#') {
            let inner = self.shift(token.line, token.column)?;
            let value = self.read_ahead(inner)?;
            return handle_tagged(token, value);
        }

        classify_atom(token)
    }
}

/// タグ付きフォームを破棄・集合・タグ付きノードへ振り分ける。
fn handle_tagged(token: Token, value: Node) -> Result<Node, ParseError> {
    let tag_name = token.text[1..].to_string();

    let kind = if tag_name == "_" {
        NodeKind::Discard
    } else if tag_name.is_empty() {
        // `#` 直後の `{}` は集合。引数がマップでなければ形が崩れている
        if value.kind != NodeKind::Map {
            return Err(ParseError::at(
                "READ005",
                "Was expecting a { } after hash to build set",
                token.line,
                token.column,
            ));
        }
        return Ok(Node::branch(
            NodeKind::Set,
            token.line,
            token.column,
            value.children,
        ));
    } else {
        NodeKind::Tagged
    };

    if !valid_symbol(&tag_name) {
        return Err(ParseError::at(
            "READ006",
            format!("Invalid tag name: {}", tag_name),
            token.line,
            token.column,
        ));
    }

    let tag_symbol = Node::leaf(NodeKind::Symbol, token.line, token.column, tag_name);
    Ok(Node::branch(
        kind,
        token.line,
        token.column,
        vec![tag_symbol, value],
    ))
}

/// アトムを固定の優先順位で分類する。文字列トークンは分類器を経由しない。
fn classify_atom(token: Token) -> Result<Node, ParseError> {
    if token.kind == TokenKind::Str {
        return Ok(Node::leaf(
            NodeKind::String,
            token.line,
            token.column,
            token.text,
        ));
    }

    let value = token.text.as_str();
    let kind = if value == "nil" {
        NodeKind::Nil
    } else if value == "true" || value == "false" {
        NodeKind::Bool
    } else if valid_char(value) {
        NodeKind::Char
    } else if valid_int(value, true) {
        NodeKind::Int
    } else if valid_float(value) {
        NodeKind::Float
    } else if valid_keyword(value) {
        NodeKind::Keyword
    } else if valid_symbol(value) {
        NodeKind::Symbol
    } else {
        return Err(ParseError::at(
            "READ010",
            format!("Could not parse atom: {}", value),
            token.line,
            token.column,
        ));
    };

    Ok(Node::leaf(kind, token.line, token.column, token.text))
}

/// EDN テキストをひとつのトップレベルノードへ読み取る。
pub fn read(src: &str) -> Result<Node, ParseError> {
    let mut reader = Reader {
        tokens: lex(src).into(),
    };

    let first = reader
        .tokens
        .pop_front()
        .ok_or_else(|| ParseError::at("READ001", "No parsable tokens found in string", 1, 1))?;
    reader.read_ahead(first)
}
