// パス: src/lexer.rs
// 役割: EDN テキストを位置付きトークン列へ変換する字句解析器
// 意図: 行・桁を追跡しつつ、分類は読取側に委ねた粗いトークンを生成する
// 関連ファイル: src/ast.rs, src/reader.rs, tests/edn_lexer.rs
//! 字句解析モジュール
//!
//! - トークンは文字列・アトム・括弧の 3 分類のみ。未知のバイトは拒否せず
//!   アトムとして流し、読取側の分類器に委ねる。
//! - 文字列リテラル内を除き、トークンが行をまたぐことはない。
//! - `;` から行末までは行コメントとして消費する（開始時点の部分アトムは
//!   先にフラッシュする）。
//! - アトム内では `#_` と「バックスラッシュ直後の 1 文字」（文字リテラル）を
//!   即座に切り出し、独立したアトムのまま保つ。
//! - 字句解析は失敗しない。閉じられない文字列は単にトークンを残さない。

use crate::ast::{Token, TokenKind};

struct Lexer {
    line: usize,
    column: usize,
    in_string: bool,
    escaping: bool,
    in_comment: bool,
    string_content: String,
    atom: String,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new() -> Self {
        Self {
            line: 1,
            column: 1,
            in_string: false,
            escaping: false,
            in_comment: false,
            string_content: String::new(),
            atom: String::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self, src: &str) -> Vec<Token> {
        for ch in src.chars() {
            self.step(ch);
            if ch == '\n' || ch == '\r' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.flush_atom();
        self.tokens
    }

    fn step(&mut self, ch: char) {
        if self.in_comment {
            if ch == '\n' {
                self.in_comment = false;
            }
            return;
        }

        if !self.in_string && ch == ';' && !self.escaping {
            self.flush_atom();
            self.in_comment = true;
            return;
        }

        if ch == '"' && !self.escaping {
            if self.in_string {
                let body = std::mem::take(&mut self.string_content);
                self.push(TokenKind::Str, body);
                self.in_string = false;
            } else {
                self.string_content.clear();
                self.in_string = true;
            }
            return;
        }

        if self.in_string {
            if ch == '\\' && !self.escaping {
                self.escaping = true;
                return;
            }
            if self.escaping {
                self.escaping = false;
                // \t \n \f \r はバックスラッシュを本文に残し、\" と \\ は落とす
                if matches!(ch, 't' | 'n' | 'f' | 'r') {
                    self.string_content.push('\\');
                }
            }
            self.string_content.push(ch);
            return;
        }

        if matches!(
            ch,
            '(' | ')' | '[' | ']' | '{' | '}' | '\t' | '\n' | '\r' | ' ' | ','
        ) {
            self.flush_atom();
            if matches!(ch, '(' | ')' | '[' | ']' | '{' | '}') {
                self.push(TokenKind::Paren, ch.to_string());
            }
            return;
        }

        if self.escaping {
            self.escaping = false;
        } else if ch == '\\' {
            self.escaping = true;
        }

        // 破棄タグと文字リテラルは 2 文字で独立したアトムとして確定させる
        if self.atom == "#_" || (self.atom.chars().count() == 2 && self.atom.starts_with('\\')) {
            self.flush_atom();
        }
        self.atom.push(ch);
    }

    fn flush_atom(&mut self) {
        if !self.atom.is_empty() {
            let text = std::mem::take(&mut self.atom);
            self.push(TokenKind::Atom, text);
        }
    }

    fn push(&mut self, kind: TokenKind, text: String) {
        self.tokens.push(Token {
            kind,
            line: self.line,
            column: self.column,
            text,
        });
    }
}

/// EDN テキストをトークン列へ変換する。空入力は空列を返す。
pub fn lex(src: &str) -> Vec<Token> {
    Lexer::new().run(src)
}
