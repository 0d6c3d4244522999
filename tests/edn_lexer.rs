// パス: tests/edn_lexer.rs
// 役割: 字句解析の基本〜境界テストを一本化
// 意図: トークン分割・位置情報・エスケープ・コメントの重要ケースを網羅する
// 関連ファイル: src/lexer.rs, src/ast.rs, tests/edn_reader.rs
use ednjit::lexer::lex;
use ednjit::{Token, TokenKind};

/// トークンのテキストだけを取り出すヘルパ。
fn texts(tokens: &[Token]) -> Vec<&str> {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

#[test]
/// 基本的なリストがアトムと括弧に分割されることを検証する。
fn lexer_basic_list() {
    let tokens = lex("(+ 1 2)");
    assert_eq!(texts(&tokens), vec!["(", "+", "1", "2", ")"]);
    assert_eq!(tokens[0].kind, TokenKind::Paren);
    assert_eq!(tokens[1].kind, TokenKind::Atom);
    assert_eq!(tokens[4].kind, TokenKind::Paren);
}

#[test]
/// 空入力とコメントだけの入力はトークンを生まないことを検証する。
fn lexer_empty_inputs() {
    assert!(lex("").is_empty());
    assert!(lex("; comment only\n").is_empty());
    assert!(lex("  ,\t\n").is_empty());
}

#[test]
/// カンマが空白として扱われることを検証する。
fn lexer_commas_are_whitespace() {
    let tokens = lex("[1, 2, 3]");
    assert_eq!(texts(&tokens), vec!["[", "1", "2", "3", "]"]);
}

#[test]
/// 行コメントが行末まで消費され、直前のアトムがフラッシュされることを検証する。
fn lexer_line_comments() {
    let tokens = lex("1 ; rest of line\n2");
    assert_eq!(texts(&tokens), vec!["1", "2"]);

    let tokens = lex("foo; trailing");
    assert_eq!(texts(&tokens), vec!["foo"]);
}

#[test]
/// 文字列リテラルの本体とエスケープの扱いを検証する。
fn lexer_string_escapes() {
    // \" と \\ はバックスラッシュを落とし、\t \n \f \r は本文に残す
    let tokens = lex(r#""a\"b""#);
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Str);
    assert_eq!(tokens[0].text, "a\"b");

    let tokens = lex(r#""a\\b""#);
    assert_eq!(tokens[0].text, "a\\b");

    let tokens = lex(r#""a\tb""#);
    assert_eq!(tokens[0].text, "a\\tb");

    let tokens = lex(r#""a\nb""#);
    assert_eq!(tokens[0].text, "a\\nb");
}

#[test]
/// 文字列の中では括弧・空白・セミコロンが本文になることを検証する。
fn lexer_string_swallows_delimiters() {
    let tokens = lex(r#""( ; )""#);
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].text, "( ; )");
}

#[test]
/// 閉じられない文字列はトークンを残さないことを検証する。
fn lexer_unterminated_string_drops_content() {
    assert!(lex("\"abc").is_empty());
}

#[test]
/// 破棄タグ `#_` が独立したアトムに切り出されることを検証する。
fn lexer_discard_tag_splits() {
    let tokens = lex("#_5");
    assert_eq!(texts(&tokens), vec!["#_", "5"]);

    let tokens = lex("(+ 1 #_2 3)");
    assert_eq!(texts(&tokens), vec!["(", "+", "1", "#_", "2", "3", ")"]);
}

#[test]
/// 文字リテラルが 2 文字で切り出されることを検証する。
fn lexer_char_literal_splits() {
    let tokens = lex(r"\a\b");
    assert_eq!(texts(&tokens), vec![r"\a", r"\b"]);

    let tokens = lex(r"(\c 1)");
    assert_eq!(texts(&tokens), vec!["(", r"\c", "1", ")"]);
}

#[test]
/// 対応の取れた入力で開き括弧と閉じ括弧の数が一致することを検証する。
fn lexer_balanced_paren_counts() {
    let tokens = lex("((x) [y {z}] #{1 2})");
    let count = |s: &str| tokens.iter().filter(|t| t.text == s).count();
    assert_eq!(count("("), count(")"));
    assert_eq!(count("["), count("]"));
    assert_eq!(count("{"), count("}"));
}

#[test]
/// 行・桁が 1 始まりで記録されることを検証する。
fn lexer_tracks_positions() {
    let tokens = lex("a\nbb cc");
    assert_eq!(tokens.len(), 3);
    assert_eq!(tokens[0].line, 1);
    assert_eq!(tokens[1].line, 2);
    assert_eq!(tokens[2].line, 2);
    assert!(tokens[2].column > tokens[1].column);
}

#[test]
/// 未知のバイトが拒否されずアトムとして流れることを検証する。
fn lexer_passes_unknown_bytes_through() {
    let tokens = lex("@~^");
    assert_eq!(texts(&tokens), vec!["@~^"]);
    assert_eq!(tokens[0].kind, TokenKind::Atom);
}

#[test]
/// はぐれた閉じ括弧も括弧トークンとして通すことを検証する（拒否は読取側）。
fn lexer_stray_close_is_a_paren_token() {
    let tokens = lex(")");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Paren);
    assert_eq!(tokens[0].text, ")");
}
