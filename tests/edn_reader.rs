// パス: tests/edn_reader.rs
// 役割: 読取器の分類・コレクション・タグ・エラー系のテスト
// 意図: リテラル文法の受理/拒否と木の形を回帰テストとして固定する
// 関連ファイル: src/reader.rs, src/ast.rs, tests/edn_lexer.rs
use ednjit::reader::read;
use ednjit::{Node, NodeKind};

/// 読取が成功することを前提としたヘルパ。
fn read_ok(src: &str) -> Node {
    read(src).expect("read")
}

/// 先頭ノードの種別だけを見るヘルパ。
fn kind_of(src: &str) -> NodeKind {
    read_ok(src).kind
}

#[test]
/// nil・真偽値・文字が正しく分類されることを検証する。
fn reader_classifies_simple_atoms() {
    assert_eq!(kind_of("nil"), NodeKind::Nil);
    assert_eq!(kind_of("true"), NodeKind::Bool);
    assert_eq!(kind_of("false"), NodeKind::Bool);
    assert_eq!(kind_of(r"\a"), NodeKind::Char);
    assert_eq!(kind_of(r"\;"), NodeKind::Char);
}

#[test]
/// 整数リテラルの受理範囲を検証する。
fn reader_classifies_integers() {
    assert_eq!(kind_of("0"), NodeKind::Int);
    assert_eq!(kind_of("42"), NodeKind::Int);
    assert_eq!(kind_of("+7"), NodeKind::Int);
    assert_eq!(kind_of("-7"), NodeKind::Int);
    assert_eq!(kind_of("10N"), NodeKind::Int);
    assert_eq!(kind_of("10M"), NodeKind::Int);
}

#[test]
/// 浮動小数リテラルの受理範囲を検証する。
fn reader_classifies_floats() {
    assert_eq!(kind_of("1.5"), NodeKind::Float);
    assert_eq!(kind_of("-1.5"), NodeKind::Float);
    assert_eq!(kind_of("1."), NodeKind::Float);
    assert_eq!(kind_of("1.5E3"), NodeKind::Float);
    assert_eq!(kind_of("1.5E-3"), NodeKind::Float);
    assert_eq!(kind_of("1.E3"), NodeKind::Float);
    assert_eq!(kind_of("1.5M"), NodeKind::Float);
}

#[test]
/// 先頭ドットと末尾 E の浮動小数が拒否されることを検証する。
fn reader_rejects_malformed_numbers() {
    assert!(read(".5").is_err());
    assert!(read("1.5E").is_err());
    assert!(read("1e5").is_err());
    assert!(read("+5x").is_err());
}

#[test]
/// キーワードとシンボルの分類を検証する。
fn reader_classifies_keywords_and_symbols() {
    assert_eq!(kind_of(":int32"), NodeKind::Keyword);
    assert_eq!(kind_of(":a/b"), NodeKind::Keyword);
    assert_eq!(kind_of("foo"), NodeKind::Symbol);
    assert_eq!(kind_of("foo-bar?"), NodeKind::Symbol);
    assert_eq!(kind_of("/"), NodeKind::Symbol);
    assert_eq!(kind_of("a/b"), NodeKind::Symbol);
    assert_eq!(kind_of("-"), NodeKind::Symbol);
    assert_eq!(kind_of("+"), NodeKind::Symbol);
}

#[test]
/// シンボルの先頭・区切り規則に反する形が拒否されることを検証する。
fn reader_rejects_invalid_symbols() {
    assert!(read("a/b/c").is_err());
    assert!(read(":").is_err());
    assert!(read("@foo").is_err());
}

#[test]
/// 文字列トークンは内容によらず文字列ノードになることを検証する。
fn reader_strings_bypass_classifiers() {
    let node = read_ok(r#""hello""#);
    assert_eq!(node.kind, NodeKind::String);
    assert_eq!(node.text, "hello");

    // "nil" という本文でも文字列のまま
    let node = read_ok(r#""nil""#);
    assert_eq!(node.kind, NodeKind::String);
}

#[test]
/// 3 種のコレクション区切りが対応するノードになることを検証する。
fn reader_builds_collections() {
    let list = read_ok("(1 2 3)");
    assert_eq!(list.kind, NodeKind::List);
    assert_eq!(list.children.len(), 3);

    let vector = read_ok("[1 2]");
    assert_eq!(vector.kind, NodeKind::Vector);
    assert_eq!(vector.children.len(), 2);

    let map = read_ok("{:a 1 :b 2}");
    assert_eq!(map.kind, NodeKind::Map);
    assert_eq!(map.children.len(), 4);

    let nested = read_ok("((1) [2] {:k 3})");
    assert_eq!(nested.children[0].kind, NodeKind::List);
    assert_eq!(nested.children[1].kind, NodeKind::Vector);
    assert_eq!(nested.children[2].kind, NodeKind::Map);
}

#[test]
/// `#{}` が集合ノードへ畳み込まれることを検証する。
fn reader_builds_sets() {
    let set = read_ok("#{1 2 3}");
    assert_eq!(set.kind, NodeKind::Set);
    assert_eq!(set.children.len(), 3);
}

#[test]
/// タグ付きフォームが [タグシンボル, 値] の子を持つことを検証する。
fn reader_builds_tagged_forms() {
    let tagged = read_ok(r##"#inst "2020-01-01""##);
    assert_eq!(tagged.kind, NodeKind::Tagged);
    assert_eq!(tagged.children.len(), 2);
    assert_eq!(tagged.children[0].kind, NodeKind::Symbol);
    assert_eq!(tagged.children[0].text, "inst");
    assert_eq!(tagged.children[1].kind, NodeKind::String);
}

#[test]
/// 破棄フォームが Discard ノードとして残ることを検証する。
fn reader_builds_discard_forms() {
    let discard = read_ok("#_5");
    assert_eq!(discard.kind, NodeKind::Discard);
    assert_eq!(discard.children.len(), 2);
    assert_eq!(discard.children[1].kind, NodeKind::Int);

    let list = read_ok("(+ 1 #_2 3)");
    assert_eq!(list.children.len(), 4);
    assert_eq!(list.children[2].kind, NodeKind::Discard);
}

#[test]
/// 空入力・はぐれた閉じ・閉じ忘れが読取エラーになることを検証する。
fn reader_reports_structural_errors() {
    assert!(read("").is_err());
    assert!(read("; only\n").is_err());
    assert!(read(")").is_err());
    assert!(read("]").is_err());
    assert!(read("(1 2").is_err());
    assert!(read("[1 {2").is_err());
    assert!(read("#_").is_err());
}

#[test]
/// タグ名の検査と集合の形の検査を検証する。
fn reader_reports_tag_errors() {
    // タグ名がシンボルとして不正
    assert!(read("#5 [1]").is_err());
    // `#` の直後がマップでなければ集合を作れない
    assert!(read("# [1]").is_err());
}

#[test]
/// 読取エラーが位置付きの診断メッセージを持つことを検証する。
fn reader_errors_carry_positions() {
    let err = read("(1 2").expect_err("unclosed list");
    assert_eq!(err.0.line, 1);
    assert!(err.to_string().contains("error:"));
}

#[test]
/// ノードが行・桁を運ぶことを検証する。
fn reader_nodes_carry_positions() {
    let node = read_ok("(+ 1\n 2)");
    assert_eq!(node.line, 1);
    let two = &node.children[2];
    assert_eq!(two.line, 2);
}

#[test]
/// 整形出力が 1 行モードで EDN らしい表記を返すことを検証する。
fn reader_pprint_round_trip_shapes() {
    let node = read_ok("(+ 1 2)");
    let printed = ednjit::ast::pprint(&node, 0, false);
    assert_eq!(printed, "(+ 1 2)");

    let set = read_ok("#{1 2}");
    let printed = ednjit::ast::pprint(&set, 0, false);
    assert!(printed.starts_with("#{"));

    let s = read_ok(r#""a\"b""#);
    assert_eq!(ednjit::ast::pprint(&s, 0, false), r#""a\"b""#);
}
