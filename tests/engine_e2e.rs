// パス: tests/engine_e2e.rs
// 役割: 読取からコード生成・JIT 実行までの一気通貫テスト
// 意図: 演算・束縛・レコード・関数・ポインタ・制御構造の実行結果を固定する
// 関連ファイル: src/engine/mod.rs, src/engine/emit.rs
use ednjit::Engine;

/// コンパイル・実行して結果値を返すヘルパ。
fn eval_ok(src: &str) -> f64 {
    Engine::new("test").expect("engine").eval(src).expect("eval")
}

/// コンパイルまたは実行が失敗することを確かめるヘルパ。
fn eval_err(src: &str) -> ednjit::EngineError {
    Engine::new("test")
        .expect("engine")
        .eval(src)
        .expect_err("expected failure")
}

#[test]
/// 純粋な整数演算（戻りで float64 へ広がる）。
fn e2e_pure_arithmetic() {
    assert_eq!(eval_ok("(+ 1 2)"), 3.0);
    assert_eq!(eval_ok("(- 10 4)"), 6.0);
    assert_eq!(eval_ok("(* 6 7)"), 42.0);
    assert_eq!(eval_ok("(/ 7 2)"), 3.0);
}

#[test]
/// 型付き束縛の連なりと読み出し。
fn e2e_typed_bindings() {
    assert_eq!(eval_ok("((= x :int32 10) (= y :int32 32) (+ x y))"), 42.0);
}

#[test]
/// 整数と浮動小数の混在は float64 へ昇格する。
fn e2e_mixed_type_promotion() {
    assert_eq!(eval_ok("(+ 1 2.5)"), 3.5);
    assert_eq!(eval_ok("(* 2.0 3)"), 6.0);
    assert_eq!(eval_ok("(/ 7.0 2)"), 3.5);
}

#[test]
/// レコードの構築とフィールド読み出し。
fn e2e_record_construction_and_access() {
    let src = "((struct Pt ((x :int32) (y :int32)))
                (= p (Pt (3 4)))
                (+ (. p :x) (. p :y)))";
    assert_eq!(eval_ok(src), 7.0);
}

#[test]
/// 関数定義と再帰呼び出し。
fn e2e_function_and_recursion() {
    let src = "((defn :int32 fact ((n :int32))
                  (cond ((<= n 1) 1)
                        (else (* n (fact (- n 1))))))
                (fact 5))";
    assert_eq!(eval_ok(src), 120.0);
}

#[test]
/// ポインタの参照・間接代入・読み戻し。
fn e2e_pointer_round_trip() {
    let src = "((= x :int32 7)
                (= p :int32* (ref x))
                (put p :int32 11)
                x)";
    assert_eq!(eval_ok(src), 11.0);
}

#[test]
/// while ループによる加算の蓄積。
fn e2e_while_loop() {
    let src = "((= i :int32 0)
                (= acc :int32 0)
                (while (< i 5)
                  ((= acc :int32 (+ acc i))
                   (= i :int32 (+ i 1))))
                acc)";
    assert_eq!(eval_ok(src), 10.0);
}

#[test]
/// 多分岐 cond と else 節。
fn e2e_cond_multiway() {
    let src = "((= x :int32 5)
                (cond ((< x 0) 1)
                      ((== x 5) 2)
                      (else 3)))";
    assert_eq!(eval_ok(src), 2.0);
    let src = "((= x :int32 -1)
                (cond ((< x 0) 1)
                      ((== x 5) 2)
                      (else 3)))";
    assert_eq!(eval_ok(src), 1.0);
}

#[test]
/// 単独子の節は else と同じく連鎖を打ち切る。
fn e2e_cond_single_child_clause() {
    assert_eq!(eval_ok("(cond ((== 1 2) 5) (42))"), 42.0);
}

#[test]
/// 比較演算の結果。整数は 1 ビット述語、浮動小数は 0/1 の float64。
fn e2e_comparisons() {
    assert_eq!(eval_ok("(< 1 2)"), 1.0);
    assert_eq!(eval_ok("(>= 1 2)"), 0.0);
    assert_eq!(eval_ok("(< 2.5 1.0)"), 0.0);
    assert_eq!(eval_ok("(!= 2.5 1.0)"), 1.0);
}

#[test]
/// 幅の異なる整数同士は広い方へ符号拡張して演算する。
fn e2e_integer_width_promotion() {
    assert_eq!(eval_ok("((= a :int8 100) (= b :int64 5) (+ a b))"), 105.0);
    assert_eq!(eval_ok("((= a :int16 -3) (= b :int32 2) (* a b))"), -6.0);
}

#[test]
/// float32 ヒント付きの束縛は単精度で格納される。
fn e2e_float32_binding() {
    assert_eq!(eval_ok("((= f :float32 1) (+ f 0.5))"), 1.5);
}

#[test]
/// int64 ヒント付きリテラルと広い幅の演算。
fn e2e_int64_binding() {
    assert_eq!(eval_ok("((= n :int64 4000000000) (- n 1))"), 3999999999.0);
}

#[test]
/// フィールドへの代入は宣言型と同じ IR 型の値だけを受け付ける。
fn e2e_record_field_assignment() {
    let src = "((struct Pt ((x :int32) (y :int32)))
                (= p (Pt (1 2)))
                (= (. p :x) 41)
                (+ (. p :x) 1))";
    assert_eq!(eval_ok(src), 42.0);

    let src = "((struct Pt ((x :int32) (y :int32)))
                (= p (Pt (1 2)))
                (= (. p :x) 1.5)
                (. p :x))";
    eval_err(src);
}

#[test]
/// 宣言順とフィールド位置の対応。
fn e2e_record_field_order() {
    let src = "((struct P3 ((a :int32) (b :int32) (c :int32)))
                (= q (P3 (1 2 3)))
                (. q :c))";
    assert_eq!(eval_ok(src), 3.0);
}

#[test]
/// 幅の混ざったレコードの格納と読み出し。
fn e2e_record_mixed_widths() {
    let src = "((struct Mix ((small :int8) (big :int64)))
                (= m (Mix (7 123456789)))
                (+ (. m :small) (. m :big)))";
    assert_eq!(eval_ok(src), 123456796.0);
}

#[test]
/// deref 式による読み出しと、lvalue としての (deref p) への代入。
fn e2e_deref_forms() {
    let src = "((= x :int32 6) (= p :int32* (ref x)) (deref p))";
    assert_eq!(eval_ok(src), 6.0);

    let src = "((= x :int32 1)
                (= p :int32* (ref x))
                (= (deref p) :int32 9)
                x)";
    assert_eq!(eval_ok(src), 9.0);
}

#[test]
/// ポインタ型引数は呼び出し元の記憶域を見る。
fn e2e_pointer_parameter_aliases_caller() {
    let src = "((defn :void bump ((p :int32*)) (put p :int32 99))
                (= x :int32 1)
                (bump (ref x))
                x)";
    assert_eq!(eval_ok(src), 99.0);
}

#[test]
/// 型注釈を省いた引数は int32 になる。
fn e2e_implicit_int32_parameter() {
    assert_eq!(eval_ok("((defn :int32 twice (n) (* n 2)) (twice 21))"), 42.0);
}

#[test]
/// 引数は宣言型へキャストされてから渡される。
fn e2e_argument_casts() {
    let src = "((defn :float64 half ((x :float64)) (/ x 2.0))
                (half 7))";
    assert_eq!(eval_ok(src), 3.5);
}

#[test]
/// 前方参照。遅延実体化により後で定義された関数も呼べる。
fn e2e_forward_reference() {
    let src = "((defn :int32 a () (b))
                (defn :int32 b () 7)
                (a))";
    assert_eq!(eval_ok(src), 7.0);
}

#[test]
/// 同じ関数を複数回呼んでも実体化は一度きり。
fn e2e_materialize_at_most_once() {
    let src = "((defn :int32 inc ((n :int32)) (+ n 1))
                (+ (inc 1) (inc 2)))";
    assert_eq!(eval_ok(src), 5.0);
}

#[test]
/// トップレベルが定義だけなら main が呼ばれる。
fn e2e_main_entry() {
    assert_eq!(eval_ok("(defn :int32 main () 5)"), 5.0);
    let src = "((defn :int32 helper () 2)
                (defn :int32 main () (helper)))";
    assert_eq!(eval_ok(src), 2.0);
}

#[test]
/// 定義だけで main が無いときは 0 になる。
fn e2e_definitions_without_main() {
    assert_eq!(eval_ok("(defn :int32 helper () 2)"), 0.0);
    assert_eq!(eval_ok("(struct Pt ((x :int32)))"), 0.0);
}

#[test]
/// 同じ変数への再代入は同じ格納場所を使い、最後の値が観測される。
fn e2e_rebinding_reuses_slot() {
    assert_eq!(eval_ok("((= x :int32 1) (= x :int32 2) x)"), 2.0);
}

#[test]
/// 破棄フォームは意味的に無視される。
fn e2e_discard_is_ignored() {
    assert_eq!(eval_ok("(+ 1 #_9 2)"), 3.0);
    assert_eq!(eval_ok("((= x :int32 1) #_(= x :int32 5) x)"), 1.0);
}

#[test]
/// 名前・型・アリティの誤りがコンパイルエラーになることを検証する。
fn e2e_reports_compile_errors() {
    // 未知の変数
    eval_err("x");
    // 未知の演算子
    eval_err("(foo 1)");
    // 未知の型名
    eval_err("(= x :int7 5)");
    // 未知のレコード
    eval_err("(= p (Nope (1)))");
    // レコードの再定義
    eval_err("((struct A ((x :int32))) (struct A ((y :int32))) 1)");
    // フィールド名の誤り
    eval_err("((struct Pt ((x :int32))) (= p (Pt (1))) (. p :z))");
    // 引数個数の不一致
    eval_err("((defn :int32 id ((n :int32)) n) (id 1 2))");
    // 非ポインタへの put
    eval_err("((= x :int32 1) (put x :int32 2) x)");
    // 式の位置に置けないリテラル
    eval_err("true");
    eval_err("[1 2]");
}

#[test]
/// 診断メッセージが `path(line,col) : error:` の書式で整形されることを検証する。
fn e2e_error_rendering() {
    let err = eval_err("(+ 1 nope)");
    let rendered = err.render("sample.edn");
    assert!(rendered.starts_with("sample.edn("));
    assert!(rendered.contains(") : error: "));
    assert!(rendered.contains("Unknown variable: nope"));
    assert!(rendered.contains("Node:"));
}

#[test]
/// 同じエンジンで複数回 run できることを検証する（表は毎回消去される）。
fn e2e_engine_reuse() {
    let mut engine = Engine::new("test").expect("engine");
    assert_eq!(engine.eval("((= x :int32 1) x)").expect("first"), 1.0);
    // 前回の束縛は持ち越されない
    assert!(engine.eval("x").is_err());
    assert_eq!(engine.eval("(+ 2 3)").expect("second"), 5.0);
}
