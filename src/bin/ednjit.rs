// パス: src/bin/ednjit.rs
// 役割: Binary entrypoint that compiles and runs one source file
// 意図: ファイル 1 つを受け取り、結果表示と終了コードへ変換する
// 関連ファイル: src/engine/mod.rs, src/lib.rs
use std::fs;
use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use serde::Serialize;

use ednjit::Engine;

/// ednjit CLI
#[derive(Parser)]
#[command(version, about = "EDN を SSA IR へ下降してその場で JIT 実行する電卓")]
struct Cli {
    /// 実行するソースファイル（トップレベル式 1 つ）
    #[arg(short = 'f', long)]
    filename: PathBuf,
    /// 成功時に結果を JSON で表示する
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    status: &'static str,
    input: &'a str,
    value: f64,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // ヘルプ・バージョン表示は正常終了、引数不備は 1 で終了する
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                print!("{}", err);
                process::exit(0);
            }
            eprint!("{}", err);
            process::exit(1);
        }
    };
    process::exit(run_cli(cli));
}

fn run_cli(cli: Cli) -> i32 {
    let path = cli.filename.display().to_string();

    let source = match fs::read_to_string(&cli.filename) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Failed to open file: {}: {}", path, err);
            return 1;
        }
    };

    let mut engine = match Engine::new(path.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("{}", err.render(&path));
            return 1;
        }
    };

    if cli.json {
        match engine.eval(&source) {
            Ok(value) => {
                let payload = JsonOutput {
                    status: "ok",
                    input: &path,
                    value,
                };
                match serde_json::to_string(&payload) {
                    Ok(json) => {
                        println!("{}", json);
                        0
                    }
                    Err(err) => {
                        eprintln!("Failed to serialize result: {}", err);
                        1
                    }
                }
            }
            Err(err) => {
                eprintln!("{}", err.render(&path));
                1
            }
        }
    } else {
        // run が IR ダンプと結果、失敗時の診断を印字する
        match engine.run(&source) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}
