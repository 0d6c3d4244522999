// パス: src/engine/types.rs
// 役割: 型名文字列を Cranelift の型とサイズ情報へ解決する
// 意図: プリミティブ・ポインタ・レコードの 3 系統を 1 箇所で扱う
// 関連ファイル: src/engine/emit.rs, src/engine/mod.rs, tests/engine_types.rs
//! 型解決モジュール
//!
//! - 認識する型名は `int8` `int16` `int32` `int64` `float32` `float64`
//!   `void`、末尾 `*` のポインタ、およびユーザ定義レコード名。
//! - レコードはスタック上の連続領域として表し、フィールドは宣言順に
//!   自然アラインメントで配置する。

use std::collections::HashMap;
use std::fmt;

use cranelift_codegen::ir::{types, Type};

use crate::errors::{CompileError, CompileResult};

/// 型名の解決結果。レコードは名前のまま保持し、配置計算時に表を引く。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Void,
    Ptr(Box<TypeSpec>),
    Record(String),
}

/// レコード 1 件の配置情報。`(フィールド名, 型名)` を宣言順に持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub fields: Vec<(String, String)>,
}

impl RecordLayout {
    /// フィールド名から宣言順の位置を引く。
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(f, _)| f == name)
    }
}

/// レコード名から配置への表。1 回の `run` の間だけ生きる。
pub type RecordTable = HashMap<String, RecordLayout>;

/// ソース上の型名表記（`int32*` など）へ戻す。
impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::I8 => write!(f, "int8"),
            TypeSpec::I16 => write!(f, "int16"),
            TypeSpec::I32 => write!(f, "int32"),
            TypeSpec::I64 => write!(f, "int64"),
            TypeSpec::F32 => write!(f, "float32"),
            TypeSpec::F64 => write!(f, "float64"),
            TypeSpec::Void => write!(f, "void"),
            TypeSpec::Ptr(inner) => write!(f, "{}*", inner),
            TypeSpec::Record(name) => write!(f, "{}", name),
        }
    }
}

/// 型名文字列を `TypeSpec` へ解決する。未知の名前はコンパイルエラー。
pub fn resolve(
    name: &str,
    records: &RecordTable,
    line: usize,
    col: usize,
) -> CompileResult<TypeSpec> {
    if let Some(inner) = name.strip_suffix('*') {
        return Ok(TypeSpec::Ptr(Box::new(resolve(inner, records, line, col)?)));
    }
    match name {
        "int8" => Ok(TypeSpec::I8),
        "int16" => Ok(TypeSpec::I16),
        "int32" => Ok(TypeSpec::I32),
        "int64" => Ok(TypeSpec::I64),
        "float32" => Ok(TypeSpec::F32),
        "float64" => Ok(TypeSpec::F64),
        "void" => Ok(TypeSpec::Void),
        other => {
            if records.contains_key(other) {
                Ok(TypeSpec::Record(other.to_string()))
            } else {
                Err(CompileError::at(
                    "CODEGEN001",
                    format!("Unknown type: {}", other),
                    line,
                    col,
                ))
            }
        }
    }
}

impl TypeSpec {
    /// スカラとしてロード・ストアできる場合の Cranelift 型。
    /// `void` とレコードはスカラ表現を持たない。
    pub fn clif(&self, ptr_ty: Type) -> Option<Type> {
        match self {
            TypeSpec::I8 => Some(types::I8),
            TypeSpec::I16 => Some(types::I16),
            TypeSpec::I32 => Some(types::I32),
            TypeSpec::I64 => Some(types::I64),
            TypeSpec::F32 => Some(types::F32),
            TypeSpec::F64 => Some(types::F64),
            TypeSpec::Ptr(_) => Some(ptr_ty),
            TypeSpec::Void | TypeSpec::Record(_) => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeSpec::F32 | TypeSpec::F64)
    }

    pub fn is_int(&self) -> bool {
        matches!(
            self,
            TypeSpec::I8 | TypeSpec::I16 | TypeSpec::I32 | TypeSpec::I64
        )
    }

    /// 整数型のビット幅。整数以外は `None`。
    pub fn int_width(&self) -> Option<u32> {
        match self {
            TypeSpec::I8 => Some(8),
            TypeSpec::I16 => Some(16),
            TypeSpec::I32 => Some(32),
            TypeSpec::I64 => Some(64),
            _ => None,
        }
    }

    /// 占有バイト数。レコードはフィールド配置から計算する。
    pub fn size_bytes(
        &self,
        ptr_ty: Type,
        records: &RecordTable,
        line: usize,
        col: usize,
    ) -> CompileResult<u32> {
        match self {
            TypeSpec::I8 => Ok(1),
            TypeSpec::I16 => Ok(2),
            TypeSpec::I32 | TypeSpec::F32 => Ok(4),
            TypeSpec::I64 | TypeSpec::F64 => Ok(8),
            TypeSpec::Ptr(_) => Ok(ptr_ty.bytes()),
            TypeSpec::Void => Ok(0),
            TypeSpec::Record(name) => {
                let (_, size) = record_placement(name, records, ptr_ty, line, col)?;
                Ok(size)
            }
        }
    }

    /// 自然アラインメント。レコードは最大フィールドに合わせる。
    pub fn align_bytes(
        &self,
        ptr_ty: Type,
        records: &RecordTable,
        line: usize,
        col: usize,
    ) -> CompileResult<u32> {
        match self {
            TypeSpec::Record(name) => {
                let layout = lookup_record(name, records, line, col)?;
                let mut align = 1;
                for (_, field_ty) in &layout.fields {
                    let spec = resolve(field_ty, records, line, col)?;
                    align = align.max(spec.align_bytes(ptr_ty, records, line, col)?);
                }
                Ok(align)
            }
            _ => Ok(self.size_bytes(ptr_ty, records, line, col)?.max(1)),
        }
    }
}

/// レコード表から配置を引く。未定義ならコンパイルエラー。
pub fn lookup_record<'a>(
    name: &str,
    records: &'a RecordTable,
    line: usize,
    col: usize,
) -> CompileResult<&'a RecordLayout> {
    records.get(name).ok_or_else(|| {
        CompileError::at(
            "CODEGEN002",
            format!("Unknown record: {}", name),
            line,
            col,
        )
    })
}

/// レコードの各フィールドのオフセット列と総サイズを計算する。
/// フィールドは宣言順のまま自然アラインメントで詰め、総サイズは
/// レコード自身のアラインメントへ切り上げる。
pub fn record_placement(
    name: &str,
    records: &RecordTable,
    ptr_ty: Type,
    line: usize,
    col: usize,
) -> CompileResult<(Vec<u32>, u32)> {
    let layout = lookup_record(name, records, line, col)?;
    let mut offsets = Vec::with_capacity(layout.fields.len());
    let mut cursor = 0u32;
    let mut max_align = 1u32;

    for (_, field_ty) in &layout.fields {
        let spec = resolve(field_ty, records, line, col)?;
        let size = spec.size_bytes(ptr_ty, records, line, col)?;
        let align = spec.align_bytes(ptr_ty, records, line, col)?;
        cursor = align_to(cursor, align);
        offsets.push(cursor);
        cursor += size;
        max_align = max_align.max(align);
    }

    Ok((offsets, align_to(cursor.max(1), max_align)))
}

fn align_to(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
