//! The final package container.
//!
//! A package is `WXPK`, a format version and a list of named streams. Every
//! real table becomes a tab-separated `<Table>.idt` stream; binary cells,
//! embedded cabinets and sub-storages become streams of their own.

use std::fs;
use std::path::{Path, PathBuf};

use wx_core::{ColumnType, FieldValue, MessageCode, Output, Table, WixError};

use crate::file_manager::io_error;

pub const PACKAGE_MAGIC: &[u8; 4] = b"WXPK";
pub const PACKAGE_VERSION: u32 = 1;

/// One named stream of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub name: String,
    pub data: Vec<u8>,
}

/// Serializes `output` with `embedded` cabinets as `(stream name, file)`.
pub fn write_package(output: &Output, embedded: &[(String, PathBuf)]) -> Result<Vec<u8>, WixError> {
    let mut streams = Vec::new();
    for table in output.tables.values() {
        if table.definition().unreal {
            continue;
        }
        streams.push(Stream {
            name: format!("{}.idt", table.name()),
            data: table_idt(table, output.codepage).into_bytes(),
        });
        streams.extend(object_streams(table)?);
    }
    for (name, path) in embedded {
        let data = fs::read(path).map_err(|error| io_error(path, error))?;
        streams.push(Stream {
            name: name.clone(),
            data,
        });
    }
    for storage in &output.sub_storages {
        streams.push(Stream {
            name: storage.name.clone(),
            data: write_package(&storage.data, &[])?,
        });
    }
    encode(&streams)
}

fn encode(streams: &[Stream]) -> Result<Vec<u8>, WixError> {
    let count = u32::try_from(streams.len()).map_err(|_| write_error("too many streams"))?;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(PACKAGE_MAGIC);
    bytes.extend_from_slice(&PACKAGE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    for stream in streams {
        let name_length = u16::try_from(stream.name.len())
            .map_err(|_| write_error(&format!("stream name '{}' is too long", stream.name)))?;
        bytes.extend_from_slice(&name_length.to_le_bytes());
        bytes.extend_from_slice(stream.name.as_bytes());
        bytes.extend_from_slice(&(stream.data.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&stream.data);
    }
    Ok(bytes)
}

/// Splits a package back into its streams.
pub fn read_package(bytes: &[u8]) -> Result<Vec<Stream>, WixError> {
    let corrupt = || WixError::new(MessageCode::OutputWriteFailed, "Package data is truncated or corrupt.");
    let rest = bytes.strip_prefix(PACKAGE_MAGIC.as_slice()).ok_or_else(corrupt)?;
    let (version, rest) = rest.split_first_chunk::<4>().ok_or_else(corrupt)?;
    if u32::from_le_bytes(*version) != PACKAGE_VERSION {
        return Err(corrupt());
    }
    let (count, mut rest) = rest.split_first_chunk::<4>().ok_or_else(corrupt)?;
    let count = u32::from_le_bytes(*count);
    let mut streams = Vec::new();
    for _ in 0..count {
        let (length, tail) = rest.split_first_chunk::<2>().ok_or_else(corrupt)?;
        let length = usize::from(u16::from_le_bytes(*length));
        if tail.len() < length {
            return Err(corrupt());
        }
        let (name, tail) = tail.split_at(length);
        let (size, tail) = tail.split_first_chunk::<8>().ok_or_else(corrupt)?;
        let size = usize::try_from(u64::from_le_bytes(*size)).map_err(|_| corrupt())?;
        if tail.len() < size {
            return Err(corrupt());
        }
        let (data, tail) = tail.split_at(size);
        streams.push(Stream {
            name: String::from_utf8_lossy(name).into_owned(),
            data: data.to_vec(),
        });
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(corrupt());
    }
    Ok(streams)
}

fn write_error(detail: &str) -> WixError {
    WixError::new(MessageCode::OutputWriteFailed, format!("Cannot write package: {}.", detail))
}

fn object_streams(table: &Table) -> Result<Vec<Stream>, WixError> {
    let mut streams = Vec::new();
    for row in &table.rows {
        for (index, column) in table.definition().columns.iter().enumerate() {
            if column.column_type != ColumnType::Object {
                continue;
            }
            let Some(path) = row.get_string(index) else { continue };
            let data = fs::read(path).map_err(|error| io_error(Path::new(path), error))?;
            streams.push(Stream {
                name: object_stream_name(table.name(), &row.primary_key()),
                data,
            });
        }
    }
    Ok(streams)
}

fn object_stream_name(table: &str, key: &str) -> String {
    format!("{}.{}", table, key)
}

fn column_type_code(column: &wx_core::ColumnDefinition) -> String {
    let code = match column.column_type {
        ColumnType::String => 's',
        ColumnType::Localized => 'l',
        ColumnType::Number => 'i',
        ColumnType::Object => 'v',
    };
    let code = if column.nullable { code.to_ascii_uppercase() } else { code };
    let length = if column.column_type == ColumnType::Object { 0 } else { column.length };
    format!("{}{}", code, length)
}

/// Archive form of one table: names, types, key line, then rows.
pub fn table_idt(table: &Table, codepage: i32) -> String {
    let definition = table.definition();
    let mut lines = Vec::with_capacity(table.rows.len() + 3);
    lines.push(
        definition
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>()
            .join("\t"),
    );
    lines.push(definition.columns.iter().map(column_type_code).collect::<Vec<_>>().join("\t"));
    let mut key_line = definition
        .primary_key_columns()
        .map(|index| definition.columns[index].name.as_str())
        .collect::<Vec<_>>();
    key_line.insert(0, &definition.name);
    let key_line = key_line.join("\t");
    lines.push(if codepage != 0 {
        format!("{}\t{}", codepage, key_line)
    } else {
        key_line
    });

    for row in &table.rows {
        let cells = (0..definition.columns.len())
            .map(|index| match row.value(index) {
                FieldValue::Object(_) => object_stream_name(&definition.name, &row.primary_key()),
                value => escape(&value.to_string()),
            })
            .collect::<Vec<_>>();
        lines.push(cells.join("\t"));
    }
    let mut text = lines.join("\r\n");
    text.push_str("\r\n");
    text
}

fn escape(value: &str) -> String {
    value
        .chars()
        .map(|character| match character {
            '\t' => '\u{10}',
            '\r' => '\u{11}',
            '\n' => '\u{19}',
            other => other,
        })
        .collect()
}
