use crate::error::{ReconError, Result};
use calamine::Reader;
use indexmap::IndexMap;
use std::io::Cursor;
use std::path::Path;

/// 原始结算行: 表头 -> 单元格 (保留列顺序, 表头统一小写)
///
/// 规范化器不解释列语义, 语义解析由匹配器按上传类型分发。
pub type RawRow = IndexMap<String, String>;

const DELIMITED_EXTENSIONS: &[&str] = &["csv", "txt", "tsv"];
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xls"];

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 同步受理校验: 扩展名白名单 + 大小上限, 通过后才进入后台处理
pub fn validate(file_name: &str, size: usize, max_size: usize) -> Result<String> {
    let ext = extension(file_name)
        .ok_or_else(|| ReconError::UnsupportedFormat(file_name.to_string()))?;
    if !DELIMITED_EXTENSIONS.contains(&ext.as_str())
        && !WORKBOOK_EXTENSIONS.contains(&ext.as_str())
    {
        return Err(ReconError::UnsupportedFormat(format!(".{ext}")));
    }
    if size > max_size {
        return Err(ReconError::FileTooLarge {
            size,
            limit: max_size,
        });
    }
    Ok(ext)
}

/// 把上传文件字节转换为有序原始行集
///
/// 有限序列, 不可重放; 重跑同一文件需重新提交字节。
pub fn normalize(file_name: &str, bytes: &[u8], max_size: usize) -> Result<Vec<RawRow>> {
    let ext = validate(file_name, bytes.len(), max_size)?;
    match ext.as_str() {
        "tsv" => read_delimited(bytes, b'\t'),
        "csv" | "txt" => read_delimited(bytes, b','),
        // validate 已保证余下只有工作簿扩展名
        _ => read_workbook(bytes),
    }
}

fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut row = RawRow::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            // 短行补空单元格
            row.insert(header.clone(), record.get(i).unwrap_or("").trim().to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let cursor = Cursor::new(bytes);
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)?;

    // 只读第一个工作表, 首行为表头
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReconError::Processing("workbook has no worksheets".to_string()))??;

    let mut cells = range.rows();
    let Some(header_cells) = cells.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_cells
        .iter()
        .map(|c| c.to_string().trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in cells {
        let values: Vec<String> = record
            .iter()
            .map(|c| c.to_string().trim().to_string())
            .collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        let mut row = RawRow::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            row.insert(header.clone(), values.get(i).cloned().unwrap_or_default());
        }
        rows.push(row);
    }
    Ok(rows)
}
