//! Spreadsheet import and export
//!
//! Merged datasets go out as a single `Products` sheet. Keyword lists come in
//! from the first sheet of a workbook with `Keyword`, `Category` and
//! `Subcategory` columns.

use calamine::{Data, Reader, open_workbook_auto};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use super::accumulator::write_json_atomic;
use crate::domain::record::fields;
use crate::domain::{CollectionError, Record};

pub const PRODUCTS_SHEET: &str = "Products";

/// Leading columns, in this order, when present in the data
const PREFERRED_COLUMNS: &[&str] = &[
    fields::SITE,
    fields::KEYWORD_ID,
    fields::KEYWORD,
    fields::PRODUCT_ID,
    "brand_name",
    fields::PRODUCT_NAME,
    "product_rating",
    "product_rating_count",
    "current_product_price",
    "original_product_price",
    "product_color",
    "product_description",
    fields::SIZES_AVAILABLE,
    "product_sizes_coming_soon",
    "product_sizes_out_of_stock",
    fields::PRODUCT_IMAGE_URLS,
    fields::PRODUCT_URL,
    "additional_information",
];

/// List fields flattened to `a, b, c`; always exported, empty when absent
const LIST_COLUMNS: &[&str] = &[
    fields::SIZES_AVAILABLE,
    "product_sizes_coming_soon",
    "product_sizes_out_of_stock",
    fields::PRODUCT_IMAGE_URLS,
];

const REQUIRED_KEYWORD_COLUMNS: [&str; 3] = ["Keyword", "Category", "Subcategory"];

const MAX_COLUMN_WIDTH: usize = 50;
const MAX_CELL_CHARS: usize = 32_767;
const MAX_DATA_ROWS: usize = 1_048_575;

/// Preferred columns first, then every other field in first-seen order
#[must_use]
pub fn column_order(records: &[Record]) -> Vec<String> {
    let mut seen: Vec<String> = LIST_COLUMNS.iter().map(ToString::to_string).collect();
    for record in records {
        for key in record.as_map().keys() {
            if !seen.contains(key) {
                seen.push(key.clone());
            }
        }
    }

    let mut columns: Vec<String> = PREFERRED_COLUMNS
        .iter()
        .filter(|column| seen.iter().any(|s| s == *column))
        .map(ToString::to_string)
        .collect();
    for key in seen {
        if !columns.contains(&key) {
            columns.push(key);
        }
    }
    columns
}

#[derive(Debug)]
enum Cell {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    fn from_field(column: &str, value: Option<&Value>) -> Self {
        match value {
            None if LIST_COLUMNS.contains(&column) => Self::Text(String::new()),
            None | Some(Value::Null) => Self::Blank,
            Some(Value::Array(items)) => Self::Text(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            Some(Value::String(s)) => Self::Text(s.clone()),
            Some(Value::Number(n)) => n.as_f64().map_or_else(|| Self::Text(n.to_string()), Self::Number),
            Some(Value::Bool(b)) => Self::Bool(*b),
            Some(other @ Value::Object(_)) => Self::Text(other.to_string()),
        }
    }

    fn display_len(&self) -> usize {
        match self {
            Self::Blank => 0,
            Self::Text(s) => s.chars().count(),
            Self::Number(n) => n.to_string().len(),
            Self::Bool(b) => b.to_string().len(),
        }
    }
}

/// Writes `records` as an xlsx workbook and returns the number of data rows
pub fn export_xlsx(records: &[Record], path: &Path) -> Result<usize, CollectionError> {
    if records.len() > MAX_DATA_ROWS {
        return Err(export_error(
            path,
            format!("{} records exceed the sheet limit of {MAX_DATA_ROWS} rows", records.len()),
        ));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CollectionError::OutputUnavailable {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let columns = column_order(records);
    write_workbook(records, &columns, path).map_err(|e| export_error(path, e.to_string()))?;
    info!(
        "Exported {} records x {} columns to {}",
        records.len(),
        columns.len(),
        path.display()
    );
    Ok(records.len())
}

fn write_workbook(records: &[Record], columns: &[String], path: &Path) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(PRODUCTS_SHEET)?;
    let header = Format::new().set_bold();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for (col, name) in (0u16..).zip(columns) {
        sheet.write_string_with_format(0, col, name, &header)?;
    }

    for (row, record) in (1u32..).zip(records) {
        for ((col, name), width) in (0u16..).zip(columns).zip(widths.iter_mut()) {
            let cell = Cell::from_field(name, record.get(name));
            *width = (*width).max(cell.display_len());
            match cell {
                Cell::Blank => {}
                Cell::Text(text) => {
                    sheet.write_string(row, col, truncate_chars(text, MAX_CELL_CHARS))?;
                }
                Cell::Number(n) => {
                    sheet.write_number(row, col, n)?;
                }
                Cell::Bool(b) => {
                    sheet.write_boolean(row, col, b)?;
                }
            }
        }
    }

    for (col, width) in (0u16..).zip(&widths) {
        let width = (*width + 2).min(MAX_COLUMN_WIDTH);
        sheet.set_column_width(col, u16::try_from(width).unwrap_or(u16::MAX))?;
    }

    workbook.save(path)
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

fn export_error(path: &Path, reason: String) -> CollectionError {
    CollectionError::ExportFailed {
        path: path.to_path_buf(),
        reason,
    }
}

/// One keyword row, serialized into the query-list format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordEntry {
    pub id: String,
    pub keyword: String,
    pub category: String,
    pub subcategory: String,
}

/// Reads keyword rows from the first sheet of the workbook at `path`.
///
/// Rows missing any of the required columns are dropped. Ids are the
/// 1-based position of the row below the header, so dropped rows leave gaps.
pub fn import_keywords(path: &Path) -> Result<Vec<KeywordEntry>, CollectionError> {
    let unavailable = |reason: String| CollectionError::input_unavailable(path, reason);

    let mut workbook = open_workbook_auto(path).map_err(|e| unavailable(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| unavailable("workbook has no worksheets".to_string()))?
        .map_err(|e| unavailable(e.to_string()))?;

    let mut rows = range.rows();
    let header = rows.next().unwrap_or_default();
    let column = |name: &str| header.iter().position(|cell| cell_text(cell).as_deref() == Some(name));
    let (Some(keyword_col), Some(category_col), Some(subcategory_col)) =
        (column("Keyword"), column("Category"), column("Subcategory"))
    else {
        let missing: Vec<&str> = REQUIRED_KEYWORD_COLUMNS
            .into_iter()
            .filter(|name| column(*name).is_none())
            .collect();
        return Err(unavailable(format!("missing required columns: {}", missing.join(", "))));
    };

    let mut entries = Vec::new();
    let mut dropped = 0usize;
    for (index, row) in rows.enumerate() {
        let value = |col: usize| row.get(col).and_then(cell_text);
        match (value(keyword_col), value(category_col), value(subcategory_col)) {
            (Some(keyword), Some(category), Some(subcategory)) => entries.push(KeywordEntry {
                id: (index + 1).to_string(),
                keyword,
                category,
                subcategory,
            }),
            _ => dropped += 1,
        }
    }

    debug!("Dropped {} incomplete keyword rows", dropped);
    info!("Read {} keywords from {}", entries.len(), path.display());
    Ok(entries)
}

/// Saves keyword rows as a query list readable by `load_queries`
pub fn write_keywords(entries: &[KeywordEntry], path: &Path) -> Result<(), CollectionError> {
    write_json_atomic(path, entries)
}

/// Trimmed cell text; `None` for blank cells
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{Xlsx, open_workbook};
    use serde_json::json;

    fn read_sheet(path: &Path) -> Vec<Vec<Data>> {
        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        let range = workbook.worksheet_range(PRODUCTS_SHEET).unwrap();
        range.rows().map(<[Data]>::to_vec).collect()
    }

    #[test]
    fn test_preferred_columns_lead() {
        let records = vec![
            Record::new()
                .with("zeta", "z")
                .with(fields::PRODUCT_URL, "https://s/1")
                .with(fields::PRODUCT_NAME, "Tee")
                .with(fields::SITE, "shop"),
        ];
        assert_eq!(
            column_order(&records),
            vec![
                "site",
                "product_name",
                "product_sizes_available",
                "product_sizes_coming_soon",
                "product_sizes_out_of_stock",
                "product_image_urls",
                "product_url",
                "zeta",
            ]
        );
    }

    #[test]
    fn test_export_flattens_lists_and_fills_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/merged.xlsx");
        let records = vec![
            Record::new()
                .with(fields::SITE, "shop")
                .with(fields::PRODUCT_NAME, "Tee")
                .with(fields::SIZES_AVAILABLE, json!(["S", "M"]))
                .with("product_rating", 4.5),
            Record::new().with(fields::SITE, "shop").with(fields::PRODUCT_NAME, "Cap"),
        ];

        assert_eq!(export_xlsx(&records, &path).unwrap(), 2);

        let rows = read_sheet(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Data::String("site".into()));
        assert_eq!(rows[0][1], Data::String("product_name".into()));
        assert_eq!(rows[0][2], Data::String("product_rating".into()));
        assert_eq!(rows[0][3], Data::String("product_sizes_available".into()));
        assert_eq!(rows[1][1], Data::String("Tee".into()));
        assert_eq!(rows[1][2], Data::Float(4.5));
        assert_eq!(rows[1][3], Data::String("S, M".into()));
        assert_eq!(rows[2][1], Data::String("Cap".into()));
        assert_eq!(rows[2][2], Data::Empty);
    }

    #[test]
    fn test_long_text_is_truncated() {
        let text = "é".repeat(MAX_CELL_CHARS + 10);
        assert_eq!(truncate_chars(text, MAX_CELL_CHARS).chars().count(), MAX_CELL_CHARS);
        assert_eq!(truncate_chars("short".into(), MAX_CELL_CHARS), "short");
    }

    fn write_keyword_book(path: &Path, rows: &[[&str; 4]]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (row, cells) in (0u32..).zip(rows) {
            for (col, text) in (0u16..).zip(cells) {
                if !text.is_empty() {
                    sheet.write_string(row, col, *text).unwrap();
                }
            }
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_import_drops_incomplete_rows_and_keeps_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.xlsx");
        write_keyword_book(
            &path,
            &[
                ["Notes", "Keyword", "Category", "Subcategory"],
                ["", " Red Dress ", "Women", "Dresses"],
                ["", "Sneakers", "", "Shoes"],
                ["x", "Linen Shirt", "Men", "Shirts"],
            ],
        );

        let entries = import_keywords(&path).unwrap();

        assert_eq!(
            entries,
            vec![
                KeywordEntry {
                    id: "1".into(),
                    keyword: "Red Dress".into(),
                    category: "Women".into(),
                    subcategory: "Dresses".into(),
                },
                KeywordEntry {
                    id: "3".into(),
                    keyword: "Linen Shirt".into(),
                    category: "Men".into(),
                    subcategory: "Shirts".into(),
                },
            ]
        );
    }

    #[test]
    fn test_import_requires_keyword_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.xlsx");
        write_keyword_book(&path, &[["Keyword", "Group", "", ""], ["Tee", "Tops", "", ""]]);

        let err = import_keywords(&path).unwrap_err();
        match err {
            CollectionError::InputUnavailable { reason, .. } => {
                assert_eq!(reason, "missing required columns: Category, Subcategory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_imported_keywords_load_as_queries() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("keywords.xlsx");
        write_keyword_book(
            &book,
            &[["Keyword", "Category", "Subcategory", ""], ["Boots", "Women", "Shoes", ""]],
        );
        let json = dir.path().join("keywords.json");
        write_keywords(&import_keywords(&book).unwrap(), &json).unwrap();

        let queries = crate::domain::query::load_queries(&json).unwrap();
        assert_eq!(queries, vec![crate::domain::Query::new("1", "Boots")]);
    }
}
