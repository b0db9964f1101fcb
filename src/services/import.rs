use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};

use crate::{
    error::{ServiceError, ServiceResult},
    models::student::{ImportRowError, StudentImportRow},
};

const REQUIRED_COLUMNS: &[&str] = &["admission_no", "first_name", "last_name"];
/// Column widths of the `students` table.
const MAX_LENGTHS: &[(&str, usize)] = &[
    ("admission_no", 64),
    ("first_name", 128),
    ("last_name", 128),
    ("grade_level", 64),
    ("class_name", 64),
    ("guardian_name", 255),
    ("guardian_phone", 32),
    ("guardian_email", 255),
];
const MAX_ROWS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
}

impl SheetFormat {
    /// Format from the upload's content type, falling back to its file name.
    pub fn detect(content_type: &str, filename: &str) -> Option<Self> {
        let from_type = |ct: &str| match ct {
            "text/csv" | "application/csv" | "text/plain" => Some(SheetFormat::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(SheetFormat::Xlsx)
            }
            _ => None,
        };
        from_type(content_type).or_else(|| {
            let guessed = mime_guess::from_path(filename).first()?;
            from_type(guessed.essence_str())
        })
    }
}

/// Rows that parsed cleanly, tagged with their 1-based sheet row number,
/// plus the rows that did not.
#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub rows: Vec<(usize, StudentImportRow)>,
    pub errors: Vec<ImportRowError>,
}

pub fn parse(format: SheetFormat, data: &[u8]) -> ServiceResult<ParsedSheet> {
    let table = match format {
        SheetFormat::Csv => csv_table(data)?,
        SheetFormat::Xlsx => xlsx_table(data)?,
    };
    rows_from_table(table)
}

fn csv_table(data: &[u8]) -> ServiceResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);
    let mut table = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ServiceError::validation(format!("invalid CSV: {e}")))?;
        table.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Whole numbers (admission numbers, phones) come back as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn xlsx_table(data: &[u8]) -> ServiceResult<Vec<Vec<String>>> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
        .map_err(|e| ServiceError::validation(format!("invalid XLSX file: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ServiceError::validation("workbook has no sheets"))?
        .map_err(|e| ServiceError::validation(format!("unreadable worksheet: {e}")))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

/// Map a header row plus data rows onto import records. Blank lines are skipped.
pub fn rows_from_table(table: Vec<Vec<String>>) -> ServiceResult<ParsedSheet> {
    let mut lines = table.into_iter().enumerate();
    let header: Vec<String> = lines
        .next()
        .map(|(_, h)| h.iter().map(|c| c.trim().to_lowercase().replace(' ', "_")).collect())
        .ok_or_else(|| ServiceError::validation("file is empty"))?;

    let col = |name: &str| header.iter().position(|h| h == name);
    for required in REQUIRED_COLUMNS {
        if col(required).is_none() {
            return Err(ServiceError::validation(format!("missing column '{required}'")));
        }
    }
    let idx = |name: &str| col(name);
    let (admission, first, last) = (idx("admission_no"), idx("first_name"), idx("last_name"));
    let (grade, class) = (idx("grade_level"), idx("class_name"));
    let (g_name, g_phone, g_email) = (idx("guardian_name"), idx("guardian_phone"), idx("guardian_email"));

    let mut parsed = ParsedSheet::default();
    for (i, line) in lines {
        let row_no = i + 1;
        if line.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if parsed.rows.len() + parsed.errors.len() == MAX_ROWS {
            return Err(ServiceError::validation(format!(
                "at most {MAX_ROWS} rows can be imported at once"
            )));
        }

        let get = |pos: Option<usize>| -> String {
            pos.and_then(|p| line.get(p)).map(|c| c.trim().to_string()).unwrap_or_default()
        };
        let opt = |pos: Option<usize>| -> Option<String> {
            Some(get(pos)).filter(|v| !v.is_empty())
        };

        let row = StudentImportRow {
            admission_no: get(admission),
            first_name: get(first),
            last_name: get(last),
            grade_level: opt(grade),
            class_name: opt(class),
            guardian_name: opt(g_name),
            guardian_phone: opt(g_phone),
            guardian_email: opt(g_email),
        };

        let missing: Vec<&str> = [
            ("admission_no", &row.admission_no),
            ("first_name", &row.first_name),
            ("last_name", &row.last_name),
        ]
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| *k)
        .collect();

        let error = if !missing.is_empty() {
            Some(format!("missing {}", missing.join(", ")))
        } else {
            too_long(&row)
        };
        match error {
            None => parsed.rows.push((row_no, row)),
            Some(error) => parsed.errors.push(ImportRowError { row: row_no, error }),
        }
    }
    Ok(parsed)
}

fn too_long(row: &StudentImportRow) -> Option<String> {
    let value = |name: &str| -> Option<&str> {
        match name {
            "admission_no" => Some(&row.admission_no),
            "first_name" => Some(&row.first_name),
            "last_name" => Some(&row.last_name),
            "grade_level" => row.grade_level.as_deref(),
            "class_name" => row.class_name.as_deref(),
            "guardian_name" => row.guardian_name.as_deref(),
            "guardian_phone" => row.guardian_phone.as_deref(),
            "guardian_email" => row.guardian_email.as_deref(),
            _ => None,
        }
    };
    let over: Vec<String> = MAX_LENGTHS
        .iter()
        .filter(|(name, max)| value(name).is_some_and(|v| v.chars().count() > *max))
        .map(|(name, max)| format!("{name} exceeds {max} characters"))
        .collect();
    (!over.is_empty()).then(|| over.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_map_by_header_name() {
        let data = b"First Name,Last Name,Admission_No,Class_Name,Guardian_Phone\n\
                     Ada,Okafor,A-001,Form 2, +254 712 345678\n\
                     ,,,,\n\
                     Obi,Eze,A-002,,\n";
        let parsed = parse(SheetFormat::Csv, data).unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 2);

        let (row_no, ada) = &parsed.rows[0];
        assert_eq!(*row_no, 2);
        assert_eq!(ada.admission_no, "A-001");
        assert_eq!(ada.class_name.as_deref(), Some("Form 2"));
        assert_eq!(ada.guardian_phone.as_deref(), Some("+254 712 345678"));

        let (row_no, obi) = &parsed.rows[1];
        assert_eq!(*row_no, 4);
        assert_eq!(obi.class_name, None);
    }

    #[test]
    fn incomplete_rows_are_reported_with_their_row_number() {
        let data = b"admission_no,first_name,last_name\nA-1,Ada,\nA-2,Obi,Eze\n";
        let parsed = parse(SheetFormat::Csv, data).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].row, 2);
        assert_eq!(parsed.errors[0].error, "missing last_name");
    }

    #[test]
    fn oversized_values_fail_only_their_row() {
        let long_phone = "1".repeat(33);
        let long_admission = "A".repeat(65);
        let data = format!(
            "admission_no,first_name,last_name,guardian_phone\n\
             A-1,Ada,Okafor,{long_phone}\n\
             {long_admission},Obi,Eze,\n\
             A-3,Chi,Nwosu,0712345678\n"
        );
        let parsed = parse(SheetFormat::Csv, data.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].0, 4);
        assert_eq!(parsed.errors.len(), 2);
        assert_eq!(parsed.errors[0].row, 2);
        assert_eq!(parsed.errors[0].error, "guardian_phone exceeds 32 characters");
        assert_eq!(parsed.errors[1].row, 3);
        assert_eq!(parsed.errors[1].error, "admission_no exceeds 64 characters");
    }

    #[test]
    fn widths_are_counted_in_characters() {
        let name = "é".repeat(128);
        let data = format!("admission_no,first_name,last_name\nA-1,{name},Eze\n");
        let parsed = parse(SheetFormat::Csv, data.as_bytes()).unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 1);
    }

    #[test]
    fn missing_required_column_rejects_file() {
        let data = b"admission_no,first_name\nA-1,Ada\n";
        assert!(parse(SheetFormat::Csv, data).is_err());
        assert!(parse(SheetFormat::Csv, b"").is_err());
    }

    #[test]
    fn format_detection() {
        assert_eq!(SheetFormat::detect("text/csv", "x"), Some(SheetFormat::Csv));
        assert_eq!(
            SheetFormat::detect("application/octet-stream", "students.xlsx"),
            Some(SheetFormat::Xlsx)
        );
        assert_eq!(SheetFormat::detect("", "students.csv"), Some(SheetFormat::Csv));
        assert_eq!(SheetFormat::detect("", "students.pdf"), None);
    }

    #[test]
    fn whole_floats_lose_their_decimal_point() {
        assert_eq!(cell_text(&Data::Float(254712345678.0)), "254712345678");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
