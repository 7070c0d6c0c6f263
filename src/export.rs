//! CSV and XLSX encoding of inventory rows for download.

use std::str::FromStr;

use actix_web::web::Bytes;
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::{errors::AppError, structs::InventoryRecord};

pub const HEADERS: [&str; 11] = [
    "Organization",
    "Item Category",
    "Model Number",
    "Attribute",
    "Size",
    "Quantity",
    "Daily Use",
    "Projected Daily Use",
    "Projected Run-Out Date",
    "Date Submitted (UTC)",
    "Comments",
];

const RUN_OUT_COLUMN: u16 = 8;
const TIMESTAMP_COLUMN: u16 = 9;
const XLSX_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(AppError::BadRequest(format!(
                "Unsupported export format: {}. Use csv or xlsx.",
                other
            ))),
        }
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    /// Encodes `rows` into body chunks ready to be streamed.
    pub fn encode(&self, rows: &[InventoryRecord]) -> Result<Vec<Bytes>, AppError> {
        match self {
            ExportFormat::Csv => csv_chunks(rows),
            ExportFormat::Xlsx => {
                let buffer = xlsx_workbook(rows)?;
                Ok(buffer
                    .chunks(XLSX_CHUNK_SIZE)
                    .map(Bytes::copy_from_slice)
                    .collect())
            }
        }
    }
}

pub fn filename(local_today: NaiveDate, format: ExportFormat) -> String {
    format!(
        "ppetrackr_data__{}.{}",
        local_today.format("%Y-%m-%d"),
        format.extension()
    )
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_record(row: &InventoryRecord) -> [String; 11] {
    [
        row.organization_name.clone(),
        row.item_type.label().to_string(),
        row.item_number.clone(),
        row.item_attribute.clone(),
        row.size.clone(),
        row.number.to_string(),
        optional(row.daily_use),
        optional(row.projected_daily_use),
        optional(row.projected_run_out.map(|d| d.format("%Y-%m-%d"))),
        row.timestamp.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string(),
        row.comments.clone(),
    ]
}

fn csv_line<I, T>(record: I) -> Result<Bytes, AppError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(record)
        .map_err(|e| AppError::ExportError(e.to_string()))?;
    let buffer = writer
        .into_inner()
        .map_err(|e| AppError::ExportError(e.to_string()))?;
    Ok(Bytes::from(buffer))
}

/// Header plus one chunk per row.
fn csv_chunks(rows: &[InventoryRecord]) -> Result<Vec<Bytes>, AppError> {
    let mut chunks = Vec::with_capacity(rows.len() + 1);
    chunks.push(csv_line(HEADERS)?);
    for row in rows {
        chunks.push(csv_line(csv_record(row))?);
    }
    Ok(chunks)
}

fn xlsx_workbook(rows: &[InventoryRecord]) -> Result<Vec<u8>, AppError> {
    build_workbook(rows).map_err(|e| AppError::ExportError(e.to_string()))
}

fn build_workbook(rows: &[InventoryRecord]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let run_out_format = Format::new().set_num_format("yyyy-mm-dd");
    let timestamp_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss.000");

    {
        let sheet = workbook.add_worksheet();
        for (col, title) in HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header_format)?;
        }
        sheet.set_column_width(RUN_OUT_COLUMN, 14)?;
        sheet.set_column_width(TIMESTAMP_COLUMN, 24)?;

        for (i, row) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, row.organization_name.as_str())?;
            sheet.write_string(r, 1, row.item_type.label())?;
            sheet.write_string(r, 2, row.item_number.as_str())?;
            sheet.write_string(r, 3, row.item_attribute.as_str())?;
            sheet.write_string(r, 4, row.size.as_str())?;
            sheet.write_number(r, 5, row.number as f64)?;
            if let Some(daily_use) = row.daily_use {
                sheet.write_number(r, 6, daily_use as f64)?;
            }
            if let Some(projected) = row.projected_daily_use {
                sheet.write_number(r, 7, projected as f64)?;
            }
            if let Some(run_out) = &row.projected_run_out {
                sheet.write_datetime_with_format(r, RUN_OUT_COLUMN, run_out, &run_out_format)?;
            }
            sheet.write_datetime_with_format(
                r,
                TIMESTAMP_COLUMN,
                &row.timestamp.naive_utc(),
                &timestamp_format,
            )?;
            sheet.write_string(r, 10, row.comments.as_str())?;
        }
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::structs::PpeCategory;
    use chrono::{TimeZone, Utc};

    fn record() -> InventoryRecord {
        InventoryRecord {
            id: 1,
            organization_id: 2,
            organization_name: "Mercy, Downtown".into(),
            user_id: 3,
            ppe_type_id: 4,
            item_type: PpeCategory::N95Mask,
            item_attribute: "Standard".into(),
            size: "Regular".into(),
            number: 120,
            item_number: "1860".into(),
            daily_use: Some(10),
            projected_daily_use: None,
            projected_run_out: NaiveDate::from_ymd_opt(2024, 2, 1),
            comments: "low on smalls".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_format_parsing_rejects_unknown() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert!(matches!(
            "pdf".parse::<ExportFormat>(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_filename_uses_local_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(filename(today, ExportFormat::Csv), "ppetrackr_data__2024-03-09.csv");
        assert_eq!(filename(today, ExportFormat::Xlsx), "ppetrackr_data__2024-03-09.xlsx");
    }

    #[test]
    fn test_csv_columns_in_fixed_order() {
        let chunks = ExportFormat::Csv.encode(&[record()]).unwrap();
        assert_eq!(chunks.len(), 2);
        let body: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        let text = String::from_utf8(body).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Organization,Item Category,Model Number,Attribute,Size,Quantity,Daily Use,\
             Projected Daily Use,Projected Run-Out Date,Date Submitted (UTC),Comments"
        );
        assert_eq!(
            lines.next().unwrap(),
            "\"Mercy, Downtown\",N95 Masks,1860,Standard,Regular,120,10,,2024-02-01,\
             2024-01-15 08:30:00.000000+00:00,low on smalls"
        );
    }

    #[test]
    fn test_xlsx_is_a_zip_container() {
        let chunks = ExportFormat::Xlsx.encode(&[record()]).unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(&chunks[0][..2], b"PK");
    }

    fn xlsx_part(buffer: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(buffer)).unwrap();
        let mut part = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut part)
            .unwrap();
        part
    }

    /// Index into `cellXfs` of the style using the number format `code`.
    fn xf_index_for(styles: &str, code: &str) -> usize {
        let styles = styles.replace('\\', "");
        let at = styles
            .find(&format!("formatCode=\"{}\"", code))
            .unwrap_or_else(|| panic!("no numFmt {}", code));
        let tag = &styles[styles[..at].rfind("<numFmt ").unwrap()..at];
        let id = tag
            .split("numFmtId=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();

        let xfs = styles.split("<cellXfs").nth(1).unwrap();
        let xfs = xfs.split("</cellXfs>").next().unwrap();
        xfs.split("<xf ")
            .skip(1)
            .position(|xf| xf.contains(&format!("numFmtId=\"{}\"", id)))
            .unwrap_or_else(|| panic!("no cell style uses numFmt {}", id))
    }

    fn cell_style(sheet: &str, cell: &str) -> String {
        let at = sheet.find(&format!("r=\"{}\"", cell)).unwrap();
        let tag = &sheet[at..at + sheet[at..].find('>').unwrap()];
        tag.split("s=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or("0")
            .to_string()
    }

    #[test]
    fn test_xlsx_dates_and_timestamps_use_distinct_formats() {
        let buffer: Vec<u8> = ExportFormat::Xlsx
            .encode(&[record()])
            .unwrap()
            .iter()
            .flat_map(|c| c.to_vec())
            .collect();
        let styles = xlsx_part(&buffer, "xl/styles.xml");
        let sheet = xlsx_part(&buffer, "xl/worksheets/sheet1.xml");

        let date_xf = xf_index_for(&styles, "yyyy-mm-dd");
        let datetime_xf = xf_index_for(&styles, "yyyy-mm-dd hh:mm:ss.000");
        assert_ne!(date_xf, datetime_xf);

        // Row 2 holds the record; column 8 is I and column 9 is J.
        assert_eq!(cell_style(&sheet, "I2"), date_xf.to_string());
        assert_eq!(cell_style(&sheet, "J2"), datetime_xf.to_string());
    }
}
