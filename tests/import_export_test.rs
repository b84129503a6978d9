use tempfile::tempdir;

use tracker::backup::{self, Workbook};
use tracker::export::{export_filename, to_csv};
use tracker::grid::GridStore;
use tracker::import::{ImportError, from_csv_str, load_table};
use tracker::record::RowRecord;
use tracker::schema::RowVariant;

fn contractors() -> Vec<RowRecord> {
    let rows = vec![
        RowRecord::from_pairs(
            RowVariant::ContractorList,
            [
                ("efile", "EF/2024/17"),
                ("contractor", "Acme, Ltd"),
                ("description", "Annual \"AMC\" for pumps"),
                ("value", "1,20,000"),
                ("gst", "18%"),
                ("startDate", "2024-01-01"),
                ("endDate", "2025-12-31"),
            ],
        ),
        RowRecord::from_pairs(
            RowVariant::ContractorList,
            [("contractor", "Bolt Works"), ("endDate", "2025-06-30")],
        ),
    ];
    GridStore::from_rows(RowVariant::ContractorList, rows).into_rows()
}

#[test]
fn exported_csv_imports_back() {
    println!("\n====== Testing CSV export and import ======");
    let rows = contractors();
    let csv = to_csv(RowVariant::ContractorList, &rows);
    let report = from_csv_str(RowVariant::ContractorList, &csv).unwrap();

    assert_eq!(report.skipped, 0);
    assert!(report.unmapped_columns.is_empty());
    assert_eq!(report.rows.len(), 2);
    for (imported, original) in report.rows.iter().zip(&rows) {
        assert_eq!(imported.sno, original.sno);
        for field in ["efile", "contractor", "description", "value", "gst", "startDate", "endDate"] {
            assert_eq!(imported.get(field), original.get(field), "field {}", field);
        }
    }
    println!("✓ Quoted commas and quotes survive a CSV round trip");
}

#[test]
fn multi_line_descriptions_survive_a_round_trip() {
    let rows = GridStore::from_rows(
        RowVariant::ContractorList,
        vec![
            RowRecord::from_pairs(
                RowVariant::ContractorList,
                [("contractor", "Acme"), ("description", "line one\nline two, \"quoted\"")],
            ),
            RowRecord::from_pairs(RowVariant::ContractorList, [("contractor", "Bolt")]),
        ],
    )
    .into_rows();

    let csv = to_csv(RowVariant::ContractorList, &rows).replace('\n', "\r\n");
    let report = from_csv_str(RowVariant::ContractorList, &csv).unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(report.rows.len(), 2);
    assert_eq!(report.rows[0].get("description"), "line one\r\nline two, \"quoted\"");
    assert_eq!(report.rows[1].get("contractor"), "Bolt");

    let report = from_csv_str(RowVariant::ContractorList, &to_csv(RowVariant::ContractorList, &rows)).unwrap();
    assert_eq!(report.rows[0].get("description"), "line one\nline two, \"quoted\"");
    println!("✓ Line breaks inside quoted values are kept");
}

#[test]
fn database_style_headers_are_recognized() {
    let text = "id,e_file_no,contractor,po_no,bg_no,bg_date,bg_amount,bg_validity,gem_bid_no,notes\n\
                1,,Acme,PO-1,BG-1,01/04/2024,\"5,00,000\",45657,GEM-9,ignored\n";
    let report = from_csv_str(RowVariant::Epbg, text).unwrap();
    assert_eq!(report.rows.len(), 1);
    let row = &report.rows[0];
    assert_eq!(row.get("bgDate"), "2024-04-01");
    assert_eq!(row.get("bgValidity"), "2024-12-31");
    assert_eq!(row.get("gemBid"), "GEM-9");
    assert_eq!(row.amount("bgAmount"), Some(500000.0));
    assert!(report.unmapped_columns.contains(&"notes".to_string()));
}

#[test]
fn malformed_rows_are_counted_not_fatal() {
    let text = "Contractor,Approved Amount,Bill Due Date\n\
                Acme,1000,2024-05-01\n\
                Bolt,lots,2024-05-01\n\
                Core,2000,next week\n\
                \n\
                Dyne,3000,2024-06-01\n";
    let report = from_csv_str(RowVariant::BillTracker, text).unwrap();
    let names: Vec<&str> = report.rows.iter().map(|r| r.get("contractor")).collect();
    assert_eq!(names, ["Acme", "Dyne"]);
    assert_eq!(report.skipped, 2);
}

#[test]
fn header_without_known_columns_is_rejected() {
    assert!(matches!(
        from_csv_str(RowVariant::Epbg, "foo,bar\n1,2\n"),
        Err(ImportError::NoRecognizedColumns(RowVariant::Epbg))
    ));
    assert!(matches!(from_csv_str(RowVariant::Epbg, "\n\n"), Err(ImportError::Empty)));
}

#[test]
fn load_table_picks_the_reader_by_extension() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join(export_filename(RowVariant::ContractorList, "csv"));
    std::fs::write(&csv_path, to_csv(RowVariant::ContractorList, &contractors())).unwrap();

    let report = load_table(RowVariant::ContractorList, &csv_path).unwrap();
    assert_eq!(report.rows.len(), 2);

    let txt = dir.path().join("rows.txt");
    std::fs::write(&txt, "x").unwrap();
    assert!(matches!(
        load_table(RowVariant::ContractorList, &txt),
        Err(ImportError::Unsupported(_))
    ));
}

#[cfg(feature = "web")]
#[test]
fn exported_xlsx_imports_back() {
    use tracker::export::to_xlsx;
    use tracker::import::from_excel_bytes;

    let rows = contractors();
    let bytes = to_xlsx(RowVariant::ContractorList, &rows).unwrap();
    let report = from_excel_bytes(RowVariant::ContractorList, &bytes).unwrap();

    assert_eq!(report.rows.len(), 2);
    assert_eq!(report.rows[0].get("contractor"), "Acme, Ltd");
    assert_eq!(report.rows[0].amount("value"), Some(120000.0));
    assert_eq!(report.rows[1].get("endDate"), "2025-06-30");
    println!("✓ XLSX export reads back through the Excel importer");
}

#[test]
fn workbook_backup_restores_every_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tracker.bin.gz");

    let workbook = Workbook {
        saved_at: None,
        contractors: contractors(),
        bills: vec![RowRecord::from_pairs(RowVariant::BillTracker, [("contractor", "Acme")])],
        epbg: Vec::new(),
    };
    backup::save_workbook(&workbook, &path).unwrap();
    let restored = backup::load_workbook(&path).unwrap();

    assert_eq!(restored, workbook);
    assert_eq!(restored.row_count(), 3);
    assert_eq!(restored.table(RowVariant::Epbg).len(), 0);
    println!("✓ Backup file restores all three tables");
}
