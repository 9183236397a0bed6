use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

use sidra_loader::LoadError;
use sidra_loader::naming::normalize_identifiers;
use sidra_loader::processing::{PivotOptions, pivot, synthesize};
use sidra_loader::storage::RESERVED_COLUMNS;
use sidra_loader::types::{DataType, RawRecord, RunMetadata, Value};

fn metadata(geo: &str) -> RunMetadata {
    RunMetadata {
        table_id: "5918".to_string(),
        extracted_at: NaiveDate::from_ymd_opt(2024, 8, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
        geo_partition: geo.to_string(),
    }
}

fn sidra(v: &str, variable: &str, period: &str, place: &str) -> RawRecord {
    let mut dims = BTreeMap::new();
    dims.insert("V".to_string(), v.to_string());
    dims.insert("D1N".to_string(), variable.to_string());
    dims.insert("D2N".to_string(), period.to_string());
    dims.insert("D3N".to_string(), place.to_string());
    RawRecord::new(dims, metadata("n3"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[test]
fn men_women_scenario_drops_invalid_measurement() {
    let rec = |v: &str, cat: &str, ent: &str| {
        let mut d = BTreeMap::new();
        d.insert("value".to_string(), v.to_string());
        d.insert("category".to_string(), cat.to_string());
        d.insert("entity".to_string(), ent.to_string());
        RawRecord::new(d, metadata("n1"))
    };
    let opts = PivotOptions {
        key_dimensions: vec!["entity".into()],
        pivot_dimension: "category".into(),
        value_field: "value".into(),
        ..Default::default()
    };

    let wide = pivot(&[rec("12.5", "Men", "A"), rec("7.0", "Women", "A"), rec("bad", "Men", "B")], &opts)
        .unwrap();

    assert_eq!(wide.row_count(), 1);
    assert_eq!(wide.cell(0, "entity"), Some(&Value::Utf8("A".into())));
    assert_eq!(wide.cell(0, "men"), Some(&Value::Float64(12.5)));
    assert_eq!(wide.cell(0, "women"), Some(&Value::Float64(7.0)));
}

#[test]
fn sidra_layout_pivots_states_by_quarter() {
    let records = vec![
        sidra("100", "Pessoas ocupadas", "2024T1", "São Paulo"),
        sidra("8.1", "Taxa de desocupação", "2024T1", "São Paulo"),
        sidra("50", "Pessoas ocupadas", "2024T1", "Ceará"),
        sidra("..", "Taxa de desocupação", "2024T1", "Ceará"),
        sidra("101", "Pessoas ocupadas", "2024T2", "São Paulo"),
        sidra("999", "Pessoas ocupadas", "2024T1", "São Paulo"),
    ];
    let opts = PivotOptions {
        reserved_names: RESERVED_COLUMNS.iter().map(|s| s.to_string()).collect(),
        ..PivotOptions::default()
    };
    let wide = pivot(&records, &opts).unwrap();

    // One row per distinct (period, place) key; columns = 5 keys + 2 variables.
    assert_eq!(wide.row_count(), 3);
    assert_eq!(wide.column_count(), 7);
    assert!(wide.rows.iter().all(|r| r.len() == 7));

    // First occurrence wins for São Paulo 2024T1.
    assert_eq!(wide.cell(0, "pessoas_ocupadas"), Some(&Value::Int64(100)));
    // Ceará's rate was a placeholder: filled with zero.
    assert_eq!(wide.cell(1, "taxa_de_desocupacao"), Some(&Value::Int64(0)));
    assert_eq!(wide.cell(2, "taxa_de_desocupacao"), Some(&Value::Int64(0)));
    assert_eq!(wide.cell(1, "d3n"), Some(&Value::Utf8("Ceará".into())));

    let specs = synthesize(&wide);
    let types: Vec<(&str, DataType)> = specs.iter().map(|c| (c.name.as_str(), c.data_type)).collect();
    assert_eq!(
        types,
        vec![
            ("d2n", DataType::Text),
            ("d3n", DataType::Text),
            ("tabela_id", DataType::Text),
            ("data_extracao", DataType::Timestamp),
            ("nivel_geografico", DataType::Text),
            ("pessoas_ocupadas", DataType::Integer),
            ("taxa_de_desocupacao", DataType::Float),
        ]
    );
}

#[test]
fn pivot_twice_is_identical() {
    let records: Vec<RawRecord> = (0..50)
        .map(|i| {
            sidra(
                &format!("{}", i * 3),
                &format!("Var {}", i % 7),
                &format!("2024T{}", i % 4),
                if i % 2 == 0 { "A" } else { "B" },
            )
        })
        .collect();
    let a = pivot(&records, &PivotOptions::default()).unwrap();
    let b = pivot(&records, &PivotOptions::default()).unwrap();
    assert_eq!(a, b);
    assert!(a.row_count() <= 8);
    assert_eq!(a.column_count(), 5 + 7);
}

#[test]
fn labels_colliding_with_surrogates_are_renamed() {
    let records = vec![sidra("1", "ID", "2024T1", "A"), sidra("2", "Created-At", "2024T1", "A")];
    let opts = PivotOptions {
        reserved_names: RESERVED_COLUMNS.iter().map(|s| s.to_string()).collect(),
        ..PivotOptions::default()
    };
    let wide = pivot(&records, &opts).unwrap();
    let names: Vec<&str> = wide.schema.column_names().collect();
    assert!(names.contains(&"id_2"));
    assert!(names.contains(&"created_at_2"));
    assert!(!names.iter().any(|n| RESERVED_COLUMNS.contains(n)));
}

#[test]
fn mismatch_and_empty_inputs() {
    let mut incomplete = sidra("1", "x", "2024T1", "A");
    incomplete.dimensions.remove("D2N");
    let err = pivot(&[incomplete], &PivotOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::SchemaMismatch { .. }));

    let err = pivot(&[sidra("", "x", "2024T1", "A")], &PivotOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::EmptyResult { .. }));
}

#[test]
fn normalized_batches_hold_identifier_invariants() {
    let inputs: Vec<String> = vec![
        "Condição de Ocupação".into(),
        "Condição de Ocupação".into(),
        "".into(),
        "1º trimestre".into(),
        "Variação (%) - 12 meses".into(),
        "variacao_12_meses".into(),
        "!!!".into(),
        "a".repeat(200),
        "a".repeat(201),
    ];
    for max in [16usize, 20, 64, 128] {
        let out = normalize_identifiers(&inputs, max, &["id", "created_at"]);
        assert_eq!(out.len(), inputs.len());
        let unique: HashSet<&String> = out.iter().collect();
        assert_eq!(unique.len(), out.len(), "duplicates at max {max}: {out:?}");
        for name in &out {
            assert!(is_identifier(name), "{name:?}");
            assert!(name.len() <= max, "{name:?} longer than {max}");
        }
    }

    let out = normalize_identifiers(["Condição de Ocupação", "Condição de Ocupação", ""], 20, &[]);
    assert_eq!(out[2], "col_2");
    assert_ne!(out[0], out[1]);
}
