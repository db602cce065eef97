//! Import bars from CSV into a store and read them back as a frame.

use accrete_data::frame::{entity_groups, f64_values, frame_to_records, timestamps};
use accrete_data::import::read_bars;
use accrete_data::model::parse_timestamp;
use accrete_data::{Column, EntitySelection, OnConflict, SqliteStore, TimeSeriesStore};

const CSV: &str = "\
entity_id,timestamp,open,high,low,close,volume
stock_sz_000002,2024-01-02,20.0,21.0,19.0,20.5,300
stock_sz_000001,2024-01-03,10.5,12.0,10.0,11.5,200
stock_sz_000001,2024-01-02,10.0,11.0,9.5,10.5,100
stock_sh_600000,2024-01-02,8.0,8.5,7.5,8.2,50
";

#[test]
fn test_csv_import_to_frame() {
    let store = SqliteStore::in_memory().unwrap();
    let bars = read_bars(CSV.as_bytes()).unwrap();
    assert_eq!(store.upsert_bars(&bars).unwrap(), 4);

    let selection = EntitySelection {
        exchanges: vec!["sz".to_string()],
        ..Default::default()
    };
    let ids = selection.resolve(&store.entity_ids().unwrap());
    assert_eq!(ids, vec!["stock_sz_000001".to_string(), "stock_sz_000002".to_string()]);

    let df = store
        .query_time_series(&ids, None, None, &[Column::Close, Column::Volume])
        .unwrap();
    let groups = entity_groups(&df).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len, 2);
    assert_eq!(
        timestamps(&df).unwrap()[1],
        parse_timestamp("2024-01-03").unwrap()
    );
    assert_eq!(
        f64_values(&df, "volume").unwrap(),
        vec![Some(100.0), Some(200.0), Some(300.0)]
    );
}

#[test]
fn test_factor_rows_survive_store_round_trip() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_bars(&read_bars(CSV.as_bytes()).unwrap()).unwrap();
    let ids = store.entity_ids().unwrap();
    let df = store.query_time_series(&ids, None, None, &[]).unwrap();

    store
        .upsert_factor_result("raw", &df, OnConflict::SkipExisting)
        .unwrap();
    let back = store.query_factor_result("raw", &ids, None, None).unwrap();

    assert_eq!(frame_to_records(&back).unwrap(), frame_to_records(&df).unwrap());
}
