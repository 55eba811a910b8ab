#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{BooleanArray, Float32Array, Int16Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};
use h5frame_core::storage::{
    ColumnType, GroupId, H5File, StorageKind, StorageOptions, TableDescription, Value,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// One air quality observation: (day of April 2024, aqi, city, safe).
pub type AirRow = (u32, i16, &'static str, bool);

pub const DENVER: [AirRow; 2] = [(25, 412, "Denver", false), (26, 413, "Denver", false)];
pub const BUENOS_AIRES: [AirRow; 2] = [
    (25, 35, "Buenos Aires", true),
    (26, 36, "Buenos Aires", true),
];
pub const OZONE_AQI: [i64; 5] = [12, 14, 17, 14, 14];

pub fn april_2024(day: u32) -> i32 {
    let ts = Utc
        .with_ymd_and_hms(2024, 4, day, 0, 0, 0)
        .single()
        .expect("valid date")
        .timestamp();
    i32::try_from(ts).expect("fits in i32")
}

fn fixed(kind: StorageKind) -> ColumnType {
    ColumnType::fixed(kind).expect("fixed width kind")
}

fn air_quality_description() -> TableDescription {
    TableDescription::new(vec![
        ("timestamp".to_string(), fixed(StorageKind::Int32).at(0)),
        ("aqi".to_string(), fixed(StorageKind::Int16).at(1)),
        ("city".to_string(), ColumnType::string(16).at(2)),
        ("safe".to_string(), fixed(StorageKind::Bool).at(3)),
    ])
    .expect("valid description")
}

fn write_air_quality(file: &mut H5File, group: GroupId, rows: &[AirRow]) -> TestResult {
    let mut writer = file.create_table(group, "air_quality", air_quality_description())?;
    for (day, aqi, city, safe) in rows {
        writer
            .row()
            .set("timestamp", &Value::Int(april_2024(*day).into()))?;
        writer.row().set("aqi", &Value::Int((*aqi).into()))?;
        writer.row().set("city", &Value::Str(city.to_string()))?;
        writer.row().set("safe", &Value::Bool(*safe))?;
        writer.append()?;
    }
    writer.flush()?;
    Ok(())
}

/// `air_quality.h5`: a root table with every observation, plus
/// `/country/ar` (table and `ozone_aqi` array) and `/country/us` (table).
pub fn air_quality_file(dir: &Path) -> TestResult<PathBuf> {
    let path = dir.join("air_quality.h5");
    let mut file = H5File::create_truncate(&path, &StorageOptions::default())?;
    let root = file.root();

    let all: Vec<AirRow> = DENVER.iter().chain(BUENOS_AIRES.iter()).copied().collect();
    write_air_quality(&mut file, root, &all)?;

    let country = file.create_group(root, "country")?;
    let ar = file.create_group(country, "ar")?;
    write_air_quality(&mut file, ar, &BUENOS_AIRES)?;
    let ozone: Vec<Value> = OZONE_AQI.iter().map(|v| Value::Int(*v)).collect();
    file.create_array(ar, "ozone_aqi", fixed(StorageKind::Int64), &ozone)?;

    let us = file.create_group(country, "us")?;
    write_air_quality(&mut file, us, &DENVER)?;

    file.close()?;
    Ok(path)
}

pub fn air_quality_frame(rows: &[AirRow]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int32, false),
        Field::new("aqi", DataType::Int16, false),
        Field::new("city", DataType::Utf8, false),
        Field::new("safe", DataType::Boolean, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from_iter_values(
                rows.iter().map(|r| april_2024(r.0)),
            )),
            Arc::new(Int16Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.2))),
            Arc::new(BooleanArray::from(
                rows.iter().map(|r| r.3).collect::<Vec<_>>(),
            )),
        ],
    )
    .expect("valid batch")
}

const BILLIONAIRES: [(&str, i16, f32); 3] = [
    ("Bernard Arnault", 75, 213.5),
    ("Jeff Bezos", 60, 197.6),
    ("Elon Musk", 52, 191.1),
];

/// `billionaires.h5`: a single root table.
pub fn billionaires_file(dir: &Path) -> TestResult<PathBuf> {
    let path = dir.join("billionaires.h5");
    let mut file = H5File::create_truncate(&path, &StorageOptions::default())?;
    let root = file.root();
    let description = TableDescription::new(vec![
        ("name".to_string(), ColumnType::string(32).at(0)),
        ("age".to_string(), fixed(StorageKind::Int16).at(1)),
        ("net_worth_usd".to_string(), fixed(StorageKind::Float32).at(2)),
    ])?;
    let mut writer = file.create_table(root, "billionaires", description)?;
    for (name, age, net_worth) in BILLIONAIRES {
        writer.row().set("name", &Value::Str(name.to_string()))?;
        writer.row().set("age", &Value::Int(age.into()))?;
        writer.row().set("net_worth_usd", &Value::Float(net_worth.into()))?;
        writer.append()?;
    }
    writer.flush()?;
    file.close()?;
    Ok(path)
}

pub fn billionaires_frame() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("age", DataType::Int16, false),
        Field::new("net_worth_usd", DataType::Float32, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(
                BILLIONAIRES.iter().map(|b| b.0),
            )),
            Arc::new(Int16Array::from_iter_values(BILLIONAIRES.iter().map(|b| b.1))),
            Arc::new(Float32Array::from_iter_values(
                BILLIONAIRES.iter().map(|b| b.2),
            )),
        ],
    )
    .expect("valid batch")
}
