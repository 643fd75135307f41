use halshare_core::{DeviceAddress, TimestampedRecord};
use halshare_reader::{CsvSink, RecordSink};
use jiff::civil::date;
use jiff::tz::TimeZone;

fn record(wearer: &str, minute: i8, temperature_celsius: f64) -> TimestampedRecord {
    TimestampedRecord {
        wearer_name: wearer.into(),
        device_id: DeviceAddress::new("ED:8D:55:08:F0:95"),
        timestamp: date(2024, 1, 1)
            .at(9, minute, 0, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap(),
        temperature_celsius,
    }
}

#[tokio::test]
async fn writes_header_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let sink = CsvSink::new(&path);

    let stored = sink
        .store_records(&[record("test", 50, 27.5), record("test", 55, 28.0)])
        .await
        .unwrap();

    assert_eq!(stored, 2);
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#""halshareWearerName","halshareId","datetime","temperature""#,
            r#""test","ED:8D:55:08:F0:95","2024/01/01 09:50:00",27.5"#,
            r#""test","ED:8D:55:08:F0:95","2024/01/01 09:55:00",28.0"#,
        ]
    );
}

#[tokio::test]
async fn empty_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.csv");

    let stored = CsvSink::new(&path).store_records(&[]).await.unwrap();

    assert_eq!(stored, 0);
    assert!(!path.exists());
}

#[tokio::test]
async fn overwrites_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    std::fs::write(&path, "stale").unwrap();

    CsvSink::new(&path)
        .store_records(&[record("o\"brien", 0, 36.9375)])
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(!content.contains("stale"));
    assert!(content.contains(r#""o""brien","ED:8D:55:08:F0:95","2024/01/01 09:00:00",36.9375"#));
}

#[tokio::test]
async fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.csv");

    let result = CsvSink::new(&path)
        .store_records(&[record("test", 0, 30.0)])
        .await;

    assert!(result.is_err());
}
