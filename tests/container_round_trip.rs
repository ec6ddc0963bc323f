use hdf5::types::TypeDescriptor;
use telemetry_store::container::format::HDF5_SIGNATURE;
use telemetry_store::container::WriterOptions;
use telemetry_store::decode::DecodedMessage;
use telemetry_store::ingest::discover;
use telemetry_store::{
    ContainerReader, ContainerWriter, DecodedSignal, Error, VariableCatalog, VariableRef,
};
use tempfile::tempdir;

fn signal(timestamp: i64, name: &str, value: f64) -> DecodedSignal {
    DecodedSignal {
        timestamp,
        sender: "ECU".to_string(),
        message: "Engine".to_string(),
        name: name.to_string(),
        value,
        unit: String::new(),
    }
}

fn message(timestamp: i64, signals: &[(&str, f64)]) -> DecodedMessage {
    DecodedMessage {
        timestamp,
        id: 0x100,
        name: "Engine".to_string(),
        sender: "ECU".to_string(),
        signals: signals
            .iter()
            .map(|(name, value)| signal(timestamp, name, *value))
            .collect(),
    }
}

fn catalog() -> VariableCatalog {
    VariableCatalog::new(vec![
        VariableRef::new(11, "rpm"),
        VariableRef::new(12, "coolant"),
        VariableRef::new(13, "speed"),
        VariableRef::new(14, "unused"),
    ])
    .expect("catalog")
}

/// 2500 rows with a sparse mix of values, some shared timestamps.
fn stream() -> Vec<DecodedMessage> {
    let mut messages = Vec::new();
    for row in 0..2500i64 {
        let ts = 1_000 + row * 20;
        messages.push(message(ts, &[("rpm", row as f64 * 0.25)]));
        if row % 3 == 0 {
            messages.push(message(ts, &[("coolant", -40.0 + row as f64)]));
        }
        if row % 7 == 0 {
            messages.push(message(ts, &[("speed", f64::from_bits(0x4059_0000_0000_0001))]));
        }
    }
    messages
}

#[test]
fn shape_matches_discovery_and_values_round_trip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("1.h5");
    let messages = stream();
    let discovery = discover(messages.clone(), &catalog());
    assert_eq!(discovery.rows(), 2500);
    assert_eq!(discovery.columns(), 3);

    let options = WriterOptions {
        window: 1000,
        compression_level: 4,
    };
    let mut writer =
        ContainerWriter::create_with_options(&path, &discovery, options).expect("create");
    for msg in &messages {
        writer.write_message(msg).expect("write");
    }
    let summary = writer.finish().expect("finish");
    assert_eq!(summary.rows, 2500);
    assert_eq!(summary.columns, 3);
    assert_eq!(summary.chunks_written, 3);

    let reader = ContainerReader::open(&path).expect("open");
    assert_eq!(reader.row_count(), 2500);
    assert_eq!(reader.column_count(), 3);
    assert_eq!(reader.variables(), &[11, 12, 13]);
    assert_eq!(reader.names(), &["rpm", "coolant", "speed"]);
    assert_eq!(reader.start(), 1_000);
    assert_eq!(reader.end(), 1_000 + 2499 * 20);
    assert_eq!(reader.timestamps()[1], 1_020);
    assert_eq!(reader.times().count(), 2500);

    let matrix = reader.read(&[11, 12, 13]).expect("read");
    assert_eq!(matrix.rows(), 2500);
    for row in 0..2500usize {
        assert_eq!(matrix.get(row, 0).to_bits(), (row as f64 * 0.25).to_bits());
        if row % 3 == 0 {
            assert_eq!(matrix.get(row, 1), -40.0 + row as f64);
        } else {
            assert!(matrix.get(row, 1).is_nan());
        }
        if row % 7 == 0 {
            assert_eq!(matrix.get(row, 2).to_bits(), 0x4059_0000_0000_0001);
        } else {
            assert!(matrix.get(row, 2).is_nan());
        }
    }
}

#[test]
fn absent_variable_reads_as_nan_column() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("2.h5");
    let messages = stream();
    let discovery = discover(messages.clone(), &catalog());
    let mut writer = ContainerWriter::create(&path, &discovery).expect("create");
    for msg in &messages {
        writer.write_message(msg).expect("write");
    }
    writer.finish().expect("finish");

    let reader = ContainerReader::open(&path).expect("open");
    let matrix = reader.read(&[13, 14, 999, 11]).expect("read");
    assert_eq!(matrix.cols(), 4);
    assert!(matrix.column(1).iter().all(|v| v.is_nan()));
    assert!(matrix.column(2).iter().all(|v| v.is_nan()));
    assert_eq!(matrix.get(4, 3), 1.0);

    let empty = reader.read(&[]).expect("read nothing");
    assert_eq!(empty.cols(), 0);
}

#[test]
fn file_is_hdf5_with_the_shared_layout() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("3.h5");
    let messages = stream();
    let discovery = discover(messages.clone(), &catalog());
    let mut writer = ContainerWriter::create(&path, &discovery).expect("create");
    for msg in &messages {
        writer.write_message(msg).expect("write");
    }
    writer.finish().expect("finish");

    let bytes = std::fs::read(&path).expect("read file");
    assert_eq!(bytes[..8], HDF5_SIGNATURE);

    let file = hdf5::File::open(&path).expect("hdf5 open");
    let data = file.dataset("data").expect("data");
    assert_eq!(data.shape(), vec![2500, 3]);
    assert_eq!(data.chunk(), Some(vec![1000, 3]));
    let names = file.dataset("variables/names").expect("names");
    assert_eq!(
        names.dtype().expect("dtype").to_descriptor().expect("descriptor"),
        TypeDescriptor::FixedAscii(7)
    );
    assert_eq!(
        file.dataset("variables/ids")
            .expect("ids")
            .read_raw::<i32>()
            .expect("read ids"),
        vec![11, 12, 13]
    );
    assert_eq!(
        file.dataset("timestamps").expect("timestamps").shape(),
        vec![2500]
    );
    assert_eq!(
        file.attr("start").expect("start").read_scalar::<i64>().expect("i64"),
        1_000
    );
    assert_eq!(
        file.attr("end").expect("end").read_scalar::<i64>().expect("i64"),
        1_000 + 2499 * 20
    );
}

/// Files already in the archive were written contiguously with names sized to
/// their own longest entry.
#[test]
fn reads_containers_written_by_other_tools() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("5.h5");
    {
        let file = hdf5::File::create(&path).expect("create");
        let data = file
            .new_dataset::<f64>()
            .shape((3, 2))
            .fill_value(f64::NAN)
            .create("data")
            .expect("data");
        data.write_slice(
            ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]).view(),
            ndarray::s![0..2, ..],
        )
        .expect("write rows");
        let variables = file.create_group("variables").expect("group");
        let names = [
            hdf5::types::FixedAscii::<8>::from_ascii("speed").expect("ascii"),
            hdf5::types::FixedAscii::<8>::from_ascii("soc").expect("ascii"),
        ];
        variables
            .new_dataset_builder()
            .with_data_as(names.as_slice(), &TypeDescriptor::FixedAscii(5))
            .create("names")
            .expect("names");
        variables
            .new_dataset_builder()
            .with_data([4i32, 9].as_slice())
            .create("ids")
            .expect("ids");
        file.new_dataset_builder()
            .with_data([100i64, 200, 300].as_slice())
            .create("timestamps")
            .expect("timestamps");
        for (name, value) in [("start", 100i64), ("end", 300)] {
            file.new_attr::<i64>()
                .shape(())
                .create(name)
                .expect("attr")
                .write_scalar(&value)
                .expect("write attr");
        }
    }

    let reader = ContainerReader::open(&path).expect("open");
    assert_eq!(reader.names(), &["speed", "soc"]);
    assert_eq!(reader.variables(), &[4, 9]);
    assert_eq!((reader.start(), reader.end()), (100, 300));
    let matrix = reader.read(&[9, 4]).expect("read");
    assert_eq!(matrix.row(0), &[2.0, 1.0]);
    assert_eq!(matrix.row(1), &[4.0, 3.0]);
    assert!(matrix.row(2).iter().all(|v| v.is_nan()));
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("4.h5");
    std::fs::write(&path, b"TLMRUN01").expect("write");
    assert!(matches!(
        ContainerReader::open(&path),
        Err(Error::Corrupt(_))
    ));
}
