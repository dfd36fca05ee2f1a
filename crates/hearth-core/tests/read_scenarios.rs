//! End-to-end Interaction Model read scenarios at the handler level:
//! decode the request, dispatch against the cluster layer, encode the
//! report, and check what a controller would see.

use hearth_core::attributes::{AttributePath, AttributeStore, AttributeValue};
use hearth_core::interaction::{
    AttributeReport, ReadRequest, Status, encode_read_request, encode_report_data,
};
use hearth_core::read_attribute;
use hearth_proto::{TlvReader, Value};

/// What a controller extracts from one AttributeReport.
#[derive(Debug, PartialEq)]
enum SeenReport {
    Data(SeenValue),
    Status(u8),
}

#[derive(Debug, PartialEq)]
enum SeenValue {
    Bool(bool),
    Uint(u64),
    Int(i64),
}

/// Parse a ReadResponse payload the way a controller would.
fn parse_read_response(payload: &[u8]) -> Vec<SeenReport> {
    let mut reader = TlvReader::new(payload);
    assert_eq!(reader.next().unwrap().unwrap().value, Value::StructureStart);
    let array = reader.next().unwrap().unwrap();
    assert!(array.has_context_tag(0));
    assert_eq!(array.value, Value::ArrayStart);

    let mut seen = Vec::new();
    loop {
        let element = reader.next().unwrap().unwrap();
        if element.value == Value::ContainerEnd {
            break;
        }
        assert_eq!(element.value, Value::StructureStart, "report wrapper");
        let arm = reader.next().unwrap().unwrap();
        assert_eq!(arm.value, Value::StructureStart);
        if arm.has_context_tag(1) {
            seen.push(SeenReport::Data(parse_data_arm(&mut reader)));
        } else {
            assert!(arm.has_context_tag(0), "unknown report arm");
            seen.push(SeenReport::Status(parse_status_arm(&mut reader)));
        }
        // Close the report wrapper.
        assert_eq!(reader.next().unwrap().unwrap().value, Value::ContainerEnd);
    }
    seen
}

fn parse_data_arm(reader: &mut TlvReader<'_>) -> SeenValue {
    let mut value = None;
    loop {
        let element = reader.peek().unwrap().unwrap();
        if element.value == Value::ContainerEnd {
            reader.next().unwrap();
            break;
        }
        if element.has_context_tag(2) {
            let element = reader.next().unwrap().unwrap();
            value = Some(match element.value {
                Value::Bool(v) => SeenValue::Bool(v),
                Value::Uint(v) => SeenValue::Uint(v),
                Value::Int(v) => SeenValue::Int(v),
                other => panic!("unexpected data element {other:?}"),
            });
        } else {
            reader.skip().unwrap();
        }
    }
    value.expect("data arm carries a value")
}

fn parse_status_arm(reader: &mut TlvReader<'_>) -> u8 {
    let mut status = None;
    loop {
        let element = reader.peek().unwrap().unwrap();
        if element.value == Value::ContainerEnd {
            reader.next().unwrap();
            break;
        }
        if element.has_context_tag(1) && element.value == Value::StructureStart {
            reader.next().unwrap();
            loop {
                let inner = reader.next().unwrap().unwrap();
                if inner.value == Value::ContainerEnd {
                    break;
                }
                if inner.has_context_tag(0) {
                    status = Some(inner.value.as_u64().unwrap() as u8);
                }
            }
        } else {
            reader.skip().unwrap();
        }
    }
    status.expect("status arm carries a status")
}

/// Run one read request through decode, dispatch, and encode.
fn serve_read(store: &AttributeStore, paths: &[AttributePath]) -> Vec<SeenReport> {
    let mut request_buf = [0u8; 512];
    let len = encode_read_request(paths, &mut request_buf).unwrap();

    let request = ReadRequest::decode(&request_buf[..len]).unwrap();
    let reports: Vec<AttributeReport> = request
        .paths
        .iter()
        .map(|&path| AttributeReport { path, result: read_attribute(store, path) })
        .collect();

    let mut response_buf = [0u8; 1024];
    let len = encode_report_data(None, &reports, &mut response_buf).unwrap();
    parse_read_response(&response_buf[..len])
}

#[test]
fn read_flame_attribute() {
    let store = AttributeStore::new();
    store.set(AttributePath::new(1, 0x0006, 0x0000), AttributeValue::Bool(true));

    let seen = serve_read(&store, &[AttributePath::new(1, 0x0006, 0x0000)]);
    assert_eq!(seen, vec![SeenReport::Data(SeenValue::Bool(true))]);
}

#[test]
fn read_temperature_attribute() {
    let store = AttributeStore::new();
    store.set(AttributePath::new(1, 0x0402, 0x0000), AttributeValue::I16(2500));

    let seen = serve_read(&store, &[AttributePath::new(1, 0x0402, 0x0000)]);
    assert_eq!(seen, vec![SeenReport::Data(SeenValue::Int(2500))]);
}

#[test]
fn read_unknown_cluster_reports_status() {
    let store = AttributeStore::new();

    let seen = serve_read(&store, &[AttributePath::new(1, 0x9999, 0x0000)]);
    assert_eq!(seen, vec![SeenReport::Status(Status::UnsupportedCluster.to_u8())]);
    assert_eq!(Status::UnsupportedCluster.to_u8(), 0xC3);
}

#[test]
fn mixed_read_keeps_request_order() {
    let store = AttributeStore::new();
    store.set(AttributePath::new(1, 0x0008, 0x0000), AttributeValue::U8(55));

    let seen = serve_read(
        &store,
        &[
            AttributePath::new(1, 0x0008, 0x0000),
            AttributePath::new(1, 0x9999, 0x0000),
            AttributePath::new(9, 0x0006, 0x0000),
        ],
    );
    assert_eq!(
        seen,
        vec![
            SeenReport::Data(SeenValue::Uint(55)),
            SeenReport::Status(Status::UnsupportedCluster.to_u8()),
            SeenReport::Status(Status::UnsupportedEndpoint.to_u8()),
        ]
    );
}

#[test]
fn descriptor_read_encodes_lists() {
    let store = AttributeStore::new();
    let mut request_buf = [0u8; 128];
    let len =
        encode_read_request(&[AttributePath::new(0, 0x001D, 0x0001)], &mut request_buf).unwrap();
    let request = ReadRequest::decode(&request_buf[..len]).unwrap();

    let reports: Vec<AttributeReport> = request
        .paths
        .iter()
        .map(|&path| AttributeReport { path, result: read_attribute(&store, path) })
        .collect();
    let mut response_buf = [0u8; 512];
    let len = encode_report_data(None, &reports, &mut response_buf).unwrap();

    // The ServerList data arm holds an array containing the Descriptor
    // cluster id.
    let mut reader = TlvReader::new(&response_buf[..len]);
    let mut cluster_ids = Vec::new();
    let mut in_data_array = false;
    while let Some(element) = reader.next().unwrap() {
        if element.has_context_tag(2) && element.value == Value::ArrayStart {
            in_data_array = true;
        } else if in_data_array {
            match element.value {
                Value::Uint(v) => cluster_ids.push(v),
                Value::ContainerEnd => in_data_array = false,
                _ => {},
            }
        }
    }
    assert_eq!(cluster_ids, vec![0x001D]);
}
