//! Fixed cluster layout and read dispatch.
//!
//! The bridge serves exactly two endpoints. Endpoint 0 is the root node
//! carrying the Descriptor cluster; endpoint 1 is the burner sensor
//! carrying OnOff (flame), LevelControl (fan speed) and
//! TemperatureMeasurement. The layout is static; only the three sensor
//! values and their derived attributes change at runtime.
//!
//! Reads route through [`read_attribute`]: unknown clusters, attributes
//! and endpoints come back as the matching Interaction Model status
//! rather than an error, since the controller expects a per-path status
//! in the report.

use crate::attributes::{AttributePath, AttributeStore, AttributeValue, DeviceTypeEntry};
use crate::interaction::Status;

/// Descriptor cluster id.
pub const CLUSTER_DESCRIPTOR: u32 = 0x001D;
/// OnOff cluster id (flame present).
pub const CLUSTER_ON_OFF: u32 = 0x0006;
/// LevelControl cluster id (fan speed percent).
pub const CLUSTER_LEVEL_CONTROL: u32 = 0x0008;
/// TemperatureMeasurement cluster id (boiler temperature).
pub const CLUSTER_TEMPERATURE: u32 = 0x0402;

/// Root node endpoint.
pub const ENDPOINT_ROOT: u8 = 0;
/// Sensor endpoint.
pub const ENDPOINT_SENSOR: u8 = 1;

/// Descriptor DeviceTypeList attribute.
pub const ATTR_DEVICE_TYPE_LIST: u32 = 0x0000;
/// Descriptor ServerList attribute.
pub const ATTR_SERVER_LIST: u32 = 0x0001;
/// Descriptor ClientList attribute.
pub const ATTR_CLIENT_LIST: u32 = 0x0002;
/// Descriptor PartsList attribute.
pub const ATTR_PARTS_LIST: u32 = 0x0003;

/// OnOff OnOff attribute.
pub const ATTR_ON_OFF: u32 = 0x0000;

/// LevelControl CurrentLevel attribute.
pub const ATTR_CURRENT_LEVEL: u32 = 0x0000;
/// LevelControl MinLevel attribute.
pub const ATTR_MIN_LEVEL: u32 = 0x0002;
/// LevelControl MaxLevel attribute.
pub const ATTR_MAX_LEVEL: u32 = 0x0003;

/// TemperatureMeasurement MeasuredValue attribute (centidegrees).
pub const ATTR_MEASURED_VALUE: u32 = 0x0000;
/// TemperatureMeasurement MinMeasuredValue attribute.
pub const ATTR_MIN_MEASURED_VALUE: u32 = 0x0001;
/// TemperatureMeasurement MaxMeasuredValue attribute.
pub const ATTR_MAX_MEASURED_VALUE: u32 = 0x0002;
/// TemperatureMeasurement Tolerance attribute.
pub const ATTR_TOLERANCE: u32 = 0x0003;

/// Global FeatureMap attribute, served by every cluster.
pub const ATTR_FEATURE_MAP: u32 = 0xFFFC;
/// Global ClusterRevision attribute, served by every cluster.
pub const ATTR_CLUSTER_REVISION: u32 = 0xFFFD;

/// Root Node device type.
const DEVICE_TYPE_ROOT_NODE: u32 = 0x0016;
/// Temperature Sensor device type.
const DEVICE_TYPE_TEMPERATURE_SENSOR: u32 = 0x0302;

/// Endpoint 0 device types: a root node.
static ROOT_DEVICE_TYPES: [DeviceTypeEntry; 1] =
    [DeviceTypeEntry { device_type: DEVICE_TYPE_ROOT_NODE, revision: 1 }];

/// Endpoint 1 device types: a temperature sensor.
#[allow(dead_code)]
static SENSOR_DEVICE_TYPES: [DeviceTypeEntry; 1] =
    [DeviceTypeEntry { device_type: DEVICE_TYPE_TEMPERATURE_SENSOR, revision: 1 }];

/// Clusters served on endpoint 0.
pub static ROOT_SERVER_LIST: [u32; 1] = [CLUSTER_DESCRIPTOR];

/// Clusters served on endpoint 1.
pub static SENSOR_SERVER_LIST: [u32; 3] =
    [CLUSTER_ON_OFF, CLUSTER_LEVEL_CONTROL, CLUSTER_TEMPERATURE];

/// No client clusters on either endpoint.
static EMPTY_CLIENT_LIST: [u32; 0] = [];

/// Endpoint 0 parts list: the sensor endpoint.
static ROOT_PARTS: [u8; 1] = [ENDPOINT_SENSOR];

/// Live attributes and their reset values; seeds the attribute store.
#[must_use]
pub fn live_attribute_defaults() -> [(AttributePath, AttributeValue); 3] {
    [
        (
            AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ON_OFF, ATTR_ON_OFF),
            AttributeValue::Bool(false),
        ),
        (
            AttributePath::new(ENDPOINT_SENSOR, CLUSTER_LEVEL_CONTROL, ATTR_CURRENT_LEVEL),
            AttributeValue::U8(0),
        ),
        (
            AttributePath::new(ENDPOINT_SENSOR, CLUSTER_TEMPERATURE, ATTR_MEASURED_VALUE),
            AttributeValue::I16(0),
        ),
    ]
}

/// Read one attribute, routing by cluster id.
///
/// Unknown cluster, attribute or endpoint comes back as the matching
/// [`Status`] so the caller can encode a per-path AttributeStatus.
pub fn read_attribute(store: &AttributeStore, path: AttributePath) -> Result<AttributeValue, Status> {
    match path.cluster {
        CLUSTER_DESCRIPTOR => read_descriptor(path),
        CLUSTER_ON_OFF => read_sensor_cluster(store, path, &[ATTR_ON_OFF]),
        CLUSTER_LEVEL_CONTROL => read_level(store, path),
        CLUSTER_TEMPERATURE => read_temperature(store, path),
        _ => Err(Status::UnsupportedCluster),
    }
}

fn read_descriptor(path: AttributePath) -> Result<AttributeValue, Status> {
    if path.endpoint != ENDPOINT_ROOT {
        return Err(Status::UnsupportedEndpoint);
    }
    match path.attribute {
        ATTR_DEVICE_TYPE_LIST => Ok(AttributeValue::DeviceTypes(&ROOT_DEVICE_TYPES)),
        ATTR_SERVER_LIST => Ok(AttributeValue::Clusters(&ROOT_SERVER_LIST)),
        ATTR_CLIENT_LIST => Ok(AttributeValue::Clusters(&EMPTY_CLIENT_LIST)),
        ATTR_PARTS_LIST => Ok(AttributeValue::Parts(&ROOT_PARTS)),
        ATTR_FEATURE_MAP => Ok(AttributeValue::U32(0)),
        ATTR_CLUSTER_REVISION => Ok(AttributeValue::U16(1)),
        _ => Err(Status::UnsupportedAttribute),
    }
}

fn read_sensor_cluster(
    store: &AttributeStore,
    path: AttributePath,
    live: &[u32],
) -> Result<AttributeValue, Status> {
    if path.endpoint != ENDPOINT_SENSOR {
        return Err(Status::UnsupportedEndpoint);
    }
    if live.contains(&path.attribute) {
        return store.get(path).ok_or(Status::Failure);
    }
    match path.attribute {
        ATTR_FEATURE_MAP => Ok(AttributeValue::U32(0)),
        ATTR_CLUSTER_REVISION => Ok(AttributeValue::U16(1)),
        _ => Err(Status::UnsupportedAttribute),
    }
}

fn read_level(store: &AttributeStore, path: AttributePath) -> Result<AttributeValue, Status> {
    if path.endpoint != ENDPOINT_SENSOR {
        return Err(Status::UnsupportedEndpoint);
    }
    match path.attribute {
        ATTR_MIN_LEVEL => Ok(AttributeValue::U8(0)),
        ATTR_MAX_LEVEL => Ok(AttributeValue::U8(100)),
        _ => read_sensor_cluster(store, path, &[ATTR_CURRENT_LEVEL]),
    }
}

fn read_temperature(store: &AttributeStore, path: AttributePath) -> Result<AttributeValue, Status> {
    if path.endpoint != ENDPOINT_SENSOR {
        return Err(Status::UnsupportedEndpoint);
    }
    match path.attribute {
        ATTR_MIN_MEASURED_VALUE => Ok(AttributeValue::I16(0)),
        ATTR_MAX_MEASURED_VALUE => Ok(AttributeValue::I16(10_000)),
        ATTR_TOLERANCE => Ok(AttributeValue::U16(100)),
        _ => read_sensor_cluster(store, path, &[ATTR_MEASURED_VALUE]),
    }
}

/// Device type advertised over DNS-SD (the sensor endpoint's type).
#[must_use]
pub fn advertised_device_type() -> u32 {
    DEVICE_TYPE_TEMPERATURE_SENSOR
}
