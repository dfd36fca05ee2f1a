//! Interaction Model payloads: requests in, reports out.
//!
//! The bridge answers two request opcodes - Read (0x02) and Subscribe
//! (0x03) - and emits ReportData (0x05) both as the read response and
//! as subscription reports. Payload layouts follow the Matter
//! Interaction Model TLV shapes for those messages; tags this stack
//! does not understand are skipped, unknown opcodes become a bare
//! status response.
//!
//! Per-path problems (unknown cluster, attribute, endpoint) are not
//! errors: they are encoded as an AttributeStatus for that path so one
//! request can mix hits and misses.

use hearth_proto::{Tag, TlvReader, TlvWriter, Value};

use crate::attributes::{AttributePath, AttributeValue};
use crate::error::CoreError;

/// Cap on attribute paths in one request.
pub const MAX_READ_PATHS: usize = 16;

/// Interaction Model status codes this stack emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Request succeeded
    Success = 0x00,
    /// Generic failure (unknown request, internal error)
    Failure = 0x01,
    /// Endpoint does not exist
    UnsupportedEndpoint = 0x7F,
    /// Cluster exists but the attribute does not
    UnsupportedAttribute = 0x86,
    /// Request violated a constraint
    ConstraintError = 0x87,
    /// A fixed table (subscriptions) is full
    ResourceExhausted = 0x89,
    /// Cluster does not exist on the endpoint
    UnsupportedCluster = 0xC3,
}

impl Status {
    /// Raw status byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded ReadRequest: the paths to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Requested attribute paths, in request order
    pub paths: Vec<AttributePath>,
}

impl ReadRequest {
    /// Decode a ReadRequest payload.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MalformedPayload`] on missing or mistyped fields
    /// - [`CoreError::ResourceExhausted`] beyond [`MAX_READ_PATHS`]
    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        let mut reader = TlvReader::new(payload);
        enter_root_structure(&mut reader)?;

        let mut paths = Vec::new();
        loop {
            let Some(element) = reader.peek()? else {
                return Err(CoreError::MalformedPayload("unterminated read request"));
            };
            if element.value == Value::ContainerEnd {
                reader.next()?;
                break;
            }
            if element.has_context_tag(0) && element.value == Value::ArrayStart {
                reader.next()?;
                decode_path_array(&mut reader, &mut paths)?;
            } else {
                reader.skip()?;
            }
        }

        Ok(Self { paths })
    }
}

/// Decoded SubscribeRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Attribute paths to watch
    pub paths: Vec<AttributePath>,
    /// Floor on inter-report spacing, seconds
    pub min_interval_s: u16,
    /// Ceiling on report silence, seconds
    pub max_interval_s: u16,
    /// Keep this session's existing subscriptions
    pub keep_subscriptions: bool,
}

impl SubscribeRequest {
    /// Decode a SubscribeRequest payload.
    ///
    /// AttributeRequests share the ReadRequest layout (tag 0);
    /// MinIntervalFloor is tag 2, MaxIntervalCeiling tag 3,
    /// KeepSubscriptions tag 4 (defaults to false when absent).
    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        let mut reader = TlvReader::new(payload);
        enter_root_structure(&mut reader)?;

        let mut paths = Vec::new();
        let mut min_interval_s = None;
        let mut max_interval_s = None;
        let mut keep_subscriptions = false;

        loop {
            let Some(element) = reader.peek()? else {
                return Err(CoreError::MalformedPayload("unterminated subscribe request"));
            };
            match element.tag {
                _ if element.value == Value::ContainerEnd => {
                    reader.next()?;
                    break;
                },
                Tag::Context(0) if element.value == Value::ArrayStart => {
                    reader.next()?;
                    decode_path_array(&mut reader, &mut paths)?;
                },
                Tag::Context(2) => {
                    min_interval_s = Some(decode_u16_field(&mut reader, "MinIntervalFloor")?);
                },
                Tag::Context(3) => {
                    max_interval_s = Some(decode_u16_field(&mut reader, "MaxIntervalCeiling")?);
                },
                Tag::Context(4) => {
                    let element = advance(&mut reader)?;
                    keep_subscriptions = element
                        .value
                        .as_bool()
                        .ok_or(CoreError::MalformedPayload("KeepSubscriptions not a bool"))?;
                },
                _ => reader.skip()?,
            }
        }

        Ok(Self {
            paths,
            min_interval_s: min_interval_s
                .ok_or(CoreError::MalformedPayload("missing MinIntervalFloor"))?,
            max_interval_s: max_interval_s
                .ok_or(CoreError::MalformedPayload("missing MaxIntervalCeiling"))?,
            keep_subscriptions,
        })
    }
}

/// One entry of a ReportData payload: a path and its value or status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeReport {
    /// Path the report describes
    pub path: AttributePath,
    /// The read value, or the per-path status
    pub result: Result<AttributeValue, Status>,
}

/// Encode a ReportData payload.
///
/// With `subscription_id` the layout is the subscription report
/// (SubscriptionId at tag 0, reports at tag 1); without it, the read
/// response (reports array at tag 0).
pub fn encode_report_data(
    subscription_id: Option<u32>,
    reports: &[AttributeReport],
    buf: &mut [u8],
) -> Result<usize, CoreError> {
    let mut writer = TlvWriter::new(buf);
    writer.start_structure(Tag::Anonymous)?;

    let reports_tag = if let Some(id) = subscription_id {
        writer.put_u64(Tag::Context(0), u64::from(id))?;
        Tag::Context(1)
    } else {
        Tag::Context(0)
    };

    writer.start_array(reports_tag)?;
    for report in reports {
        encode_report(&mut writer, report)?;
    }
    writer.end_container()?;
    writer.end_container()?;
    Ok(writer.len())
}

/// Encode a SubscribeResponse payload.
pub fn encode_subscribe_response(
    subscription_id: u32,
    max_interval_s: u16,
    buf: &mut [u8],
) -> Result<usize, CoreError> {
    let mut writer = TlvWriter::new(buf);
    writer.start_structure(Tag::Anonymous)?;
    writer.put_u64(Tag::Context(0), u64::from(subscription_id))?;
    writer.put_u64(Tag::Context(2), u64::from(max_interval_s))?;
    writer.end_container()?;
    Ok(writer.len())
}

/// Encode a bare StatusResponse payload.
pub fn encode_status_response(status: Status, buf: &mut [u8]) -> Result<usize, CoreError> {
    let mut writer = TlvWriter::new(buf);
    writer.start_structure(Tag::Anonymous)?;
    writer.put_u64(Tag::Context(0), u64::from(status.to_u8()))?;
    writer.end_container()?;
    Ok(writer.len())
}

fn encode_report(writer: &mut TlvWriter<'_>, report: &AttributeReport) -> Result<(), CoreError> {
    writer.start_structure(Tag::Anonymous)?;
    match report.result {
        Err(status) => {
            // AttributeStatus: path (tag 0) + status struct (tag 1)
            writer.start_structure(Tag::Context(0))?;
            encode_path(writer, Tag::Context(0), report.path)?;
            writer.start_structure(Tag::Context(1))?;
            writer.put_u64(Tag::Context(0), u64::from(status.to_u8()))?;
            writer.end_container()?;
            writer.end_container()?;
        },
        Ok(value) => {
            // AttributeData: data version (tag 0), path (tag 1), data (tag 2)
            writer.start_structure(Tag::Context(1))?;
            writer.put_u64(Tag::Context(0), 0)?;
            encode_path(writer, Tag::Context(1), report.path)?;
            encode_value(writer, Tag::Context(2), value)?;
            writer.end_container()?;
        },
    }
    writer.end_container()?;
    Ok(())
}

fn encode_path(
    writer: &mut TlvWriter<'_>,
    tag: Tag,
    path: AttributePath,
) -> Result<(), CoreError> {
    writer.start_structure(tag)?;
    writer.put_u64(Tag::Context(0), u64::from(path.endpoint))?;
    writer.put_u64(Tag::Context(2), u64::from(path.cluster))?;
    writer.put_u64(Tag::Context(3), u64::from(path.attribute))?;
    writer.end_container()?;
    Ok(())
}

fn encode_value(
    writer: &mut TlvWriter<'_>,
    tag: Tag,
    value: AttributeValue,
) -> Result<(), CoreError> {
    match value {
        AttributeValue::Bool(v) => writer.put_bool(tag, v)?,
        AttributeValue::U8(v) => writer.put_u64(tag, u64::from(v))?,
        AttributeValue::U16(v) => writer.put_u64(tag, u64::from(v))?,
        AttributeValue::U32(v) => writer.put_u64(tag, u64::from(v))?,
        AttributeValue::I16(v) => writer.put_i64(tag, i64::from(v))?,
        AttributeValue::DeviceTypes(entries) => {
            writer.start_array(tag)?;
            for entry in entries {
                writer.start_structure(Tag::Anonymous)?;
                writer.put_u64(Tag::Context(0), u64::from(entry.device_type))?;
                writer.put_u64(Tag::Context(1), u64::from(entry.revision))?;
                writer.end_container()?;
            }
            writer.end_container()?;
        },
        AttributeValue::Clusters(clusters) => {
            writer.start_array(tag)?;
            for cluster in clusters {
                writer.put_u64(Tag::Anonymous, u64::from(*cluster))?;
            }
            writer.end_container()?;
        },
        AttributeValue::Parts(endpoints) => {
            writer.start_array(tag)?;
            for endpoint in endpoints {
                writer.put_u64(Tag::Anonymous, u64::from(*endpoint))?;
            }
            writer.end_container()?;
        },
    }
    Ok(())
}

fn enter_root_structure(reader: &mut TlvReader<'_>) -> Result<(), CoreError> {
    let element = advance(reader)?;
    if element.value != Value::StructureStart {
        return Err(CoreError::MalformedPayload("request is not a structure"));
    }
    Ok(())
}

fn decode_path_array(
    reader: &mut TlvReader<'_>,
    paths: &mut Vec<AttributePath>,
) -> Result<(), CoreError> {
    loop {
        let Some(element) = reader.peek()? else {
            return Err(CoreError::MalformedPayload("unterminated path array"));
        };
        if element.value == Value::ContainerEnd {
            reader.next()?;
            return Ok(());
        }
        if element.value == Value::StructureStart {
            reader.next()?;
            let path = decode_path_fields(reader)?;
            if paths.len() >= MAX_READ_PATHS {
                return Err(CoreError::ResourceExhausted {
                    resource: "attribute paths",
                    capacity: MAX_READ_PATHS,
                });
            }
            paths.push(path);
        } else {
            reader.skip()?;
        }
    }
}

fn decode_path_fields(reader: &mut TlvReader<'_>) -> Result<AttributePath, CoreError> {
    let mut endpoint = None;
    let mut cluster = None;
    let mut attribute = None;

    loop {
        let Some(element) = reader.peek()? else {
            return Err(CoreError::MalformedPayload("unterminated attribute path"));
        };
        match element.tag {
            _ if element.value == Value::ContainerEnd => {
                reader.next()?;
                break;
            },
            Tag::Context(0) => {
                let value = advance(reader)?
                    .value
                    .as_u64()
                    .ok_or(CoreError::MalformedPayload("endpoint not an integer"))?;
                endpoint = Some(
                    u8::try_from(value)
                        .map_err(|_| CoreError::MalformedPayload("endpoint out of range"))?,
                );
            },
            Tag::Context(2) => {
                let value = advance(reader)?
                    .value
                    .as_u64()
                    .ok_or(CoreError::MalformedPayload("cluster not an integer"))?;
                cluster = Some(
                    u32::try_from(value)
                        .map_err(|_| CoreError::MalformedPayload("cluster out of range"))?,
                );
            },
            Tag::Context(3) => {
                let value = advance(reader)?
                    .value
                    .as_u64()
                    .ok_or(CoreError::MalformedPayload("attribute not an integer"))?;
                attribute = Some(
                    u32::try_from(value)
                        .map_err(|_| CoreError::MalformedPayload("attribute out of range"))?,
                );
            },
            _ => reader.skip()?,
        }
    }

    Ok(AttributePath {
        endpoint: endpoint.ok_or(CoreError::MalformedPayload("path missing endpoint"))?,
        cluster: cluster.ok_or(CoreError::MalformedPayload("path missing cluster"))?,
        attribute: attribute.ok_or(CoreError::MalformedPayload("path missing attribute"))?,
    })
}

fn decode_u16_field(
    reader: &mut TlvReader<'_>,
    what: &'static str,
) -> Result<u16, CoreError> {
    let value = advance(reader)?.value.as_u64().ok_or(CoreError::MalformedPayload(what))?;
    u16::try_from(value).map_err(|_| CoreError::MalformedPayload(what))
}

fn advance<'a>(reader: &mut TlvReader<'a>) -> Result<hearth_proto::Element<'a>, CoreError> {
    reader.next()?.ok_or(CoreError::MalformedPayload("unexpected end of payload"))
}

/// Encode a ReadRequest payload (used by tests and tooling; the bridge
/// itself only decodes requests).
pub fn encode_read_request(paths: &[AttributePath], buf: &mut [u8]) -> Result<usize, CoreError> {
    let mut writer = TlvWriter::new(buf);
    writer.start_structure(Tag::Anonymous)?;
    writer.start_array(Tag::Context(0))?;
    for path in paths {
        encode_path(&mut writer, Tag::Anonymous, *path)?;
    }
    writer.end_container()?;
    writer.end_container()?;
    Ok(writer.len())
}

/// Encode a SubscribeRequest payload (counterpart of
/// [`SubscribeRequest::decode`], used by tests and tooling).
pub fn encode_subscribe_request(
    request: &SubscribeRequest,
    buf: &mut [u8],
) -> Result<usize, CoreError> {
    let mut writer = TlvWriter::new(buf);
    writer.start_structure(Tag::Anonymous)?;
    writer.start_array(Tag::Context(0))?;
    for path in &request.paths {
        encode_path(&mut writer, Tag::Anonymous, *path)?;
    }
    writer.end_container()?;
    writer.put_u64(Tag::Context(2), u64::from(request.min_interval_s))?;
    writer.put_u64(Tag::Context(3), u64::from(request.max_interval_s))?;
    writer.put_bool(Tag::Context(4), request.keep_subscriptions)?;
    writer.end_container()?;
    Ok(writer.len())
}
