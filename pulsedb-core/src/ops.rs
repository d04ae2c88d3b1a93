//! Semantic operations and the dispatcher translating them onto the engine
//!
//! The network layer parses a request once into [`Operation`] and hands
//! it to [`Engine::handle`]; every reply uses the uniform [`Response`]
//! envelope. Subscription registration needs a connection-scoped
//! callback, so `subscribe`/`unsubscribe` are validated (and `since`
//! replayed) here while the hosting connection owns the consumer on
//! [`crate::fanout::FanoutBus`].

use crate::downsample::Aggregation;
use crate::error::{PulseError, Result};
use crate::storage::Engine;
use crate::types::{DataPoint, KeyCount, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Payload of a `write` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBody {
    #[serde(default)]
    pub value: f64,
    /// Zero or absent means "now" (epoch seconds).
    #[serde(default)]
    pub timestamp: Timestamp,
}

/// Payload of a `read` / `multi-read` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadParams {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub end_timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub downsampling: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub lastx: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregation: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A semantic operation, tagged by its `operation` string on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
    ServerInfo,
    InitKey {
        key: String,
    },
    RenameKey {
        key: String,
        #[serde(default)]
        tokey: String,
    },
    DeleteKey {
        key: String,
    },
    Write {
        key: String,
        write: WriteBody,
    },
    Read {
        key: String,
        #[serde(default)]
        read: ReadParams,
    },
    #[serde(rename = "multi-read")]
    MultiRead {
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        read: ReadParams,
    },
    Ids,
    IdsWithCount,
    Flush,
    #[serde(rename = "data-patch")]
    DataPatch {
        key: String,
        data: String,
    },
    Subscribe {
        key: String,
        #[serde(default)]
        since: i64,
    },
    Unsubscribe {
        key: String,
    },
}

impl Operation {
    /// Parse a raw JSON request. The `operation` tag is matched
    /// case-insensitively; an unrecognised tag or shape is an invalid
    /// operation, malformed JSON is reported as such.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|_| PulseError::InvalidInput(format!("Invalid JSON format: {raw}")))?;

        if let Some(object) = value.as_object_mut() {
            if let Some(tag) = object
                .get("operation")
                .and_then(|v| v.as_str())
                .map(str::to_ascii_lowercase)
            {
                object.insert("operation".to_string(), serde_json::Value::String(tag));
            }
        }

        serde_json::from_value(value)
            .map_err(|_| PulseError::InvalidInput("Invalid operation".to_string()))
    }

    /// The key this operation requires, if any. Keyless operations:
    /// `serverinfo`, `ids`, `idswithcount`, `flush`, `multi-read`.
    fn required_key(&self) -> Option<&str> {
        match self {
            Operation::InitKey { key }
            | Operation::RenameKey { key, .. }
            | Operation::DeleteKey { key }
            | Operation::Write { key, .. }
            | Operation::Read { key, .. }
            | Operation::DataPatch { key, .. }
            | Operation::Subscribe { key, .. }
            | Operation::Unsubscribe { key } => Some(key),
            Operation::ServerInfo
            | Operation::MultiRead { .. }
            | Operation::Ids
            | Operation::IdsWithCount
            | Operation::Flush => None,
        }
    }
}

/// Server identity and health, the `serverinfo` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "key-count")]
    pub key_count: usize,
    pub health: String,
}

/// Typed payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Point(DataPoint),
    Points(Vec<DataPoint>),
    Keys(Vec<String>),
    KeyCounts(Vec<KeyCount>),
    Info(ServerInfo),
}

/// Uniform response envelope for every operation and every subscription
/// delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_data: Option<HashMap<String, Vec<DataPoint>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_query_params: Option<ReadParams>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A live subscription delivery carrying one point.
    pub fn point(point: DataPoint) -> Self {
        Self {
            success: true,
            data: Some(ResponseData::Point(point)),
            ..Self::default()
        }
    }

    fn with_data(data: ResponseData) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    fn from_result(result: Result<()>, message: String) -> Self {
        match result {
            Ok(()) => Self::ok(message),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Current epoch seconds, the default timestamp for writes and the upper
/// bound for `subscribe` replays.
pub(crate) fn now_epoch() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl Engine {
    /// Parse and dispatch a raw JSON request.
    pub fn handle_json(&self, raw: &str) -> Response {
        match Operation::from_json(raw) {
            Ok(op) => self.handle(op),
            Err(e) => Response::failure(e.to_string()),
        }
    }

    /// Dispatch one operation, applying the validation rules of this
    /// layer before touching any engine state.
    pub fn handle(&self, op: Operation) -> Response {
        if let Some(key) = op.required_key() {
            if key.is_empty() {
                return Response::failure("Key required");
            }
        }

        match op {
            Operation::ServerInfo => Response::with_data(ResponseData::Info(ServerInfo {
                version: crate::VERSION.to_string(),
                key_count: self.key_count(),
                health: "ok".to_string(),
            })),

            Operation::InitKey { key } => {
                Response::from_result(self.init_key(&key), format!("Key initialized: {key}"))
            }

            Operation::RenameKey { key, tokey } => {
                if tokey.is_empty() {
                    return Response::failure("Key required");
                }
                Response::from_result(
                    self.rename_key(&key, &tokey),
                    format!("Key renamed: {key} -> {tokey}"),
                )
            }

            Operation::DeleteKey { key } => {
                Response::from_result(self.delete_key(&key), format!("Key deleted: {key}"))
            }

            Operation::Write { key, write } => {
                let timestamp = if write.timestamp > 0 {
                    write.timestamp
                } else {
                    now_epoch()
                };
                let point = DataPoint::new(key, timestamp, write.value);
                Response::from_result(self.write(point), "Data point stored".to_string())
            }

            Operation::Read { key, read } => {
                let params = match validate_read(read) {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                match self.read_with(&key, &params) {
                    Ok(points) => Response {
                        success: true,
                        data: Some(ResponseData::Points(points)),
                        read_query_params: Some(params),
                        ..Response::default()
                    },
                    Err(e) => Response::failure(e.to_string()),
                }
            }

            Operation::MultiRead { keys, read } => {
                if keys.is_empty() {
                    return Response::failure("Keys array required");
                }
                let params = match validate_read(read) {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                let mut multi = HashMap::with_capacity(keys.len());
                for key in keys {
                    match self.read_with(&key, &params) {
                        Ok(points) => {
                            multi.insert(key, points);
                        }
                        Err(e) => return Response::failure(e.to_string()),
                    }
                }
                Response {
                    success: true,
                    multi_data: Some(multi),
                    read_query_params: Some(params),
                    ..Response::default()
                }
            }

            Operation::Ids => Response::with_data(ResponseData::Keys(self.list_keys())),

            Operation::IdsWithCount => {
                Response::with_data(ResponseData::KeyCounts(self.list_keys_with_count()))
            }

            Operation::Flush => Response::from_result(self.flush(), "Data flushed".to_string()),

            Operation::DataPatch { key, data } => {
                if data.is_empty() {
                    return Response::failure("CSV data required");
                }
                let points = parse_csv_points(&key, &data);
                if points.is_empty() {
                    return Response::failure("No valid data points found in CSV");
                }
                let patched = points.len();
                Response::from_result(
                    self.patch(&key, points),
                    format!("Patched {patched} data points"),
                )
            }

            Operation::Subscribe { key, since } => {
                let replay = if since > 0 {
                    match self.read(&key, since, now_epoch(), 0, Aggregation::Avg) {
                        Ok(points) => points,
                        Err(e) => return Response::failure(e.to_string()),
                    }
                } else {
                    Vec::new()
                };
                Response {
                    success: true,
                    message: Some(format!("Subscribed to {key}")),
                    data: Some(ResponseData::Points(replay)),
                    ..Response::default()
                }
            }

            Operation::Unsubscribe { key } => Response::ok(format!("Unsubscribed from {key}")),
        }
    }

    fn read_with(&self, key: &str, params: &ReadParams) -> Result<Vec<DataPoint>> {
        if params.lastx > 0 {
            self.read_last(key, params.lastx as usize)
        } else if params.start_timestamp > 0 && params.end_timestamp > 0 {
            self.read(
                key,
                params.start_timestamp,
                params.end_timestamp,
                params.downsampling,
                Aggregation::parse(&params.aggregation),
            )
        } else {
            self.read_last(key, 1)
        }
    }
}

/// Apply the read validation rules: `start`/`end` set both or neither
/// and ordered, `lastx` coerced through its absolute value, aggregation
/// defaulting to `avg`.
fn validate_read(mut params: ReadParams) -> std::result::Result<ReadParams, Response> {
    if params.aggregation.is_empty() {
        params.aggregation = "avg".to_string();
    }
    if (params.start_timestamp == 0) != (params.end_timestamp == 0) {
        return Err(Response::failure("Both start and end time required or none"));
    }
    if params.start_timestamp > 0
        && params.end_timestamp > 0
        && params.start_timestamp > params.end_timestamp
    {
        return Err(Response::failure("Start time must be less than end time"));
    }
    params.lastx = params.lastx.abs();
    Ok(params)
}

/// Parse `ts,value` CSV lines into points for `key`. Blank and
/// malformed rows are skipped.
fn parse_csv_points(key: &str, data: &str) -> Vec<DataPoint> {
    let mut points = Vec::new();
    for row in data.lines() {
        let row = row.trim();
        if row.is_empty() {
            continue;
        }
        let Some((ts, value)) = row.split_once(',') else {
            continue;
        };
        let (Ok(timestamp), Ok(value)) = (ts.trim().parse::<i64>(), value.trim().parse::<f64>())
        else {
            continue;
        };
        points.push(DataPoint::new(key, timestamp, value));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EngineConfig;
    use tempfile::TempDir;

    fn engine() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig {
            data_dir: dir.path().to_path_buf(),
            cache_size: 0,
            handle_capacity: 8,
        })
        .unwrap();
        (dir, engine)
    }

    #[test]
    fn test_parse_wire_operations() {
        let op = Operation::from_json(
            r#"{"operation":"write","key":"a","write":{"value":42.5,"timestamp":1000}}"#,
        )
        .unwrap();
        assert!(matches!(
            op,
            Operation::Write { ref key, ref write } if key == "a" && write.timestamp == 1000
        ));

        let op = Operation::from_json(
            r#"{"operation":"read","key":"a","read":{"start_timestamp":1,"end_timestamp":9,"downsampling":2,"aggregation":"max"}}"#,
        )
        .unwrap();
        assert!(matches!(
            op,
            Operation::Read { ref read, .. }
                if read.start_timestamp == 1 && read.downsampling == 2 && read.aggregation == "max"
        ));

        assert!(matches!(
            Operation::from_json(r#"{"operation":"multi-read","keys":["a","b"]}"#).unwrap(),
            Operation::MultiRead { .. }
        ));
        assert!(matches!(
            Operation::from_json(r#"{"operation":"data-patch","key":"a","data":"1,2.0"}"#).unwrap(),
            Operation::DataPatch { .. }
        ));
        assert!(matches!(
            Operation::from_json(r#"{"operation":"idswithcount"}"#).unwrap(),
            Operation::IdsWithCount
        ));

        // the tag is case-insensitive
        assert!(matches!(
            Operation::from_json(r#"{"operation":"FLUSH"}"#).unwrap(),
            Operation::Flush
        ));
    }

    #[test]
    fn test_parse_errors() {
        let err = Operation::from_json("not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON format"));

        let err = Operation::from_json(r#"{"operation":"explode"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Invalid operation");
    }

    #[test]
    fn test_key_required() {
        let (_dir, engine) = engine();
        let response = engine.handle(Operation::DeleteKey { key: String::new() });
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Key required"));

        let response = engine.handle(Operation::RenameKey {
            key: "a".into(),
            tokey: String::new(),
        });
        assert!(!response.success);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (_dir, engine) = engine();
        let response = engine.handle_json(
            r#"{"operation":"write","key":"a","write":{"value":42.5,"timestamp":1000}}"#,
        );
        assert!(response.success);

        let response = engine.handle(Operation::Read {
            key: "a".into(),
            read: ReadParams::default(),
        });
        assert!(response.success);
        let Some(ResponseData::Points(points)) = response.data else {
            panic!("expected points");
        };
        assert_eq!(points, vec![DataPoint::new("a", 1000, 42.5)]);
        // defaulted to a last-1 query
        assert_eq!(response.read_query_params.unwrap().lastx, 1);
    }

    #[test]
    fn test_write_defaults_timestamp_to_now() {
        let (_dir, engine) = engine();
        let before = now_epoch();
        engine.handle_json(r#"{"operation":"write","key":"n","write":{"value":1.0}}"#);
        let points = engine.read_last("n", 1).unwrap();
        assert!(points[0].timestamp >= before);
    }

    #[test]
    fn test_read_validation_rules() {
        let (_dir, engine) = engine();

        let response = engine.handle(Operation::Read {
            key: "a".into(),
            read: ReadParams {
                start_timestamp: 5,
                ..ReadParams::default()
            },
        });
        assert_eq!(
            response.message.as_deref(),
            Some("Both start and end time required or none")
        );

        let response = engine.handle(Operation::Read {
            key: "a".into(),
            read: ReadParams {
                start_timestamp: 9,
                end_timestamp: 5,
                ..ReadParams::default()
            },
        });
        assert_eq!(
            response.message.as_deref(),
            Some("Start time must be less than end time")
        );

        // lastx is coerced through abs
        let response = engine.handle(Operation::Read {
            key: "a".into(),
            read: ReadParams {
                lastx: -3,
                ..ReadParams::default()
            },
        });
        assert!(response.success);
        assert_eq!(response.read_query_params.unwrap().lastx, 3);
    }

    #[test]
    fn test_range_read_with_downsampling() {
        let (_dir, engine) = engine();
        for i in 1..=4 {
            engine
                .write(DataPoint::new("b", i, i as f64))
                .unwrap();
        }
        let response = engine.handle_json(
            r#"{"operation":"read","key":"b","read":{"start_timestamp":1,"end_timestamp":4,"downsampling":2,"aggregation":"sum"}}"#,
        );
        let Some(ResponseData::Points(points)) = response.data else {
            panic!("expected points");
        };
        assert_eq!(
            points,
            vec![DataPoint::new("b", 1, 3.0), DataPoint::new("b", 3, 7.0)]
        );
    }

    #[test]
    fn test_multi_read() {
        let (_dir, engine) = engine();
        engine.write(DataPoint::new("a", 1, 1.0)).unwrap();
        engine.write(DataPoint::new("b", 2, 2.0)).unwrap();

        let response = engine.handle_json(r#"{"operation":"multi-read","keys":["a","b","absent"]}"#);
        assert!(response.success);
        let multi = response.multi_data.unwrap();
        assert_eq!(multi["a"], vec![DataPoint::new("a", 1, 1.0)]);
        assert_eq!(multi["b"], vec![DataPoint::new("b", 2, 2.0)]);
        assert!(multi["absent"].is_empty());

        let response = engine.handle_json(r#"{"operation":"multi-read","keys":[]}"#);
        assert_eq!(response.message.as_deref(), Some("Keys array required"));
    }

    #[test]
    fn test_server_info_ids_and_flush() {
        let (_dir, engine) = engine();
        engine.write(DataPoint::new("a", 1, 1.0)).unwrap();

        let response = engine.handle(Operation::ServerInfo);
        let Some(ResponseData::Info(info)) = response.data else {
            panic!("expected info");
        };
        assert_eq!(info.key_count, 1);
        assert_eq!(info.health, "ok");
        assert_eq!(info.version, crate::VERSION);

        let response = engine.handle(Operation::Ids);
        assert_eq!(
            response.data,
            Some(ResponseData::Keys(vec!["a".to_string()]))
        );

        let response = engine.handle(Operation::IdsWithCount);
        let Some(ResponseData::KeyCounts(counts)) = response.data else {
            panic!("expected counts");
        };
        assert_eq!(counts[0].count, 1);

        assert!(engine.handle(Operation::Flush).success);
    }

    #[test]
    fn test_data_patch_csv() {
        let (_dir, engine) = engine();
        engine.write(DataPoint::new("d", 1000, 1.0)).unwrap();

        let response = engine.handle_json(
            "{\"operation\":\"data-patch\",\"key\":\"d\",\"data\":\"2000,2.5\\nbogus\\n3000,3.5\\n\"}",
        );
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("Patched 2 data points"));

        let points = engine
            .read("d", 0, 5000, 0, Aggregation::Avg)
            .unwrap();
        assert_eq!(
            points,
            vec![
                DataPoint::new("d", 1000, 1.0),
                DataPoint::new("d", 2000, 2.5),
                DataPoint::new("d", 3000, 3.5),
            ]
        );

        let response =
            engine.handle_json(r#"{"operation":"data-patch","key":"d","data":"garbage"}"#);
        assert_eq!(
            response.message.as_deref(),
            Some("No valid data points found in CSV")
        );
    }

    #[test]
    fn test_subscribe_replays_since() {
        let (_dir, engine) = engine();
        for i in 1..=3 {
            engine.write(DataPoint::new("s", i, i as f64)).unwrap();
        }

        let response = engine.handle(Operation::Subscribe {
            key: "s".into(),
            since: 2,
        });
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("Subscribed to s"));
        let Some(ResponseData::Points(points)) = response.data else {
            panic!("expected replay points");
        };
        assert_eq!(
            points,
            vec![DataPoint::new("s", 2, 2.0), DataPoint::new("s", 3, 3.0)]
        );

        let response = engine.handle(Operation::Subscribe {
            key: "s".into(),
            since: 0,
        });
        assert_eq!(response.data, Some(ResponseData::Points(Vec::new())));
    }

    #[test]
    fn test_response_envelope_shape() {
        let response = Response::point(DataPoint::new("e", 1, 7.0));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"success":true,"data":{"key":"e","timestamp":1,"value":7.0}}"#
        );

        let json = serde_json::to_string(&Response::failure("Key required")).unwrap();
        assert_eq!(json, r#"{"success":false,"message":"Key required"}"#);
    }
}
