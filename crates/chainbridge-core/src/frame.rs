//! Chain-sync frame schema.
//!
//! The feed speaks JSON-RPC 2.0. Two methods matter:
//!
//! - `findIntersection` → intersection found (result) or not found (error)
//! - `nextBlock`        → roll forward with a block, or roll backward to a point
//!
//! Every modelled level is decoded with unknown fields rejected. Callers log
//! and drop frames that fail to decode; one bad frame never ends a session.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BridgeError;
use crate::types::{Block, Point, ResumePoint};

pub const FIND_INTERSECTION: &str = "findIntersection";
pub const NEXT_BLOCK: &str = "nextBlock";

/// A decoded chain-sync event.
#[derive(Debug, Clone)]
pub enum Frame {
    /// `None` means the intersection is the origin.
    IntersectionFound(Option<Point>),
    IntersectionNotFound,
    RollForward(Block),
    /// `None` is an empty rollback target.
    RollBackward(Option<Point>),
    Unknown(String),
}

// ─── Wire schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    #[allow(dead_code)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    data: Option<Value>,
}

/// A point as the feed writes it: `{slot, id}` or the string `"origin"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePoint {
    Origin(OriginTag),
    At { slot: u64, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginTag {
    Origin,
}

impl WirePoint {
    pub fn into_point(self) -> Option<Point> {
        match self {
            Self::Origin(_) => None,
            Self::At { slot, id } => Some(Point::new(slot, id)),
        }
    }
}

impl From<&ResumePoint> for WirePoint {
    fn from(p: &ResumePoint) -> Self {
        match p {
            ResumePoint::Origin => Self::Origin(OriginTag::Origin),
            ResumePoint::At(p) => Self::At {
                slot: p.slot,
                id: p.hash.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntersectionResult {
    intersection: WirePoint,
    #[serde(default)]
    #[allow(dead_code)]
    tip: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NextBlockResult {
    direction: Direction,
    #[serde(default)]
    block: Option<Block>,
    #[serde(default)]
    point: Option<WirePoint>,
    #[serde(default)]
    #[allow(dead_code)]
    tip: Option<Value>,
}

// ─── Decoding ────────────────────────────────────────────────────────────────

fn decode_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Decode(e.to_string())
}

/// Decode one raw text frame.
pub fn decode_frame(raw: &str) -> Result<Frame, BridgeError> {
    let env: Envelope = serde_json::from_str(raw).map_err(decode_err)?;

    match env.method.as_str() {
        FIND_INTERSECTION => {
            if env.error.is_some() {
                return Ok(Frame::IntersectionNotFound);
            }
            let result = env
                .result
                .ok_or_else(|| decode_err("findIntersection frame without result"))?;
            let found: IntersectionResult = serde_json::from_value(result).map_err(decode_err)?;
            Ok(Frame::IntersectionFound(found.intersection.into_point()))
        }
        NEXT_BLOCK => {
            if let Some(err) = env.error {
                return Err(BridgeError::Decode(format!(
                    "nextBlock error {}: {}",
                    err.code, err.message
                )));
            }
            let result = env
                .result
                .ok_or_else(|| decode_err("nextBlock frame without result"))?;
            let next: NextBlockResult = serde_json::from_value(result).map_err(decode_err)?;
            match next.direction {
                Direction::Forward => next
                    .block
                    .map(Frame::RollForward)
                    .ok_or_else(|| decode_err("forward frame without block")),
                Direction::Backward => Ok(Frame::RollBackward(
                    next.point.and_then(WirePoint::into_point),
                )),
            }
        }
        other => Ok(Frame::Unknown(other.to_string())),
    }
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Build a `findIntersection` request for the given candidates.
pub fn find_intersection_request(points: &[ResumePoint]) -> String {
    let points: Vec<WirePoint> = points.iter().map(WirePoint::from).collect();
    json!({
        "jsonrpc": "2.0",
        "method": FIND_INTERSECTION,
        "params": { "points": points },
        "id": FIND_INTERSECTION,
    })
    .to_string()
}

/// Build a `nextBlock` request.
pub fn next_block_request() -> String {
    json!({
        "jsonrpc": "2.0",
        "method": NEXT_BLOCK,
        "id": NEXT_BLOCK,
    })
    .to_string()
}
