// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_EVICTED: &str = "room.evicted";
pub const ROOM_ACTIVE: &str = "room.active";
pub const SHAPE_DRAWN: &str = "shape.drawn";
pub const CANVAS_CLEARED: &str = "canvas.cleared";
pub const BROADCAST_DELIVERED: &str = "broadcast.delivered";
pub const BROADCAST_SKIPPED: &str = "broadcast.skipped";
pub const PERSIST_FAILED: &str = "persist.failed";
pub const SHAPE_FALLBACK: &str = "shape.fallback";
