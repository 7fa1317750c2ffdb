use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    pub static ref SIGNALING_ACTIVE_ROOMS: IntGauge =
        register_int_gauge!("signaling_active_rooms", "Number of currently active rooms").unwrap();
    pub static ref SIGNALING_ACTIVE_SESSIONS: IntGauge =
        register_int_gauge!("signaling_active_sessions", "Number of currently connected participants").unwrap();
    pub static ref SIGNALING_ROOMS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "signaling_rooms_created_total",
        "Total number of rooms created"
    )
    .unwrap();
    pub static ref SIGNALING_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "signaling_events_total",
        "Total number of signaling events processed",
        &["event_id"] // "createRoom", "joinRoom", "onIceCandidate", ...
    )
    .unwrap();
    pub static ref SIGNALING_DELIVERY_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "signaling_delivery_failures_total",
        "Total number of outbound frames dropped on a full or closed channel"
    )
    .unwrap();
    pub static ref SIGNALING_PROTOCOL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "signaling_protocol_errors_total",
        "Total number of inbound frames rejected as malformed"
    )
    .unwrap();
}

pub fn register_metrics() {
    // Force initialization of lazy_statics
    let _ = SIGNALING_ACTIVE_ROOMS.get();
    let _ = SIGNALING_ACTIVE_SESSIONS.get();
    let _ = SIGNALING_ROOMS_CREATED_TOTAL.get();
    let _ = SIGNALING_EVENTS_TOTAL.with_label_values(&["none"]).get();
    let _ = SIGNALING_DELIVERY_FAILURES_TOTAL.get();
    let _ = SIGNALING_PROTOCOL_ERRORS_TOTAL.get();
}
