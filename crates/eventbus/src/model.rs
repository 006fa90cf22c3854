use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_body: Option<Vec<u8>>,
    pub response_body: Option<Vec<u8>>,
    pub response_headers: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct LoggedEvent {
    pub log_id: i64,
    pub record: EventRecord,
}
