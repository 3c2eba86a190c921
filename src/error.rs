use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateKey,
    SelfLoop,
    DuplicateEdge,
    InvalidInput,
    NotFound,
    Conflict,
    Http,
    Decode,
    Cancelled,
    Io,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    /// HTTP status of the response that produced this error, if any.
    pub status: Option<u16>,
    pub source: anyhow::Error,
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.public, self.source)
    }
}

impl std::error::Error for LibError {}

impl LibError {
    fn new(kind: ErrorKind, code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind,
            code,
            public,
            status: None,
            source,
        }
    }

    pub fn duplicate_key(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::DuplicateKey, "duplicate_node_key", public, source)
    }

    pub fn self_loop(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::SelfLoop, "graph_self_loop", public, source)
    }

    pub fn duplicate_edge(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::DuplicateEdge, "duplicate_edge", public, source)
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::InvalidInput, "invalid_input", public, source)
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", public, source)
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Conflict, "conflict", public, source)
    }

    pub fn http(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Http, "http_error", public, source)
    }

    /// Maps a non-2xx response status onto the error taxonomy.
    pub fn from_status(status: u16, url: &str, body: &str) -> Self {
        let source = anyhow!("{} returned status {}: {}", url, status, body);
        let mut err = match status {
            404 => Self::not_found("Resource not found", source),
            409 | 412 => Self::conflict("Record was modified by another request", source),
            _ => Self::http("Request failed", source),
        };
        err.status = Some(status);
        err
    }

    pub fn decode(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Decode, "decode_error", public, source)
    }

    pub fn cancelled(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled", public, source)
    }

    pub fn io(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Io, "io_error", public, source)
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self::new(ErrorKind::Unknown, "unknown_error", public, source)
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<reqwest::Error> for LibError {
    fn from(value: reqwest::Error) -> Self {
        let status = value.status().map(|status| status.as_u16());
        let mut err = Self::http("Network request failed", anyhow!(value));
        err.status = status;
        err
    }
}

impl From<serde_json::Error> for LibError {
    fn from(value: serde_json::Error) -> Self {
        Self::decode("Response body could not be decoded", anyhow!(value))
    }
}

impl From<std::io::Error> for LibError {
    fn from(value: std::io::Error) -> Self {
        Self::io("Local storage request failed", anyhow!(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_distinguishes_not_found_and_conflict() {
        let err = LibError::from_status(404, "http://x/nodes", "");
        assert!(err.is_not_found());
        assert_eq!(err.status, Some(404));

        let err = LibError::from_status(409, "http://x/nodes/1", "stale");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = LibError::from_status(500, "http://x/nodes", "boom");
        assert_eq!(err.kind, ErrorKind::Http);
        assert_eq!(err.code, "http_error");
    }
}
