use std::fmt;
use std::str::FromStr;

use crate::error::{ClusterError, Result};

const MAX_ID_LEN: usize = 128;

/// Hierarchical endpoint path `/processUniqueId/endpointId`.
///
/// Unique within a cluster and stable for the lifetime of the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    process_id: String,
    endpoint_id: String,
}

impl EndpointAddress {
    pub fn new(process_id: impl Into<String>, endpoint_id: impl Into<String>) -> Result<Self> {
        let process_id = process_id.into();
        let endpoint_id = endpoint_id.into();
        validate_id(&process_id, "process id")?;
        validate_id(&endpoint_id, "endpoint id")?;
        Ok(Self {
            process_id,
            endpoint_id,
        })
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.process_id, self.endpoint_id)
    }
}

impl FromStr for EndpointAddress {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| ClusterError::InvalidAddress(format!("missing leading '/': {s}")))?;
        let (process_id, endpoint_id) = rest
            .split_once('/')
            .ok_or_else(|| ClusterError::InvalidAddress(format!("expected /process/endpoint: {s}")))?;
        if endpoint_id.contains('/') {
            return Err(ClusterError::InvalidAddress(format!(
                "too many path segments: {s}"
            )));
        }
        EndpointAddress::new(process_id, endpoint_id)
    }
}

/// Validate a process or endpoint id segment.
pub(crate) fn validate_id(id: &str, what: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(ClusterError::InvalidAddress(format!(
            "{what} length must be 1..={MAX_ID_LEN}, got {}",
            id.len()
        )));
    }
    if id.contains('/') {
        return Err(ClusterError::InvalidAddress(format!(
            "{what} must not contain '/': {id}"
        )));
    }
    Ok(())
}
