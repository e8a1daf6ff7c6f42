use serde::{Deserialize, Serialize};

/// Runtime kind and bitness a subordinate process must be launched as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFrameworkKind {
    Native32,
    Native64,
    Managed32,
    Managed64,
}

/// Identifies what subordinate process binary to launch. Immutable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFramework {
    pub kind: TargetFrameworkKind,
    pub version: String,
}

impl TargetFramework {
    pub fn new(kind: TargetFrameworkKind, version: impl Into<String>) -> Self {
        Self {
            kind,
            version: version.into(),
        }
    }

    /// Framework of the current process.
    pub fn host() -> Self {
        #[cfg(target_pointer_width = "64")]
        let kind = TargetFrameworkKind::Native64;
        #[cfg(target_pointer_width = "32")]
        let kind = TargetFrameworkKind::Native32;
        Self::new(kind, env!("CARGO_PKG_VERSION"))
    }
}

/// Identifies a desired subordinate process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCreationInfo {
    pub process_unique_id: String,
    pub framework: TargetFramework,
}

impl ProcessCreationInfo {
    pub fn new(process_unique_id: impl Into<String>, framework: TargetFramework) -> Self {
        Self {
            process_unique_id: process_unique_id.into(),
            framework,
        }
    }
}

/// Flags controlling process creation. Default is reuse-if-exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessCreationOptions {
    /// Fail with `ProcessAlreadyExists` rather than reuse an existing
    /// process with the same id.
    pub throw_if_exists: bool,
}

impl ProcessCreationOptions {
    pub fn throw_if_exists() -> Self {
        Self {
            throw_if_exists: true,
        }
    }
}

/// A request for a subordinate process.
#[derive(Debug, Clone)]
pub struct ProcessCreationRequest {
    pub options: ProcessCreationOptions,
    pub process: ProcessCreationInfo,
}

impl ProcessCreationRequest {
    pub fn new(options: ProcessCreationOptions, process: ProcessCreationInfo) -> Self {
        Self { options, process }
    }
}

/// Declares what interface contract an endpoint exposes and which
/// implementation backs it. Travels as JSON on the registry control
/// method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCreationRequest {
    pub endpoint_id: String,
    /// Interface descriptor, e.g. `IZigZag`.
    pub endpoint_type: String,
    /// Concrete type descriptor resolved by the hosting process's factory.
    pub implementation_type: String,
}

impl EndpointCreationRequest {
    pub fn new(
        endpoint_id: impl Into<String>,
        endpoint_type: impl Into<String>,
        implementation_type: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            endpoint_type: endpoint_type.into(),
            implementation_type: implementation_type.into(),
        }
    }
}
