use thiserror::Error;

/// Structural reasons a knock run ends as failed.
///
/// Transient conditions (a dropped UDP send, a refused TCP connect, a
/// malformed payload encoding) are absorbed where they occur and never show
/// up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KnockFailure {
    #[error("cannot resolve {host} for the requested address family")]
    ResolutionFailed { host: String },
    #[error("sequence \"{name}\" has no valid steps")]
    NoValidSteps { name: String },
    #[error("raw socket privilege is not available on this host")]
    RawSocketPermission,
    #[error("resource {target} stayed unreachable after all retries")]
    ResourceUnreachable { target: String },
}
