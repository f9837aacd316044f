//! Standardized span constructors for link observability.

pub mod spans {
    use tracing::{Span, field, info_span};

    /// Span for one server link. `peer` is filled in once the peer has
    /// authenticated.
    pub fn link(direction: &str, remote: &str) -> Span {
        info_span!("link", direction = %direction, remote = %remote, peer = field::Empty)
    }

    /// Span for the autoconnect loop.
    pub fn autoconnect() -> Span {
        info_span!("autoconnect")
    }
}
