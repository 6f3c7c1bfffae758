//! Display selection boundary.

use async_trait::async_trait;
use castlink_types::DisplayInfo;

/// Presents the candidate list for a single choice.
///
/// Returning `None` — or an out-of-range index — aborts the start protocol.
/// Front-ends implement this with whatever UI they have; tests script it.
#[async_trait]
pub trait DisplayChooser: Send + Sync + 'static {
    /// Pick one display from the candidate list.
    async fn choose(&self, displays: &[DisplayInfo]) -> Option<usize>;
}

/// Auto-selects the first candidate. Useful for single-display deployments
/// and non-interactive callers.
pub struct FirstDisplayChooser;

#[async_trait]
impl DisplayChooser for FirstDisplayChooser {
    async fn choose(&self, displays: &[DisplayInfo]) -> Option<usize> {
        if displays.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
