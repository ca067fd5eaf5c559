// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support bundles for Talos clusters
//!
//! A support bundle is a zip archive of diagnostics gathered from every node
//! of a cluster through the Talos machine API and, when reachable, from the
//! cluster's Kubernetes API. Building one takes three steps:
//!
//! 1. Describe the bundle with [`BundleOptions`].
//! 2. Resolve the [`Collector`]s that apply with [`collectors_for_options`].
//! 3. Run them into the archive with [`create_support_bundle`].

mod bundle;
pub mod collectors;
mod options;
mod task_set;

pub use bundle::create_support_bundle;
pub use bundle::BundleError;
pub use bundle::BundleSummary;
pub use bundle::FailedCollector;
pub use collectors::collectors_for_options;
pub use collectors::CollectError;
pub use collectors::Collector;
pub use collectors::PartialCollectors;
pub use collectors::ResolveError;
pub use options::BundleOption;
pub use options::BundleOptions;

use std::fmt;

/// Renders an error and all of its sources on a single line, separated by
/// `": "`.
pub struct InlineErrorChain<'a>(&'a (dyn std::error::Error + 'static));

impl<'a> InlineErrorChain<'a> {
    pub fn new(error: &'a (dyn std::error::Error + 'static)) -> Self {
        InlineErrorChain(error)
    }
}

impl fmt::Display for InlineErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in anyhow::Chain::new(self.0).enumerate() {
            if i > 0 {
                f.write_str(": ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl slog::Value for InlineErrorChain<'_> {
    fn serialize(
        &self,
        _record: &slog::Record,
        key: slog::Key,
        serializer: &mut dyn slog::Serializer,
    ) -> slog::Result {
        serializer.emit_arguments(key, &format_args!("{self}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_inline_error_chain() {
        let err = Outer(std::io::Error::other("inner"));
        assert_eq!(InlineErrorChain::new(&err).to_string(), "outer: inner");
    }
}
