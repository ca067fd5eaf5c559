// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for the test suite.  These should not be used in
//! production code.

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
pub use dropshot::test_util::LogContext;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingIfExists;
use dropshot::ConfigLoggingLevel;

/// Set up a [`dropshot::test_util::LogContext`] appropriate for a test named
/// `test_name`
///
/// The log file is removed by [`LogContext::cleanup_successful`] and kept
/// around for inspection when the test fails.
pub fn test_setup_log(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Trace,
        path: "UNUSED".into(),
        if_exists: ConfigLoggingIfExists::Fail,
    };

    LogContext::new(test_name, &log_config)
}

/// A scratch directory laid out like a provisioner state root: one
/// subdirectory per cluster, each holding that cluster's `state.yaml`.
pub struct StateRoot {
    dir: Utf8TempDir,
}

impl StateRoot {
    pub fn new() -> StateRoot {
        StateRoot {
            dir: Utf8TempDir::new().expect("failed to create state root"),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Writes `state` as the state document for `cluster`, creating the
    /// cluster directory if needed.
    pub fn write_cluster(&self, cluster: &str, state: &str) {
        let dir = self.dir.path().join(cluster);
        std::fs::create_dir_all(&dir).expect("failed to create cluster dir");
        std::fs::write(dir.join("state.yaml"), state)
            .expect("failed to write state.yaml");
    }
}

impl Default for StateRoot {
    fn default() -> Self {
        StateRoot::new()
    }
}
