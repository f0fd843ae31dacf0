//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated directory tree to enumerate
//! - A private thumbnail cache
//! - A `Config` pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use dirq_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_file("a.txt", b"hello").unwrap();
//!     // point a scheduler at env.root
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own directory tree
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Directory under test
    pub root: PathBuf,
    /// Isolated thumbnail cache
    pub thumbnail_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();

        let root = base.join(format!("tree-{}", test_id));
        let thumbnail_dir = base.join("thumbnails");

        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&thumbnail_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            thumbnail_dir,
            test_id,
        })
    }

    /// Create a test file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a test directory
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Hard-link `existing` to `new`, both relative to the root
    pub fn hard_link(&self, existing: &str, new: &str) -> anyhow::Result<PathBuf> {
        let target = self.root.join(new);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::hard_link(self.root.join(existing), &target)?;
        Ok(target)
    }

    /// Config scoped to this environment.
    ///
    /// Built from defaults rather than `Config::load()` so that a developer's
    /// `~/.dirq/config.toml` cannot leak into tests.
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.thumbnails.cache_dir = self.thumbnail_dir.clone();
        cfg.visibility.desktop_dir = Some(self.root.join("Desktop"));
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
