use std::path::PathBuf;
use tracing::warn;

/// Resolves a dataset `db_id` to its reference database file:
/// `<root>/<db_id>/<db_id>.<extension>`
#[derive(Debug, Clone)]
pub struct DatabaseLocator {
    root: PathBuf,
    extension: String,
}

impl DatabaseLocator {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// Conventional path for `db_id`, whether or not it exists.
    /// `None` when the id could escape the root directory.
    pub fn path_for(&self, db_id: &str) -> Option<PathBuf> {
        let db_id = db_id.trim();
        if db_id.is_empty()
            || db_id == "."
            || db_id.contains("..")
            || db_id.contains('/')
            || db_id.contains('\\')
        {
            warn!("Refusing suspicious db_id '{}'", db_id);
            return None;
        }

        let file_name = if self.extension.is_empty() {
            db_id.to_string()
        } else {
            format!("{}.{}", db_id, self.extension)
        };
        Some(self.root.join(db_id).join(file_name))
    }

    /// Existing database file for `db_id`, if any
    pub fn locate(&self, db_id: &str) -> Option<PathBuf> {
        self.path_for(db_id).filter(|path| path.is_file())
    }
}
