//! Manuscript emission after a commit.
//!
//! The sink is called once a scene is durably committed. Its failures are
//! logged by the orchestrator and never undo the commit.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use taleforge_types::SceneRecord;

/// Destination for committed scene text.
pub trait ManuscriptSink: Send + Sync {
    /// Append one committed scene.
    ///
    /// # Errors
    ///
    /// Returns any I/O error hit while writing.
    fn append(&self, record: &SceneRecord, title: &str) -> io::Result<()>;
}

/// Appends scenes to a single Markdown file, optionally mirroring each
/// scene into its own file.
#[derive(Debug, Clone)]
pub struct MarkdownManuscript {
    path: PathBuf,
    scenes_dir: Option<PathBuf>,
}

impl MarkdownManuscript {
    /// Write to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scenes_dir: None,
        }
    }

    /// Also write `scene_NNNN.md` files under `dir`.
    #[must_use]
    pub fn with_scene_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scenes_dir = Some(dir.into());
        self
    }

    /// The manuscript file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_scene_file(dir: &Path, record: &SceneRecord) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let scene = &record.scene;
        let body = format!(
            "## Scene {}: {}\n\n{}\n",
            scene.sequence_number, scene.goal, record.text
        );
        fs::write(
            dir.join(format!("scene_{:04}.md", scene.sequence_number)),
            body,
        )
    }
}

impl ManuscriptSink for MarkdownManuscript {
    fn append(&self, record: &SceneRecord, title: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let fresh = fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if fresh {
            writeln!(file, "# {title}")?;
        }
        let scene = &record.scene;
        write!(
            file,
            "\n---\n\n## Scene {}: {}\n\n{}\n",
            scene.sequence_number, scene.goal, record.text
        )?;
        file.flush()?;

        if let Some(dir) = &self.scenes_dir {
            Self::write_scene_file(dir, record)?;
        }
        Ok(())
    }
}
