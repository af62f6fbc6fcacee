use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::{
    types::Placement,
    utils::{count_files_with_extension, has_extension, sanitize_name},
};

/// Moves finished downloads out of the shared staging directory into
/// `<root>/<category>/<year>/[<month>/]`.
pub struct FileMaterializer {
    staging_dir: PathBuf,
    root_dir: PathBuf,
    extension: String,
}

impl FileMaterializer {
    pub fn new(staging_dir: &Path, root_dir: &Path, extension: &str) -> Self {
        FileMaterializer {
            staging_dir: staging_dir.to_path_buf(),
            root_dir: root_dir.to_path_buf(),
            extension: extension.to_string(),
        }
    }

    pub fn staged_count(&self) -> usize {
        count_files_with_extension(&self.staging_dir, &self.extension)
    }

    pub fn destination(&self, category: &str, year: &str, month: Option<&str>) -> PathBuf {
        let mut dir = self.root_dir.join(sanitize_name(category)).join(sanitize_name(year));
        if let Some(month) = month {
            dir.push(sanitize_name(month));
        }
        dir
    }

    pub fn place(
        &self,
        category: &str,
        year: &str,
        month: Option<&str>,
    ) -> anyhow::Result<Placement> {
        let mut placement = Placement::default();
        let staged = self.staged_files()?;
        if staged.is_empty() {
            return Ok(placement);
        }

        let destination = self.destination(category, year, month);
        fs::create_dir_all(&destination)
            .context(format!("could not create destination {:?}", destination))?;

        for src in staged {
            let name = match src.file_name() {
                Some(n) => n.to_owned(),
                None => continue,
            };
            let dst = destination.join(&name);
            if dst.exists() {
                match fs::remove_file(&src) {
                    Ok(_) => {
                        info!("  Removed duplicate file: {}", name.to_string_lossy());
                        placement.duplicates += 1;
                    }
                    Err(e) => {
                        warn!("could not discard duplicate {:?}: {}", src, e);
                        placement.failed += 1;
                    }
                }
                continue;
            }
            match move_file(&src, &dst) {
                Ok(_) => {
                    info!("  Moved file: {}", name.to_string_lossy());
                    placement.moved += 1;
                }
                Err(e) => {
                    warn!("failed to move file {:?}: {}", src, e);
                    placement.failed += 1;
                }
            }
        }
        Ok(placement)
    }

    fn staged_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = fs::read_dir(&self.staging_dir)
            .context(format!("could not read staging dir {:?}", self.staging_dir))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| has_extension(p, &self.extension))
            .collect::<Vec<PathBuf>>();
        files.sort();
        Ok(files)
    }
}

// rename fails across filesystems, so fall back to copy and delete
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(_) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}
