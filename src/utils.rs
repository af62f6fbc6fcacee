use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use crate::engine::Selector;

pub const START_URL: &str = "https://judiciary.karnataka.gov.in/ds_judgment.php";
pub const DEFAULT_DOWNLOAD_DIR: &str = "KHC_Judgments";
pub const STATE_FILE_NAME: &str = "download_state.json";
pub const LOG_FILE_NAME: &str = "download_log.txt";
pub const DOWNLOAD_EXTENSION: &str = "pdf";
pub const PROCESSED: &str = "processed";
pub const COMPLETED_SUFFIX: &str = "_completed";

lazy_static! {
    // acknowledgement controls the portal shows in its modals
    pub static ref POPUP_SELECTORS: Vec<Selector> = vec![
        Selector::xpath("//button[contains(text(), 'OK')]"),
        Selector::xpath("//button[contains(text(), 'Ok')]"),
        Selector::xpath("//button[contains(text(), 'ok')]"),
        Selector::xpath("//input[@value='OK']"),
        Selector::xpath("//input[@value='Ok']"),
        Selector::xpath("//input[@value='ok']"),
        Selector::xpath("//button[contains(@onclick, 'close')]"),
        Selector::xpath("//div[@class='modal']//button[contains(text(), 'OK')]"),
        Selector::xpath("//div[contains(@class, 'popup')]//button[contains(text(), 'OK')]"),
    ];
}

/// Keeps letters, digits, space, `-` and `_`, then trims trailing whitespace.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Year buttons read like `2020 [15]`; only the part before the bracket names the year.
pub fn year_label(text: &str, position: usize) -> String {
    let label = text.split('[').next().unwrap_or_default().trim();
    if label.is_empty() {
        format!("Year_{}", position)
    } else {
        label.to_string()
    }
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Number of finished downloads sitting directly in `dir`.
pub fn count_files_with_extension(dir: &Path, extension: &str) -> usize {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| has_extension(&e.path(), extension))
            .count(),
        Err(e) => {
            warn!("could not read directory {:?}: {}", dir, e);
            0
        }
    }
}

pub fn banner(ch: char, width: usize) -> String {
    std::iter::repeat(ch).take(width).collect()
}

/// Log target that copies every line to stdout and to the log file.
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TeeWriter { file })
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}
