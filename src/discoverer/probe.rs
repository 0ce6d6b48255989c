//! Crawl filter: decides which directories are entered and which files are
//! picked up during discovery.

use crate::core::Core;
use crate::error::Result;
use crate::extensions;
use crate::fs::FsFile;
use crate::model::folder::{BannedType, Folder};
use crate::utils::mrl;

pub struct CrawlerProbe;

impl CrawlerProbe {
    /// Hidden directories are skipped, as are banned folder rows.
    pub fn should_enter_directory(&self, core: &Core, dir_mrl: &str) -> Result<bool> {
        let name = mrl::file_name(dir_mrl.trim_end_matches('/'));
        if name.starts_with('.') {
            return Ok(false);
        }
        let banned = Folder::from_mrl(core, dir_mrl, BannedType::Banned)?;
        Ok(banned.is_none())
    }

    /// Only files with a whitelisted extension are indexed.
    pub fn should_index_file(&self, file: &dyn FsFile) -> bool {
        match file.extension() {
            Some(ext) => extensions::is_supported(&ext),
            None => false,
        }
    }
}
