// Copyright (c) 2025 Mailsync Engine Contributors
//
// This file is part of the Mailsync Engine project.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use std::sync::LazyLock;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

pub static DATA_DIR_MANAGER: LazyLock<DataDirManager> = LazyLock::new(|| {
    DataDirManager::new(&SETTINGS.engine_data_dir).expect("failed to initialize data directory")
});

/// Resolves and owns the on-disk layout under `ENGINE_DATA_DIR`: the
/// embedded store file and the log directory.
pub struct DataDirManager {
    pub root: PathBuf,
    pub store_path: PathBuf,
    pub log_dir: PathBuf,
}

impl DataDirManager {
    fn new(root: &str) -> EngineResult<Self> {
        let root = PathBuf::from(root);
        let log_dir = root.join("logs");
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            store_path: root.join("mailsync.db"),
            log_dir,
            root,
        })
    }

    pub async fn initialize() -> EngineResult<()> {
        if !DATA_DIR_MANAGER.root.is_dir() {
            return Err(raise_error!(
                format!(
                    "Data directory {:?} could not be created",
                    DATA_DIR_MANAGER.root
                ),
                ErrorCode::MissingConfiguration
            ));
        }
        Ok(())
    }
}
