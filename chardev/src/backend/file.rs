//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Output-only file backend

use crate::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) struct FileBackend {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileBackend {
    pub(crate) fn open(path: &Path, append: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(options.open(path)?)),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        match self.file.lock().as_mut() {
            Some(file) => {
                file.write_all(buf)?;
                Ok(buf.len())
            }
            None => Ok(0),
        }
    }

    pub(crate) fn close(&self) {
        self.file.lock().take();
    }
}
