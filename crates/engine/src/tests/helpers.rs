use crate::Engine;
use anyhow::Result;
use std::path::Path;

pub fn open_engine(dir: &Path) -> Result<Engine> {
    Engine::new(dir.join("wal.log"), false)
}
