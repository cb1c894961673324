use anyhow::Result;
use ketch_core::checksum::sha256_file;
use std::path::Path;

pub fn run_checksum(path: &Path) -> Result<()> {
    let digest = sha256_file(path)?;
    println!("{digest}  {}", path.display());
    Ok(())
}
