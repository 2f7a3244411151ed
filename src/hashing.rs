// Streaming MD5 hashing (component A). Used to detect duplicate uploads and
// to index cached answers; not cryptographically sensitive.
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(hex::encode(context.compute().0))
}

pub fn hash_string(s: &str) -> String {
    hex::encode(md5::compute(s.as_bytes()).0)
}
