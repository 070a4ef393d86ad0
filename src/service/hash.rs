use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufReader, Error, Read};
use std::path::Path;

/// Hex SHA-256 of a file's full contents
pub fn hash_file(file: &Path) -> Result<String, Error> {
    let reader = BufReader::new(fs::File::open(file)?);
    hasher(reader)
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hasher<R: Read>(mut reader: BufReader<R>) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}
