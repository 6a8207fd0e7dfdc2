//! SHA256 content hash used for upload de-duplication and retry identity.

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use super::errors::Result;
use super::task::{FileRef, FileSource};

const READ_BUFFER: usize = 64 * 1024;

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// 流式计算文件内容的哈希，不会把整个文件读入内存
pub async fn hash_file(file: &FileRef) -> Result<String> {
    match &file.source {
        FileSource::Memory(data) => Ok(hash_bytes(data)),
        FileSource::Path(path) => {
            let mut reader = File::open(path).await?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; READ_BUFFER];

            loop {
                let read = reader.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }

            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}
