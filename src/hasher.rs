use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::cancel::CancelFlag;
use crate::error::{CatalogError, CatalogResult};

pub const CHUNK_SIZE: usize = 4096;

/// Name recorded on every catalog that carries digests.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Streams `path` through SHA-256 in `CHUNK_SIZE` reads and returns the hex
/// digest. The flag is checked before every chunk; a cancelled read returns
/// `Cancelled`, never a partial digest.
pub fn digest_file(path: &Path, cancel: &CancelFlag) -> CatalogResult<String> {
    let file = File::open(path).map_err(|e| CatalogError::io(path, e))?;
    digest_reader(file, cancel).map_err(|e| match e {
        CatalogError::Io { source, .. } => CatalogError::io(path, source),
        other => other,
    })
}

pub fn digest_reader<R: Read>(mut reader: R, cancel: &CancelFlag) -> CatalogResult<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CatalogError::io("<stream>", e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn known_digest() {
        let flag = CancelFlag::new();
        let d = digest_reader(&b"abc"[..], &flag).unwrap();
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn multi_chunk_file_matches_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let streamed = digest_file(&path, &CancelFlag::new()).unwrap();
        assert_eq!(streamed, hex::encode(Sha256::digest(&data)));
        assert_eq!(streamed.len(), 64);
    }

    #[test]
    fn cancelled_before_first_chunk() {
        let flag = CancelFlag::new();
        flag.cancel();
        let res = digest_reader(&b"data"[..], &flag);
        assert!(matches!(res, Err(CatalogError::Cancelled)));
    }

    struct CancelAfterFirst {
        flag: CancelFlag,
    }

    impl Read for CancelAfterFirst {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.flag.cancel();
            buf.fill(1);
            Ok(buf.len())
        }
    }

    #[test]
    fn cancelled_mid_stream() {
        let flag = CancelFlag::new();
        let reader = CancelAfterFirst {
            flag: flag.clone(),
        };
        let res = digest_reader(reader, &flag);
        assert!(matches!(res, Err(CatalogError::Cancelled)));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        match digest_file(&path, &CancelFlag::new()) {
            Err(CatalogError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }
}
