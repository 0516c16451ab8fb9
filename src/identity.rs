use std::{
    fs::DirBuilder,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use log::info;

use crate::{key::stage_file, Error};

pub const ID_DOC_FILE_NAME: &str = "id-doc";
pub const CERTIFICATE_MODE: u32 = 0o644;
const ID_DIR_MODE: u32 = 0o700;

/// The on-disk identity document: `<dir>/id-doc.key` and `<dir>/id-doc.crt`.
///
/// The key is staged under a pending name until a certificate is available, then both are
/// renamed into place key first, so a present certificate always has its key next to it.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    /// Opens the store, creating `dir` (owner-only) if it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        DirBuilder::new()
            .recursive(true)
            .mode(ID_DIR_MODE)
            .create(&dir)
            .map_err(|e| Error::storage(&dir, e))?;
        info!("using identity doc dir: {}", dir.display());
        Ok(IdentityStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(format!("{ID_DOC_FILE_NAME}.key"))
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(format!("{ID_DOC_FILE_NAME}.crt"))
    }

    /// Where the private key is written before the certificate has been issued.
    pub fn staged_key_path(&self) -> PathBuf {
        self.dir.join(format!("{ID_DOC_FILE_NAME}.key.pending"))
    }

    /// Publishes the staged key and `certificate`, overwriting any previous identity document.
    pub fn commit(&self, certificate: &[u8]) -> Result<(), Error> {
        let staged = self.staged_key_path();
        let key = self.key_path();
        let cert = self.cert_path();

        // a failed certificate write must leave the previous pair untouched
        let pending_cert = stage_file(&cert, certificate, CERTIFICATE_MODE)?;

        std::fs::rename(&staged, &key).map_err(|e| Error::storage(&key, e))?;
        pending_cert
            .persist(&cert)
            .map_err(|e| Error::storage(&cert, e.error))?;
        info!("wrote identity document to {}", cert.display());
        Ok(())
    }
}
