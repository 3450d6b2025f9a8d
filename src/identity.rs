//! Per-installation identity.
//!
//! The only state that survives a session is the 12-byte ZID, persisted in a
//! dotfile under the user's home directory. The on-disk layout is a
//! bincode-serialised record and is private to this implementation.

use core::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::fs;

use log::{debug, info, warn};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// ZID length in bytes.
pub const ZID_LEN: usize = 12;

/// Default identity store file name, created under `$HOME`.
pub const CACHE_FILE_NAME: &str = ".voiz_cache";

/// 12-byte per-installation identifier.
///
/// Generated once from the CSPRNG and read-only for the life of the
/// installation.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zid([u8; ZID_LEN]);

impl Zid {
    /// Generate a fresh ZID.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut zid: [u8; ZID_LEN] = [0; ZID_LEN];
        rng.fill_bytes(&mut zid);
        Self(zid)
    }

    /// The raw identifier bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; ZID_LEN] {
        &self.0
    }
}

impl From<[u8; ZID_LEN]> for Zid {
    fn from(bytes: [u8; ZID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Zid {
    type Error = usize;

    /// Fails with the offending length if `bytes` is not [`ZID_LEN`] long.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let zid: [u8; ZID_LEN] = bytes.try_into().map_err(|_| bytes.len())?;
        Ok(Self(zid))
    }
}

impl fmt::Display for Zid {
    /// Bare lowercase hex.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Zid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Zid(0x{self})")
    }
}

#[derive(Serialize, Deserialize)]
struct Record {
    zid: [u8; ZID_LEN],
}

/// On-disk identity store.
///
/// Concurrent access by multiple processes is not supported; last writer
/// wins.
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    zid: Zid,
}

impl Cache {
    /// `$HOME/.voiz_cache`, or `None` when no home directory is set.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(PathBuf::from(home).join(CACHE_FILE_NAME))
    }

    /// Load the identity store, creating and persisting a fresh ZID if the
    /// file is missing or does not decode.
    ///
    /// Read errors other than "not found", and all write errors, are fatal;
    /// identity-store failures at start-up are not recoverable.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rand_core::OsRng;
    /// use voiz::identity::Cache;
    ///
    /// let path = Cache::default_path().expect("no home directory");
    /// let cache = Cache::load_or_create(path, &mut OsRng)?;
    /// println!("ZID = 0x{}", cache.zid());
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn load_or_create<P: AsRef<Path>, R: RngCore + CryptoRng>(
        path: P,
        rng: &mut R,
    ) -> io::Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        debug!("using identity store `{}`", path.display());

        match fs::read(&path) {
            Ok(raw) => match bincode::deserialize::<Record>(&raw) {
                Ok(record) => {
                    return Ok(Self {
                        path,
                        zid: Zid(record.zid),
                    })
                }
                Err(e) => warn!("identity store does not decode ({e}), regenerating ZID"),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => return Err(e),
        }

        let cache = Self {
            path,
            zid: Zid::generate(rng),
        };
        cache.persist()?;
        info!("generated new ZID = 0x{}", cache.zid);
        Ok(cache)
    }

    /// The installation's ZID.
    #[inline]
    pub fn zid(&self) -> Zid {
        self.zid
    }

    /// Write-temp-then-rename so a crash mid-write cannot truncate the store.
    fn persist(&self) -> io::Result<()> {
        let record = Record { zid: self.zid.0 };
        let raw: Vec<u8> = bincode::serialize(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRng;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voiz-cache-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn zid_survives_reload() {
        let path = scratch_path("reload");
        let _ = fs::remove_file(&path);

        let mut rng = TestRng::new(1);
        let first = Cache::load_or_create(&path, &mut rng).unwrap();
        let second = Cache::load_or_create(&path, &mut rng).unwrap();
        assert_eq!(first.zid(), second.zid());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn undecodable_store_regenerates() {
        let path = scratch_path("corrupt");
        fs::write(&path, b"not a cache").unwrap();

        let mut rng = TestRng::new(2);
        let cache = Cache::load_or_create(&path, &mut rng).unwrap();

        // the regenerated ZID must have been persisted
        let reloaded = Cache::load_or_create(&path, &mut rng).unwrap();
        assert_eq!(cache.zid(), reloaded.zid());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zid_display_is_hex() {
        let zid = Zid([0xDE, 0xAD, 0xBE, 0xEF, 0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(zid.to_string(), "deadbeef0001020304050607");
    }
}
