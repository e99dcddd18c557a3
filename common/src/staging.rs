//! Staging file names and the per-transfer archive locations built from them

use rand::{Rng, SeedableRng};

pub const STAGING_NAME_LEN: usize = 13;

/// Name of the archive created inside the source directory
pub const SOURCE_ARCHIVE_NAME: &str = "dump.zip";

/// Directory on the destination host that receives the uploaded archive
pub const REMOTE_TEMP_DIR: &str = "/tmp";

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces staging identifiers that never repeat within one generator
///
/// The RNG is seeded once, when the generator is created. Issued names are remembered and a
/// repeated draw is discarded, so two transfers running at the same time can never be handed the
/// same name.
#[derive(Debug)]
pub struct StagingNames {
    inner: std::sync::Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    rng: rand::rngs::StdRng,
    issued: std::collections::HashSet<String>,
}

impl StagingNames {
    pub fn from_entropy() -> Self {
        Self::with_rng(rand::rngs::StdRng::from_entropy())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(rand::rngs::StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: rand::rngs::StdRng) -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                rng,
                issued: std::collections::HashSet::new(),
            }),
        }
    }

    pub fn next_name(&self) -> String {
        // a poisoned lock still holds a usable RNG and name set
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let name: String = (0..STAGING_NAME_LEN)
                .map(|_| char::from(ALPHABET[inner.rng.gen_range(0..ALPHABET.len())]))
                .collect();
            if inner.issued.insert(name.clone()) {
                return name;
            }
            tracing::trace!("staging name {} was already issued, drawing again", name);
        }
    }
}

static PROCESS_NAMES: std::sync::LazyLock<StagingNames> =
    std::sync::LazyLock::new(StagingNames::from_entropy);

/// Next staging identifier from the process-wide generator
pub fn staging_name() -> String {
    PROCESS_NAMES.next_name()
}

/// The three files one transfer creates on its way from source to destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArtifact {
    pub id: String,
    /// `<source path>/dump.zip` on the source host
    pub source_archive: String,
    /// Local copy of the archive
    pub local_staging: std::path::PathBuf,
    /// `/tmp/<id>.zip` on the destination host
    pub destination_temp: String,
}

impl StagingArtifact {
    pub fn with_id(id: String, source_path: &str, local_dir: &std::path::Path) -> Self {
        let file_name = format!("{id}.zip");
        let source_archive = if source_path.ends_with('/') {
            format!("{source_path}{SOURCE_ARCHIVE_NAME}")
        } else {
            format!("{source_path}/{SOURCE_ARCHIVE_NAME}")
        };
        Self {
            source_archive,
            local_staging: local_dir.join(&file_name),
            destination_temp: format!("{REMOTE_TEMP_DIR}/{file_name}"),
            id,
        }
    }
}
